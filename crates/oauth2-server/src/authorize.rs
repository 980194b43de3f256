//! Authorization endpoint

use http::Method;
use oauth2_core::constants::{CODE_CHALLENGE_MAX_LEN, CODE_CHALLENGE_MIN_LEN};
use oauth2_core::{
    AuthorizeRequest, CodeChallengeMethod, Error, ErrorKind, GrantType, ResponseType, Result,
    TokenInfo,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::request::Request;
use crate::response::Response;
use crate::server::Server;

impl Server {
    /// Handle an authorization request end to end.
    ///
    /// Failures before the redirect URI is trusted are rendered as JSON;
    /// later failures are redirected back to the client.
    #[instrument(skip_all, fields(client_id = %req.form_value("client_id")))]
    pub async fn handle_authorize_request(&self, req: &Request) -> Response {
        let mut ar = match self.validation_authorize_request(req).await {
            Ok(ar) => ar,
            Err(err) => {
                warn!(error = %err, "rejected authorization request");
                return self.error_json(&err);
            }
        };

        match self.authorize(req, &mut ar).await {
            Ok(Some(location)) => Response::Redirect { location },
            Ok(None) => {
                debug!("resource owner not authenticated");
                Response::NeedsAuthentication
            }
            Err(err) => {
                warn!(error = %err, response_type = %ar.response_type, "authorization failed");
                self.redirect_error(&ar, &err)
            }
        }
    }

    /// Parse the request and resolve its client and redirect URI.
    pub async fn validation_authorize_request(&self, req: &Request) -> Result<AuthorizeRequest> {
        if req.method != Method::GET && req.method != Method::POST {
            return Err(ErrorKind::InvalidRequest.into());
        }

        let response_type = ResponseType::parse(req.form_value("response_type"))
            .filter(|rt| self.config.allows_response_type(*rt))
            .ok_or(Error::from(ErrorKind::UnsupportedResponseType))?;

        let client_id = req.form_value("client_id");
        if client_id.is_empty() {
            return Err(ErrorKind::InvalidRequest.into());
        }
        let client = self.manager.get_client(client_id).await?;

        let mut ar = AuthorizeRequest::new(response_type, client_id);
        let redirect_uri = req.form_value("redirect_uri");
        if redirect_uri.is_empty() {
            ar.redirect_uri = client.domain.clone();
        } else {
            self.manager.check_redirect_uri(&client, redirect_uri)?;
            ar.redirect_uri = redirect_uri.to_owned();
        }
        ar.scope = req.form_value("scope").to_owned();
        ar.state = req.form_value("state").to_owned();
        Ok(ar)
    }

    /// Everything after the redirect URI is trusted. `None` means the user
    /// still has to log in.
    async fn authorize(&self, req: &Request, ar: &mut AuthorizeRequest) -> Result<Option<String>> {
        self.check_pkce(req, ar)?;

        let Some(user_id) = (self.handlers.user_authorization)(req)? else {
            return Ok(None);
        };
        ar.user_id = user_id;

        if let Some(hook) = &self.handlers.authorize_scope
            && let Some(scope) = hook(req)?
        {
            ar.scope = scope;
        }
        if let Some(hook) = &self.handlers.access_token_exp
            && let Some(exp) = hook(req)?
        {
            ar.access_token_exp = Some(exp);
        }

        let info = self.get_authorize_token(ar).await?;
        let data = self.authorize_data(ar, &info);
        self.redirect_uri(ar, &data).map(Some)
    }

    fn check_pkce(&self, req: &Request, ar: &mut AuthorizeRequest) -> Result<()> {
        let challenge = req.form_value("code_challenge");
        if challenge.is_empty() {
            return if self.config.force_pkce {
                Err(Error::CodeChallengeRequired)
            } else {
                Ok(())
            };
        }
        if !(CODE_CHALLENGE_MIN_LEN..=CODE_CHALLENGE_MAX_LEN).contains(&challenge.len()) {
            return Err(Error::InvalidCodeChallengeLen);
        }

        let method = match req.form_value("code_challenge_method") {
            "" => CodeChallengeMethod::Plain,
            other => CodeChallengeMethod::parse(other)
                .ok_or(Error::UnsupportedCodeChallengeMethod)?,
        };
        if !self.config.allows_code_challenge_method(method) {
            return Err(Error::UnsupportedCodeChallengeMethod);
        }

        ar.code_challenge = challenge.to_owned();
        ar.code_challenge_method = Some(method);
        Ok(())
    }

    /// Issue the code or implicit token for a validated request.
    pub async fn get_authorize_token(&self, ar: &AuthorizeRequest) -> Result<TokenInfo> {
        let grant_type = match ar.response_type {
            ResponseType::Code => GrantType::AuthorizationCode,
            ResponseType::Token => GrantType::Implicit,
        };
        if let Some(hook) = &self.handlers.client_authorized
            && !hook(&ar.client_id, grant_type)?
        {
            return Err(ErrorKind::UnauthorizedClient.into());
        }

        let tgr = ar.to_generate_request();
        if let Some(hook) = &self.handlers.client_scope
            && !hook(&tgr)?
        {
            return Err(ErrorKind::InvalidScope.into());
        }

        match ar.response_type {
            ResponseType::Code => self.manager.generate_authorization_code(ar).await,
            ResponseType::Token => {
                self.manager
                    .generate_access_token(GrantType::Implicit, &tgr)
                    .await
            }
        }
    }

    fn authorize_data(&self, ar: &AuthorizeRequest, info: &TokenInfo) -> Map<String, Value> {
        let mut data = match ar.response_type {
            ResponseType::Code => {
                let mut data = Map::new();
                data.insert("code".into(), info.code().unwrap_or_default().into());
                data
            }
            ResponseType::Token => self.token_data(info),
        };
        if !ar.state.is_empty() {
            data.insert("state".into(), ar.state.clone().into());
        }
        data
    }

    fn redirect_error(&self, ar: &AuthorizeRequest, err: &Error) -> Response {
        let rendered = self.error_response(err);
        if let Some(hook) = &self.handlers.pre_redirect_error
            && let Some(response) = hook(ar, err)
        {
            return response;
        }
        match self.redirect_uri(ar, &rendered.to_map(Some(&ar.state))) {
            Ok(location) => Response::Redirect { location },
            Err(err) => self.error_json(&err),
        }
    }
}
