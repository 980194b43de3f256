//! Token endpoint

use http::{Method, StatusCode};
use oauth2_core::{Error, ErrorKind, GrantType, Result, TokenGenerateRequest, TokenInfo};
use tracing::{instrument, warn};

use crate::request::Request;
use crate::response::Response;
use crate::server::Server;

impl Server {
    /// Handle a token request end to end. Errors are rendered as JSON.
    #[instrument(skip_all, fields(grant_type = %req.form_value("grant_type")))]
    pub async fn handle_token_request(&self, req: &Request) -> Response {
        let result = match self.validation_token_request(req).await {
            Ok((grant_type, tgr)) => self.get_access_token(grant_type, &tgr).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(info) => self.token_response(self.token_data(&info), StatusCode::OK),
            Err(err) => {
                warn!(error = %err, "token request failed");
                let rendered = self.error_response(&err);
                self.token_response(rendered.to_map(None), rendered.status)
            }
        }
    }

    /// Parse the grant and collect the fields it needs.
    ///
    /// Client credentials are extracted here and verified by the manager,
    /// except for the password grant, where the client is authenticated
    /// before the resource owner's credentials reach the password hook.
    pub async fn validation_token_request(
        &self,
        req: &Request,
    ) -> Result<(GrantType, TokenGenerateRequest)> {
        let method_allowed = req.method == Method::POST
            || (req.method == Method::GET && self.config.allow_get_access_request);
        if !method_allowed {
            return Err(ErrorKind::InvalidRequest.into());
        }

        // Implicit tokens come only from the authorization endpoint
        let grant_type = GrantType::parse(req.form_value("grant_type"))
            .filter(|gt| *gt != GrantType::Implicit)
            .ok_or(Error::from(ErrorKind::UnsupportedGrantType))?;

        let (client_id, client_secret) = (self.handlers.client_info)(req)?;
        if !self.config.allows_grant_type(grant_type) {
            return Err(ErrorKind::UnauthorizedClient.into());
        }
        let mut tgr = TokenGenerateRequest::new(client_id);
        if !client_secret.is_empty() {
            tgr = tgr.with_secret(client_secret);
        }

        match grant_type {
            GrantType::AuthorizationCode => {
                tgr.code = required(req, "code")?.to_owned();
                tgr.redirect_uri = required(req, "redirect_uri")?.to_owned();
                tgr.code_verifier = req.form_value("code_verifier").to_owned();
            }
            GrantType::PasswordCredentials => {
                let username = required(req, "username")?;
                let password = required(req, "password")?;
                self.manager.authenticate_client(&tgr).await?;
                let user_id =
                    (self.handlers.password_authorization)(&tgr.client_id, username, password)?
                        .ok_or(Error::from(ErrorKind::InvalidGrant))?;
                tgr.user_id = user_id;
                tgr.scope = req.form_value("scope").to_owned();
            }
            GrantType::ClientCredentials => {
                tgr.scope = req.form_value("scope").to_owned();
            }
            GrantType::Refreshing => {
                tgr.refresh = required(req, "refresh_token")?.to_owned();
                tgr.scope = req.form_value("scope").to_owned();
            }
            GrantType::Implicit => return Err(ErrorKind::UnsupportedGrantType.into()),
        }

        if let Some(hook) = &self.handlers.access_token_exp
            && let Some(exp) = hook(req)?
        {
            tgr.access_token_exp = Some(exp);
        }
        Ok((grant_type, tgr))
    }

    /// Run the grant-specific hooks and issue the token.
    pub async fn get_access_token(
        &self,
        grant_type: GrantType,
        tgr: &TokenGenerateRequest,
    ) -> Result<TokenInfo> {
        if let Some(hook) = &self.handlers.client_authorized
            && !hook(&tgr.client_id, grant_type)?
        {
            return Err(ErrorKind::UnauthorizedClient.into());
        }

        match grant_type {
            GrantType::AuthorizationCode => self
                .manager
                .generate_access_token(grant_type, tgr)
                .await
                .map_err(code_exchange_error),
            GrantType::PasswordCredentials | GrantType::ClientCredentials => {
                if let Some(hook) = &self.handlers.client_scope
                    && !hook(tgr)?
                {
                    return Err(ErrorKind::InvalidScope.into());
                }
                self.manager.generate_access_token(grant_type, tgr).await
            }
            GrantType::Refreshing => {
                let validation = &self.handlers.refreshing_validation;
                let scope = &self.handlers.refreshing_scope;
                if validation.is_some() || scope.is_some() {
                    let old = self.manager.load_refresh_token(&tgr.refresh).await?;
                    if let Some(hook) = validation
                        && !hook(&old)?
                    {
                        return Err(ErrorKind::InvalidGrant.into());
                    }
                    if let Some(hook) = scope
                        && !hook(tgr, &old.scope)?
                    {
                        return Err(ErrorKind::InvalidScope.into());
                    }
                }
                self.manager.generate_access_token(grant_type, tgr).await
            }
            GrantType::Implicit => Err(ErrorKind::UnsupportedGrantType.into()),
        }
    }
}

fn required<'a>(req: &'a Request, key: &str) -> Result<&'a str> {
    match req.form_value(key) {
        "" => Err(ErrorKind::InvalidRequest.into()),
        value => Ok(value),
    }
}

/// Client authentication failures stay `invalid_client`; every other
/// protocol failure of a code exchange is `invalid_grant`.
fn code_exchange_error(err: Error) -> Error {
    match err.kind() {
        None | Some(ErrorKind::InvalidClient | ErrorKind::InvalidGrant) => err,
        Some(_) => ErrorKind::InvalidGrant.into(),
    }
}
