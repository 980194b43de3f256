//! Pluggable decision points of the protocol engine
//!
//! Each hook is a shared closure. Only client-info, user-authorization and
//! password-authorization have defaults; every other hook is skipped when
//! unset.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use oauth2_core::{
    AuthorizeRequest, Error, ErrorKind, GrantType, Result, TokenGenerateRequest, TokenInfo,
};
use serde_json::{Map, Value};

use crate::request::Request;
use crate::response::{ErrorResponse, Response};

/// Extract `(client_id, client_secret)` from a token request.
pub type ClientInfoHandler = Arc<dyn Fn(&Request) -> Result<(String, String)> + Send + Sync>;

/// Whether a client may use a grant type.
pub type ClientAuthorizedHandler = Arc<dyn Fn(&str, GrantType) -> Result<bool> + Send + Sync>;

/// Whether a client may obtain the requested scope.
pub type ClientScopeHandler = Arc<dyn Fn(&TokenGenerateRequest) -> Result<bool> + Send + Sync>;

/// The logged-in resource owner, `None` when authentication is needed.
pub type UserAuthorizationHandler = Arc<dyn Fn(&Request) -> Result<Option<String>> + Send + Sync>;

/// Resolve `(client_id, username, password)` to a user id.
pub type PasswordAuthorizationHandler =
    Arc<dyn Fn(&str, &str, &str) -> Result<Option<String>> + Send + Sync>;

/// Whether a refresh may obtain the requested scope given the old scope.
pub type RefreshingScopeHandler =
    Arc<dyn Fn(&TokenGenerateRequest, &str) -> Result<bool> + Send + Sync>;

/// Whether a refresh token is still usable (e.g. not revoked elsewhere).
pub type RefreshingValidationHandler = Arc<dyn Fn(&TokenInfo) -> Result<bool> + Send + Sync>;

/// Observe every rendered error.
pub type ResponseErrorHandler = Arc<dyn Fn(&ErrorResponse) + Send + Sync>;

/// Replace the generic `server_error` for an internal failure.
pub type InternalErrorHandler = Arc<dyn Fn(&Error) -> Option<ErrorResponse> + Send + Sync>;

/// Replace the error redirect of the authorization endpoint.
pub type PreRedirectErrorHandler =
    Arc<dyn Fn(&AuthorizeRequest, &Error) -> Option<Response> + Send + Sync>;

/// Replace the requested scope of an authorization request.
pub type AuthorizeScopeHandler = Arc<dyn Fn(&Request) -> Result<Option<String>> + Send + Sync>;

/// Override the access token lifetime for a request.
pub type AccessTokenExpHandler = Arc<dyn Fn(&Request) -> Result<Option<Duration>> + Send + Sync>;

/// Extra fields for token responses. Standard fields are never overwritten.
pub type ExtensionFieldsHandler = Arc<dyn Fn(&TokenInfo) -> Map<String, Value> + Send + Sync>;

/// Render a token-endpoint body.
pub type ResponseTokenHandler =
    Arc<dyn Fn(Map<String, Value>, StatusCode) -> Response + Send + Sync>;

/// The full hook set of a [`crate::Server`].
#[derive(Clone)]
pub struct Handlers {
    pub client_info: ClientInfoHandler,
    pub user_authorization: UserAuthorizationHandler,
    pub password_authorization: PasswordAuthorizationHandler,
    pub client_authorized: Option<ClientAuthorizedHandler>,
    pub client_scope: Option<ClientScopeHandler>,
    pub refreshing_scope: Option<RefreshingScopeHandler>,
    pub refreshing_validation: Option<RefreshingValidationHandler>,
    pub response_error: Option<ResponseErrorHandler>,
    pub internal_error: Option<InternalErrorHandler>,
    pub pre_redirect_error: Option<PreRedirectErrorHandler>,
    pub authorize_scope: Option<AuthorizeScopeHandler>,
    pub access_token_exp: Option<AccessTokenExpHandler>,
    pub extension_fields: Option<ExtensionFieldsHandler>,
    pub response_token: Option<ResponseTokenHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            client_info: Arc::new(client_basic_or_form_handler),
            user_authorization: Arc::new(deny_user),
            password_authorization: Arc::new(no_password_users),
            client_authorized: None,
            client_scope: None,
            refreshing_scope: None,
            refreshing_validation: None,
            response_error: None,
            internal_error: None,
            pre_redirect_error: None,
            authorize_scope: None,
            access_token_exp: None,
            extension_fields: None,
            response_token: None,
        }
    }
}

fn deny_user(_req: &Request) -> Result<Option<String>> {
    Err(ErrorKind::AccessDenied.into())
}

fn no_password_users(_client_id: &str, _username: &str, _password: &str) -> Result<Option<String>> {
    Ok(None)
}

/// Client credentials from the `client_id`/`client_secret` form values.
pub fn client_form_handler(req: &Request) -> Result<(String, String)> {
    let client_id = req.form_value("client_id");
    if client_id.is_empty() {
        return Err(ErrorKind::InvalidClient.into());
    }
    Ok((client_id.to_owned(), req.form_value("client_secret").to_owned()))
}

/// Client credentials from HTTP Basic authentication.
pub fn client_basic_handler(req: &Request) -> Result<(String, String)> {
    req.basic_auth()
        .filter(|(id, _)| !id.is_empty())
        .ok_or_else(|| ErrorKind::InvalidClient.into())
}

/// HTTP Basic, falling back to form values.
pub fn client_basic_or_form_handler(req: &Request) -> Result<(String, String)> {
    client_basic_handler(req).or_else(|_| client_form_handler(req))
}
