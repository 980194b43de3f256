//! The protocol engine
//!
//! `Server` turns transport-neutral [`Request`]s into [`Response`]s. The
//! authorization endpoint lives in `authorize.rs`, the token endpoint in
//! `token.rs` and bearer validation in `bearer.rs`; this module holds the
//! shared state, the hook setters and the rendering helpers.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use oauth2_core::{
    AuthorizeRequest, Error, GrantType, ResponseType, Result, TokenGenerateRequest, TokenInfo,
};
use oauth2_manage::Manager;
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::config::ServerConfig;
use crate::handler::Handlers;
use crate::request::Request;
use crate::response::{ErrorResponse, Response};

pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) manager: Arc<Manager>,
    pub(crate) handlers: Handlers,
}

impl Server {
    pub fn new(config: ServerConfig, manager: Arc<Manager>) -> Self {
        Self {
            config,
            manager,
            handlers: Handlers::default(),
        }
    }

    /// Server with the default configuration.
    pub fn with_manager(manager: Arc<Manager>) -> Self {
        Self::new(ServerConfig::default(), manager)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn set_handlers(&mut self, handlers: Handlers) {
        self.handlers = handlers;
    }

    pub fn set_allow_get_access_request(&mut self, allow: bool) {
        self.config.allow_get_access_request = allow;
    }

    pub fn set_allowed_response_types(&mut self, types: impl IntoIterator<Item = ResponseType>) {
        self.config.allowed_response_types = types.into_iter().collect();
    }

    pub fn set_allowed_grant_types(&mut self, types: impl IntoIterator<Item = GrantType>) {
        self.config.allowed_grant_types = types.into_iter().collect();
    }

    pub fn set_force_pkce(&mut self, force: bool) {
        self.config.force_pkce = force;
    }

    pub fn set_client_info_handler(
        &mut self,
        f: impl Fn(&Request) -> Result<(String, String)> + Send + Sync + 'static,
    ) {
        self.handlers.client_info = Arc::new(f);
    }

    pub fn set_client_authorized_handler(
        &mut self,
        f: impl Fn(&str, GrantType) -> Result<bool> + Send + Sync + 'static,
    ) {
        self.handlers.client_authorized = Some(Arc::new(f));
    }

    pub fn set_client_scope_handler(
        &mut self,
        f: impl Fn(&TokenGenerateRequest) -> Result<bool> + Send + Sync + 'static,
    ) {
        self.handlers.client_scope = Some(Arc::new(f));
    }

    pub fn set_user_authorization_handler(
        &mut self,
        f: impl Fn(&Request) -> Result<Option<String>> + Send + Sync + 'static,
    ) {
        self.handlers.user_authorization = Arc::new(f);
    }

    pub fn set_password_authorization_handler(
        &mut self,
        f: impl Fn(&str, &str, &str) -> Result<Option<String>> + Send + Sync + 'static,
    ) {
        self.handlers.password_authorization = Arc::new(f);
    }

    pub fn set_refreshing_scope_handler(
        &mut self,
        f: impl Fn(&TokenGenerateRequest, &str) -> Result<bool> + Send + Sync + 'static,
    ) {
        self.handlers.refreshing_scope = Some(Arc::new(f));
    }

    pub fn set_refreshing_validation_handler(
        &mut self,
        f: impl Fn(&TokenInfo) -> Result<bool> + Send + Sync + 'static,
    ) {
        self.handlers.refreshing_validation = Some(Arc::new(f));
    }

    pub fn set_response_error_handler(
        &mut self,
        f: impl Fn(&ErrorResponse) + Send + Sync + 'static,
    ) {
        self.handlers.response_error = Some(Arc::new(f));
    }

    pub fn set_internal_error_handler(
        &mut self,
        f: impl Fn(&Error) -> Option<ErrorResponse> + Send + Sync + 'static,
    ) {
        self.handlers.internal_error = Some(Arc::new(f));
    }

    pub fn set_pre_redirect_error_handler(
        &mut self,
        f: impl Fn(&AuthorizeRequest, &Error) -> Option<Response> + Send + Sync + 'static,
    ) {
        self.handlers.pre_redirect_error = Some(Arc::new(f));
    }

    pub fn set_authorize_scope_handler(
        &mut self,
        f: impl Fn(&Request) -> Result<Option<String>> + Send + Sync + 'static,
    ) {
        self.handlers.authorize_scope = Some(Arc::new(f));
    }

    pub fn set_access_token_exp_handler(
        &mut self,
        f: impl Fn(&Request) -> Result<Option<Duration>> + Send + Sync + 'static,
    ) {
        self.handlers.access_token_exp = Some(Arc::new(f));
    }

    pub fn set_extension_fields_handler(
        &mut self,
        f: impl Fn(&TokenInfo) -> Map<String, Value> + Send + Sync + 'static,
    ) {
        self.handlers.extension_fields = Some(Arc::new(f));
    }

    pub fn set_response_token_handler(
        &mut self,
        f: impl Fn(Map<String, Value>, StatusCode) -> Response + Send + Sync + 'static,
    ) {
        self.handlers.response_token = Some(Arc::new(f));
    }

    /// Render an error, consulting the internal-error and response-error
    /// hooks.
    pub fn error_response(&self, err: &Error) -> ErrorResponse {
        let response = if err.is_internal() {
            warn!(error = %err, "internal error");
            self.handlers
                .internal_error
                .as_ref()
                .and_then(|hook| hook(err))
                .unwrap_or_else(|| ErrorResponse::from_error(err))
        } else {
            ErrorResponse::from_error(err)
        };
        if let Some(hook) = &self.handlers.response_error {
            hook(&response);
        }
        response
    }

    /// Error as a direct JSON response.
    pub fn error_json(&self, err: &Error) -> Response {
        let response = self.error_response(err);
        Response::token_json(response.to_map(None), response.status)
    }

    /// `{access_token, token_type, expires_in, refresh_token?, scope?}` plus
    /// extension fields.
    pub fn token_data(&self, info: &TokenInfo) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("access_token".into(), info.access().unwrap_or_default().into());
        data.insert("token_type".into(), self.config.token_type.clone().into());
        data.insert("expires_in".into(), info.access_expires_in.as_secs().into());
        if !info.scope.is_empty() {
            data.insert("scope".into(), info.scope.clone().into());
        }
        if let Some(refresh) = info.refresh() {
            data.insert("refresh_token".into(), refresh.into());
        }
        if let Some(hook) = &self.handlers.extension_fields {
            for (key, value) in hook(info) {
                data.entry(key).or_insert(value);
            }
        }
        data
    }

    /// Render a token-endpoint body through the response-token hook.
    pub(crate) fn token_response(&self, data: Map<String, Value>, status: StatusCode) -> Response {
        match &self.handlers.response_token {
            Some(hook) => hook(data, status),
            None => Response::token_json(data, status),
        }
    }

    /// Redirect target carrying `data`: in the query for the code flow, in
    /// the fragment for the implicit flow.
    pub fn redirect_uri(
        &self,
        req: &AuthorizeRequest,
        data: &Map<String, Value>,
    ) -> Result<String> {
        let mut url = Url::parse(&req.redirect_uri).map_err(|_| Error::InvalidRedirectUri)?;
        match req.response_type {
            ResponseType::Code => {
                let mut query = url.query_pairs_mut();
                for (key, value) in data {
                    query.append_pair(key, &value_str(value));
                }
            }
            ResponseType::Token => {
                let mut fragment = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in url.query_pairs() {
                    fragment.append_pair(&key, &value);
                }
                for (key, value) in data {
                    fragment.append_pair(key, &value_str(value));
                }
                let fragment = fragment.finish();
                url.set_query(None);
                url.set_fragment(Some(&fragment));
            }
        }
        Ok(url.into())
    }
}

fn value_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
