//! Resource-server side: bearer token validation

use oauth2_core::{Error, ErrorKind, Result, TokenInfo};
use tracing::{debug, instrument};

use crate::request::Request;
use crate::server::Server;

impl Server {
    /// Resolve the access token presented in `Authorization: Bearer`, or in
    /// the `access_token` form value when no header is sent.
    ///
    /// Every protocol failure is reported as `invalid_token`.
    #[instrument(skip_all)]
    pub async fn validation_bearer_token(&self, req: &Request) -> Result<TokenInfo> {
        let token = req
            .bearer_token()
            .unwrap_or_else(|| req.form_value("access_token"));
        self.manager.load_access_token(token).await.map_err(|err| {
            debug!(error = %err, "bearer token rejected");
            match err.kind() {
                None | Some(ErrorKind::InvalidToken) => err,
                Some(_) => Error::InvalidAccessToken,
            }
        })
    }
}
