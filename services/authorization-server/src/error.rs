//! Admin API errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of the client-management endpoints.
///
/// OAuth2 protocol errors never pass through here; the engine renders those
/// itself.
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing or invalid admin token")]
    Unauthorized,

    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("client not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] oauth2_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidClient(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": self.to_string() }).to_string(),
        )
            .into_response()
    }
}
