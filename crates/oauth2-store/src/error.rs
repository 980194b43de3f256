//! Error types for store operations

/// Errors from the client registry and the token store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(String),

    #[error("record encoding error: {0}")]
    Encoding(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<Error> for oauth2_core::Error {
    fn from(err: Error) -> Self {
        oauth2_core::Error::Store(err.to_string())
    }
}
