//! Protocol outcomes handed back to the adaptor

use http::{HeaderMap, HeaderValue, StatusCode, header};
use oauth2_core::{Error, ErrorKind};
use serde_json::{Map, Value};

/// What the adaptor should send.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// 302 to `location`.
    Redirect { location: String },
    /// JSON body with status and extra headers.
    Json {
        status: StatusCode,
        headers: HeaderMap,
        body: Map<String, Value>,
    },
    /// The resource owner must log in before the request can continue.
    NeedsAuthentication,
}

impl Response {
    /// JSON response with the headers RFC 6749 requires on token responses.
    pub fn token_json(body: Map<String, Value>, status: StatusCode) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        Self::Json {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Redirect { .. } => StatusCode::FOUND,
            Self::Json { status, .. } => *status,
            Self::NeedsAuthentication => StatusCode::UNAUTHORIZED,
        }
    }
}

/// A rendered protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub description: String,
    pub uri: Option<String>,
    pub status: StatusCode,
}

impl ErrorResponse {
    pub fn new(error: ErrorKind) -> Self {
        Self {
            error,
            description: error.description().to_owned(),
            uri: None,
            status: StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    /// Protocol errors keep their kind and description; anything internal
    /// becomes a generic `server_error`.
    pub fn from_error(err: &Error) -> Self {
        match err.kind() {
            Some(kind) => {
                let mut response = Self::new(kind);
                if let Some(description) = err.description() {
                    response.description = description.to_owned();
                }
                response
            }
            None => Self::new(ErrorKind::ServerError),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// `{error, error_description, error_uri?, state?}`.
    pub fn to_map(&self, state: Option<&str>) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("error".into(), self.error.as_str().into());
        if !self.description.is_empty() {
            data.insert("error_description".into(), self.description.clone().into());
        }
        if let Some(uri) = &self.uri {
            data.insert("error_uri".into(), uri.clone().into());
        }
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            data.insert("state".into(), state.into());
        }
        data
    }
}
