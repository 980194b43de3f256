//! Error types for the authorization server engine
//!
//! Two tiers:
//! - [`ErrorKind`] is the wire-visible RFC 6749 error code with its default
//!   description and HTTP status.
//! - [`Error`] is what engine operations return. Protocol failures map to an
//!   `ErrorKind` through [`Error::kind`]; store/generator/internal failures
//!   have no kind and are rendered as `server_error` after passing through
//!   the internal-error hook.

use std::fmt;

/// Wire-visible OAuth2 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
    InvalidToken,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::ServerError => "server_error",
            Self::InvalidToken => "invalid_token",
        }
    }

    /// Default `error_description`.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => {
                "The request is missing a required parameter, includes an invalid parameter value, includes a parameter more than once, or is otherwise malformed"
            }
            Self::InvalidClient => "Client authentication failed",
            Self::InvalidGrant => {
                "The provided authorization grant (e.g., authorization code, resource owner credentials) or refresh token is invalid, expired, revoked, does not match the redirection URI used in the authorization request, or was issued to another client"
            }
            Self::UnauthorizedClient => {
                "The client is not authorized to request an authorization code using this method"
            }
            Self::UnsupportedGrantType => {
                "The authorization grant type is not supported by the authorization server"
            }
            Self::UnsupportedResponseType => {
                "The authorization server does not support obtaining an authorization code using this method"
            }
            Self::InvalidScope => "The requested scope is invalid, unknown, or malformed",
            Self::AccessDenied => "The resource owner or authorization server denied the request",
            Self::ServerError => {
                "The authorization server encountered an unexpected condition that prevented it from fulfilling the request"
            }
            Self::InvalidToken => {
                "The access token provided is expired, revoked, malformed, or invalid for other reasons"
            }
        }
    }

    /// HTTP status for a direct (non-redirect) error response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidClient | Self::InvalidToken => 401,
            Self::ServerError => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A protocol error raised directly with its wire kind.
    #[error("{0}")]
    Protocol(ErrorKind),

    #[error("invalid redirect uri")]
    InvalidRedirectUri,

    #[error("invalid authorization code")]
    InvalidAuthorizeCode,

    #[error("invalid access token")]
    InvalidAccessToken,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("expired access token")]
    ExpiredAccessToken,

    #[error("expired refresh token")]
    ExpiredRefreshToken,

    #[error("missing code verifier")]
    MissingCodeVerifier,

    #[error("invalid code verifier")]
    InvalidCodeChallenge,

    #[error("code challenge required")]
    CodeChallengeRequired,

    #[error("unsupported code challenge method")]
    UnsupportedCodeChallengeMethod,

    #[error("invalid code challenge length")]
    InvalidCodeChallengeLen,

    #[error("token store error: {0}")]
    Store(String),

    #[error("token generation failed: {0}")]
    Generate(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire kind for protocol errors, `None` for internal failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Protocol(kind) => Some(*kind),
            Self::InvalidRedirectUri
            | Self::CodeChallengeRequired
            | Self::UnsupportedCodeChallengeMethod
            | Self::InvalidCodeChallengeLen => Some(ErrorKind::InvalidRequest),
            Self::InvalidAuthorizeCode
            | Self::InvalidRefreshToken
            | Self::ExpiredRefreshToken
            | Self::MissingCodeVerifier
            | Self::InvalidCodeChallenge => Some(ErrorKind::InvalidGrant),
            Self::InvalidAccessToken | Self::ExpiredAccessToken => Some(ErrorKind::InvalidToken),
            Self::Store(_) | Self::Generate(_) | Self::Internal(_) => None,
        }
    }

    /// `error_description` for protocol errors. Sub-cases that share a kind
    /// get their own description; the rest use the kind's default.
    pub fn description(&self) -> Option<&'static str> {
        let description = match self {
            Self::InvalidRedirectUri => {
                "The redirect URI does not match the registered client domain"
            }
            Self::CodeChallengeRequired => "PKCE is required. code_challenge is missing",
            Self::UnsupportedCodeChallengeMethod => "Selected code_challenge_method not supported",
            Self::InvalidCodeChallengeLen => {
                "Code challenge length must be between 43 and 128 characters long"
            }
            Self::MissingCodeVerifier => "PKCE code_verifier is missing",
            Self::InvalidCodeChallenge => "PKCE code_verifier does not match the code_challenge",
            _ => return self.kind().map(|kind| kind.description()),
        };
        Some(description)
    }

    /// Whether this is a backend/generator/internal failure.
    pub fn is_internal(&self) -> bool {
        self.kind().is_none()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::Protocol(kind)
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
