//! HTTP adaptor for the OAuth2 engine
//!
//! Translates axum requests into engine [`Request`]s, runs the authorize,
//! token and validate paths, and renders the engine's outcome back into an
//! axum response. Request metrics are recorded here.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use oauth2_core::{ErrorKind, GrantType};
use oauth2_server::{ErrorResponse, Request, Response as Outcome, Server};
use tracing::{debug, instrument};

use crate::metrics;

/// Shared state for the OAuth2 endpoints
#[derive(Clone)]
pub struct OAuthState {
    pub server: Arc<Server>,
    /// Login page for unauthenticated authorization requests.
    pub login_url: Option<Arc<str>>,
}

/// GET|POST /oauth/authorize
#[instrument(skip_all, fields(method = %method))]
pub async fn authorize(
    state: &OAuthState,
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: &[u8],
) -> Response {
    let started = Instant::now();
    let req = Request::from_parts(method, headers, uri.query(), Some(body));
    let outcome = state.server.handle_authorize_request(&req).await;

    if let Some(grant_type) = issued_grant(&outcome) {
        metrics::record_token_issued(grant_type);
    }
    let response = match outcome {
        Outcome::NeedsAuthentication => login_redirect(state, &req),
        other => into_http(other),
    };
    metrics::record_request(
        "authorize",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// POST /oauth/token (GET when allowed)
#[instrument(skip_all, fields(method = %method))]
pub async fn token(
    state: &OAuthState,
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: &[u8],
) -> Response {
    let started = Instant::now();
    let req = Request::from_parts(method, headers, uri.query(), Some(body));
    let outcome = state.server.handle_token_request(&req).await;

    if outcome.status() == StatusCode::OK
        && let Some(grant_type) = GrantType::parse(req.form_value("grant_type"))
    {
        metrics::record_token_issued(grant_type.as_str());
    }
    let response = into_http(outcome);
    metrics::record_request("token", response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// GET /oauth/validate
///
/// Echoes `{client_id, user_id, scope, expires_in}` for a live bearer token.
/// `expires_in` is the remaining lifetime in seconds, 0 for tokens that never
/// expire.
pub async fn validate(state: &OAuthState, uri: &Uri, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let req = Request::from_parts(Method::GET, headers, uri.query(), None);
    let response = match state.server.validation_bearer_token(&req).await {
        Ok(info) => {
            let expires_in = info
                .access_remaining(Utc::now())
                .map_or(0, |remaining| remaining.as_secs());
            let body = serde_json::json!({
                "client_id": info.client_id,
                "user_id": info.user_id,
                "scope": info.scope,
                "expires_in": expires_in,
            });
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body.to_string(),
            )
                .into_response()
        }
        Err(err) => {
            let rendered = state.server.error_response(&err);
            let mut response = error_http(&rendered);
            if rendered.error == ErrorKind::InvalidToken {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            response
        }
    };
    metrics::record_request(
        "validate",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Send the resource owner to the login page, carrying the authorization
/// request parameters so the flow can resume.
fn login_redirect(state: &OAuthState, req: &Request) -> Response {
    let login = state
        .login_url
        .as_deref()
        .and_then(|login| url::Url::parse(login).ok());
    let Some(mut login) = login else {
        let rendered = ErrorResponse::new(ErrorKind::AccessDenied)
            .with_description("The resource owner is not logged in");
        let mut response = error_http(&rendered);
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        return response;
    };

    let mut params: Vec<_> = req.params().iter().collect();
    params.sort();
    login.query_pairs_mut().extend_pairs(params);
    debug!(login_url = %login.as_str(), "redirecting to login");
    into_http(Outcome::Redirect {
        location: login.into(),
    })
}

/// Grant type of a successful authorization redirect.
fn issued_grant(outcome: &Outcome) -> Option<&'static str> {
    let Outcome::Redirect { location } = outcome else {
        return None;
    };
    let url = url::Url::parse(location).ok()?;
    if url.query_pairs().any(|(k, _)| k == "code") {
        return Some(GrantType::AuthorizationCode.as_str());
    }
    let fragment = url.fragment()?;
    url::form_urlencoded::parse(fragment.as_bytes())
        .any(|(k, _)| k == "access_token")
        .then_some(GrantType::Implicit.as_str())
}

fn error_http(rendered: &ErrorResponse) -> Response {
    into_http(Outcome::token_json(rendered.to_map(None), rendered.status))
}

fn into_http(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Redirect { location } => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Outcome::Json {
            status,
            headers,
            body,
        } => (status, headers, serde_json::Value::Object(body).to_string()).into_response(),
        Outcome::NeedsAuthentication => StatusCode::UNAUTHORIZED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_redirect_counts_as_authorization_code() {
        let outcome = Outcome::Redirect {
            location: "http://localhost:9094/oauth2?code=abc&state=1".into(),
        };
        assert_eq!(issued_grant(&outcome), Some("authorization_code"));
    }

    #[test]
    fn token_fragment_counts_as_implicit() {
        let outcome = Outcome::Redirect {
            location: "http://localhost:9094/oauth2#access_token=abc&token_type=Bearer".into(),
        };
        assert_eq!(issued_grant(&outcome), Some("implicit"));
    }

    #[test]
    fn error_redirect_issues_nothing() {
        let outcome = Outcome::Redirect {
            location: "http://localhost:9094/oauth2?error=access_denied&state=1".into(),
        };
        assert_eq!(issued_grant(&outcome), None);
        assert_eq!(issued_grant(&Outcome::NeedsAuthentication), None);
    }

    #[test]
    fn json_outcome_keeps_status_and_headers() {
        let rendered = ErrorResponse::new(ErrorKind::InvalidClient);
        let response = error_http(&rendered);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }
}
