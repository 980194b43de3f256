//! Admin API for client registration
//!
//! Runs on a separate listener and is guarded by a static bearer token.
//! Client secrets are accepted on registration but never returned.
//!
//! Endpoints:
//! - GET    /admin/clients: list registered clients
//! - POST   /admin/clients: register or replace a client
//! - DELETE /admin/clients/{id}: remove a client

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use common::Secret;
use oauth2_core::Client;
use oauth2_store::ClientRegistry;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    clients: Arc<ClientRegistry>,
    token: Arc<Secret<String>>,
}

impl AdminState {
    pub fn new(clients: Arc<ClientRegistry>, token: Secret<String>) -> Self {
        Self {
            clients,
            token: Arc::new(token),
        }
    }
}

/// Build the admin router with the token guard applied to every route.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/clients", get(list_clients).post(register_client))
        .route("/admin/clients/{id}", delete(delete_client))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

async fn require_token(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| state.token.matches(token));
    if !authorized {
        warn!(path = %request.uri().path(), "admin request rejected");
        return Error::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Public view of a client. The secret is reduced to a flag.
fn client_view(client: &Client) -> serde_json::Value {
    serde_json::json!({
        "id": client.id,
        "domain": client.domain,
        "public": client.public,
        "scopes": client.scopes,
        "has_secret": client.secret.as_ref().is_some_and(|s| !s.is_empty()),
    })
}

/// GET /admin/clients
async fn list_clients(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let clients: Vec<_> = state.clients.list().iter().map(client_view).collect();
    Json(serde_json::json!({ "clients": clients }))
}

#[derive(Deserialize)]
struct RegisterClient {
    id: String,
    #[serde(default)]
    secret: Option<Secret<String>>,
    domain: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    scopes: Vec<String>,
}

impl RegisterClient {
    fn into_client(self) -> Result<Client> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidClient("id must not be empty".into()));
        }
        let domain_ok = url::Url::parse(&self.domain)
            .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.has_host());
        if !domain_ok {
            return Err(Error::InvalidClient(format!(
                "domain must be an http:// or https:// URL, got: {}",
                self.domain
            )));
        }
        if !self.public && self.secret.as_ref().is_none_or(Secret::is_empty) {
            return Err(Error::InvalidClient(
                "confidential clients need a secret".into(),
            ));
        }
        Ok(Client {
            id: self.id,
            secret: self.secret,
            domain: self.domain,
            public: self.public,
            scopes: self.scopes,
        })
    }
}

/// POST /admin/clients
async fn register_client(
    State(state): State<AdminState>,
    Json(body): Json<RegisterClient>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let client = body.into_client()?;
    let view = client_view(&client);
    let id = client.id.clone();
    state.clients.set(client).await?;
    info!(client_id = %id, "client registered");
    Ok((StatusCode::CREATED, Json(view)))
}

/// DELETE /admin/clients/{id}
async fn delete_client(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    match state.clients.remove(&id).await? {
        Some(_) => {
            info!(client_id = %id, "client removed");
            Ok(Json(serde_json::json!({ "id": id, "status": "removed" })))
        }
        None => Err(Error::NotFound(id)),
    }
}
