//! OAuth2 Authorization Server
//!
//! Single-binary service that:
//! 1. Loads clients, users and token lifetimes from TOML
//! 2. Serves the authorize, token and validate endpoints
//! 3. Keeps tokens in an in-memory KV store swept for expired keys
//! 4. Exposes client registration on a separate admin listener
//!
//! The resource owner's identity comes from the `server.user_header` request
//! header. Deploy the public listener only behind a login proxy that sets
//! this header and removes any client-supplied copy.

mod admin;
mod config;
mod error;
mod metrics;
mod oauth;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use oauth2_manage::Manager;
use oauth2_server::Server;
use oauth2_store::{ClientRegistry, KvTokenStore, MemoryKv};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::oauth::OAuthState;

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    oauth: OAuthState,
    clients: Arc<ClientRegistry>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the public router.
///
/// The concurrency limit caps in-flight requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth/authorize", get(authorize_handler).post(authorize_handler))
        .route("/oauth/token", get(token_handler).post(token_handler))
        .route("/oauth/validate", get(validate_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the engine to the registry, the token store and the config-driven
/// hooks.
async fn build_state(
    config: &Config,
    prometheus: PrometheusHandle,
) -> Result<(AppState, Arc<MemoryKv>)> {
    let clients = match &config.store.clients_path {
        Some(path) => ClientRegistry::load(path.clone())
            .await
            .with_context(|| format!("failed to load client registry from {}", path.display()))?,
        None => ClientRegistry::new(),
    };
    let clients = Arc::new(clients);
    for client in &config.clients {
        clients.insert(client.to_client());
    }

    let kv = Arc::new(MemoryKv::new());
    let tokens = Arc::new(KvTokenStore::with_namespace(
        kv.clone(),
        config.store.namespace.clone(),
    ));
    let manager = Manager::new(clients.clone(), tokens).with_config(config.tokens.clone());

    let mut server = Server::new(config.oauth2.clone(), Arc::new(manager));

    let user_header = HeaderName::try_from(config.server.user_header.as_str())
        .with_context(|| format!("invalid user_header {}", config.server.user_header))?;
    server.set_user_authorization_handler(move |req| {
        Ok(req
            .headers
            .get(&user_header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned))
    });

    let users: HashMap<String, (Secret<String>, String)> = config
        .users
        .iter()
        .filter_map(|u| {
            let password = u.password.clone()?;
            Some((u.username.clone(), (password, u.subject().to_owned())))
        })
        .collect();
    server.set_password_authorization_handler(move |_client_id, username, password| {
        Ok(users
            .get(username)
            .filter(|(secret, _)| secret.matches(password))
            .map(|(_, subject)| subject.clone()))
    });

    let registry = clients.clone();
    server.set_client_scope_handler(move |tgr| {
        Ok(registry
            .get(&tgr.client_id)
            .is_some_and(|client| client.allows_scope(&tgr.scope)))
    });

    server.set_response_error_handler(|rendered| metrics::record_error(rendered.error.as_str()));

    let state = AppState {
        oauth: OAuthState {
            server: Arc::new(server),
            login_url: config.server.login_url.as_deref().map(Arc::from),
        },
        clients,
        prometheus,
        started_at: Instant::now(),
    };
    Ok((state, kv))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting authorization-server");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin = config.admin.listen_addr.is_some(),
        clients = config.clients.len(),
        users = config.users.len(),
        force_pkce = config.oauth2.force_pkce,
        "configuration loaded"
    );

    let (state, kv) = build_state(&config, prometheus_handle).await?;
    let sweeper = oauth2_store::spawn_sweeper(
        kv,
        Duration::from_secs(config.store.sweep_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let admin_handle = match (config.admin.listen_addr, config.admin.token.clone()) {
        (Some(addr), Some(token)) => {
            let admin_app =
                admin::build_admin_router(admin::AdminState::new(state.clients.clone(), token));
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {addr}"))?;
            info!(addr = %addr, "admin listener ready");
            Some(tokio::spawn(serve(listener, admin_app, shutdown_rx.clone())))
        }
        _ => None,
    };

    let listen_addr = config.server.listen_addr;
    let app = build_router(state, config.server.max_connections);
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let server_handle = tokio::spawn(serve(listener, app, shutdown_rx));

    shutdown_signal().await;

    // Both listeners stop accepting and drain; the timer starts at signal receipt
    let _ = shutdown_tx.send(());
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        log_exit("public", server_handle.await);
        if let Some(handle) = admin_handle {
            log_exit("admin", handle.await);
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        );
    }

    sweeper.abort();
    info!("shutdown complete");
    Ok(())
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<()>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

fn log_exit(
    listener: &str,
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => info!(listener, "all in-flight requests drained"),
        Ok(Err(e)) => error!(listener, error = %e, "server error during shutdown"),
        Err(e) => error!(listener, error = %e, "server task panicked"),
    }
}

async fn authorize_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    oauth::authorize(&state.oauth, method, &uri, headers, &body).await
}

async fn token_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    oauth::token(&state.oauth, method, &uri, headers, &body).await
}

async fn validate_handler(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    oauth::validate(&state.oauth, &uri, headers).await
}

/// Health endpoint: status, uptime and the number of registered clients.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "clients": state.clients.len(),
    });
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
