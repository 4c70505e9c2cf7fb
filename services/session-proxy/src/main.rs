//! Taskboard session proxy
//!
//! Local HTTP service that owns one process's view of the shared taskboard
//! session:
//! 1. Opens the shared credential file and watches it for other processes
//! 2. Mirrors the session in memory (`/session`, `/health`)
//! 3. Signs in and out against the backend (`/session/login`, `/session/logout`)
//! 4. Forwards every other request to the backend with the session's access
//!    token, refreshing it transparently on 401

mod config;
mod error;
mod metrics;
mod proxy;
mod service;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use auth_client::{Dispatcher, RefreshCoordinator};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use session_store::{CredentialStore, Session, SessionMirror, SessionStatus, watch_store};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::proxy::ProxyState;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    metrics: ServiceMetrics,
    session: watch::Receiver<Session>,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn dispatcher(&self) -> &Dispatcher {
        &self.proxy.dispatcher
    }

    fn store(&self) -> &Arc<CredentialStore> {
        self.proxy.dispatcher.store()
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently handled requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session", get(session_handler))
        .route("/session/login", post(login_handler))
        .route("/session/logout", post(logout_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL wins over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-proxy");

    // Installed before anything emits metrics
    let prometheus_handle = metrics::install_recorder()?;

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
        listen_addr = %config.proxy.listen_addr,
        base_url = %config.api.base_url,
        store_path = %config.session.store_path.display(),
        refresh_cooldown_ms = config.api.refresh_cooldown_ms,
        "configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::open(config.session.store_path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to open credential store {}",
                    config.session.store_path.display()
                )
            })?,
    );
    let _watcher = watch_store(store.clone()).context("failed to watch credential store")?;
    let mirror = SessionMirror::spawn(store.clone());

    let http_client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let coordinator = Arc::new(RefreshCoordinator::new(
        store.clone(),
        http_client.clone(),
        config.api.base_url.clone(),
        config.refresh_cooldown(),
    ));
    let dispatcher = Dispatcher::new(
        http_client,
        config.api.base_url.clone(),
        store,
        coordinator,
        config.request_timeout(),
    );

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        proxy: ProxyState {
            dispatcher,
            requests_total: metrics.requests_total.clone(),
            errors_total: metrics.errors_total.clone(),
            in_flight: metrics.in_flight.clone(),
        },
        metrics: metrics.clone(),
        session: mirror.subscribe(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => {
            let remaining = metrics.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    drop(mirror);
    info!("shutdown complete");
    Ok(())
}

/// Returns 200 while the mirrored session is authenticated, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let session_status = state.session.borrow().status.clone();
    let refresh = state.dispatcher().coordinator().phase();

    let (status_code, status) = if session_status == SessionStatus::Authenticated {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = serde_json::json!({
        "status": status,
        "session": session_status.label(),
        "refresh": refresh.label(),
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Current session mirror. Tokens are never included.
async fn session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.borrow().clone();
    let redirect_to = match session.status {
        SessionStatus::LoggedOut { redirect_to } => Some(redirect_to),
        _ => None,
    };
    Json(serde_json::json!({
        "status": session.status.label(),
        "authenticated": session.is_authenticated(),
        "hydrated": session.hydrated,
        "redirect_to": redirect_to,
        "user": session.user,
    }))
}

#[instrument(skip_all, fields(request_id))]
async fn login_handler(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());

    match login(&state, &body).await {
        Ok(user) => (StatusCode::OK, Json(serde_json::json!({ "user": user }))).into_response(),
        Err(e) => {
            warn!(error = %e, "login failed");
            e.into_response(&request_id)
        }
    }
}

async fn login(state: &AppState, body: &LoginRequest) -> error::Result<session_store::UserProfile> {
    let dispatcher = state.dispatcher();
    let session = session_store::login(
        dispatcher.http_client(),
        dispatcher.base_url(),
        &body.email,
        &body.password,
    )
    .await
    .map_err(error::Error::from_login)?;

    state
        .store()
        .set_session(
            session.user.clone(),
            session.access_token,
            session.refresh_token,
        )
        .await
        .map_err(|e| error::Error::Store(e.to_string()))?;

    info!(user_id = %session.user.id, "signed in");
    Ok(session.user)
}

/// Revoke the refresh token (best effort) and clear the shared session.
#[instrument(skip_all, fields(request_id))]
async fn logout_handler(State(state): State<AppState>) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());

    let dispatcher = state.dispatcher();
    if let Some(refresh) = state.store().refresh()
        && let Err(e) =
            session_store::logout(dispatcher.http_client(), dispatcher.base_url(), &refresh).await
    {
        warn!(error = %e, "server-side logout failed, clearing local session anyway");
    }

    match state.store().clear_all().await {
        Ok(()) => {
            info!("signed out");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error::Error::Store(e.to_string()).into_response(&request_id),
    }
}

/// Catch-all handler that forwards to the backend through the dispatcher.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    proxy::proxy_request(&state.proxy, request, new_request_id()).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A signal handler that cannot be installed never fires; the other one
/// still can.
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
