//! `BridgeServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocket;
use axum::extract::{Request, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use chatbridge_core::config::BridgeConfig;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::health::HealthResponse;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::proxy;
use crate::ws::session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Settings for the upstream gateway link.
    pub bridge_config: Arc<BridgeConfig>,
    /// Listener settings.
    pub server_config: Arc<ServerConfig>,
    /// Cancelled on shutdown; every session and upstream connector
    /// watches a child of it.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Currently connected bridge clients.
    pub connections: Arc<AtomicUsize>,
    /// Client for proxied REST calls to the gateway.
    pub http_client: reqwest::Client,
    /// Renders `/metrics`; absent when no recorder was installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The bridge server.
pub struct BridgeServer {
    state: AppState,
}

impl BridgeServer {
    /// Create a new server.
    pub fn new(server_config: ServerConfig, bridge_config: BridgeConfig) -> Self {
        Self {
            state: AppState {
                bridge_config: Arc::new(bridge_config),
                server_config: Arc::new(server_config),
                shutdown: CancellationToken::new(),
                start_time: Instant::now(),
                connections: Arc::new(AtomicUsize::new(0)),
                http_client: reqwest::Client::new(),
                metrics_handle: None,
            },
        }
    }

    /// Attach a Prometheus handle, enabling the `/metrics` endpoint.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/{*path}", any(proxy_handler));
        if let Some(dir) = &self.state.server_config.ui_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }
        router
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task
    /// handle. The task finishes once the shutdown token is cancelled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind(self.state.server_config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.state.shutdown.clone();
        info!(%addr, upstream = %self.state.bridge_config.upstream_ws_url(), "bridge server listening");
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Token that fires when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Shut down: cancel every session, then wait up to `grace` for the
    /// serve task to drain its connections.
    pub async fn shutdown(&self, serve_handle: JoinHandle<()>, grace: Duration) {
        self.state.shutdown.cancel();
        info!(grace_secs = grace.as_secs(), "draining bridge sessions");
        if tokio::time::timeout(grace, serve_handle).await.is_err() {
            warn!("shutdown grace period elapsed with sessions still open");
        }
    }

    /// Get the listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.server_config
    }

    /// Get the upstream gateway configuration.
    pub fn bridge_config(&self) -> &BridgeConfig {
        &self.state.bridge_config
    }
}

/// GET /ws — upgrade and hand the socket to a bridge session.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let client_id = format!("client_{}", Uuid::now_v7());
    ws.max_message_size(state.server_config.max_message_size)
        .on_upgrade(move |socket| handle_socket(state, socket, client_id))
}

async fn handle_socket(state: AppState, socket: WebSocket, client_id: String) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    let _ = state.connections.fetch_add(1, Ordering::Relaxed);

    session::run_bridge_session(
        socket,
        client_id,
        state.bridge_config.clone(),
        state.shutdown.clone(),
    )
    .await;

    let _ = state.connections.fetch_sub(1, Ordering::Relaxed);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.bridge_config.upstream_ws_url(),
    ))
}

/// GET /metrics — Prometheus exposition, or 404 when no recorder exists.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

/// ANY /api/{*path} — transparent proxy to the gateway's REST surface.
async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    proxy::forward_or_bad_gateway(
        &state.http_client,
        &state.bridge_config.upstream_http_url(),
        req,
    )
    .await
}
