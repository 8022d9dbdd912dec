//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Client WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Client WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active client WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upstream connect attempts total (counter).
pub const UPSTREAM_CONNECTS_TOTAL: &str = "upstream_connects_total";
/// Upstream reconnect timer expirations total (counter).
pub const UPSTREAM_RECONNECTS_TOTAL: &str = "upstream_reconnects_total";
/// Frames relayed client-to-upstream total (counter).
pub const FRAMES_CLIENT_TO_UPSTREAM_TOTAL: &str = "frames_client_to_upstream_total";
/// Frames relayed upstream-to-client total (counter).
pub const FRAMES_UPSTREAM_TO_CLIENT_TOTAL: &str = "frames_upstream_to_client_total";
/// Status notifications injected total (counter, labels: state).
pub const STATUS_NOTIFICATIONS_TOTAL: &str = "status_notifications_total";
/// Buffered frames flushed per upstream open (histogram).
pub const PENDING_FLUSH_FRAMES: &str = "pending_flush_frames";
/// Proxied HTTP requests total (counter, labels: method).
pub const PROXY_REQUESTS_TOTAL: &str = "proxy_requests_total";
/// Proxied HTTP request failures total (counter).
pub const PROXY_ERRORS_TOTAL: &str = "proxy_errors_total";
