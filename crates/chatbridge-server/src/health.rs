//! Health endpoint payload.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Response body for `GET /health`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` — the process is alive if it can answer at all.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Number of currently connected bridge clients.
    pub connections: usize,
    /// Upstream gateway target, for operator orientation.
    pub upstream: String,
}

impl HealthResponse {
    /// Build a health snapshot.
    #[must_use]
    pub fn snapshot(start_time: Instant, connections: usize, upstream: String) -> Self {
        Self {
            status: "ok".to_owned(),
            uptime_secs: start_time.elapsed().as_secs(),
            connections,
            upstream,
        }
    }
}
