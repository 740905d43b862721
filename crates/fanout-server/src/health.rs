//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::hub::HubStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Envelopes fanned out so far.
    pub envelopes_distributed: u64,
}

/// Build a health response from hub statistics.
pub fn health_check(start_time: Instant, stats: &HubStats) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        envelopes_distributed: stats.distributed,
    }
}
