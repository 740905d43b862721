//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared by the hub modules.

/// WebSocket connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "fanout_connections_total";
/// WebSocket connections torn down (counter).
pub const DISCONNECTIONS_TOTAL: &str = "fanout_disconnections_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "fanout_connections_active";
/// Failed protocol upgrades (counter).
pub const UPGRADE_FAILURES_TOTAL: &str = "fanout_upgrade_failures_total";
/// Envelopes accepted onto the broadcast queue (counter, labels: kind).
pub const ENVELOPES_ENQUEUED_TOTAL: &str = "fanout_envelopes_enqueued_total";
/// Envelopes rejected by a full or closed queue (counter).
pub const ENVELOPES_DROPPED_TOTAL: &str = "fanout_envelopes_dropped_total";
/// Frames handed to recipients (counter).
pub const DELIVERIES_TOTAL: &str = "fanout_deliveries_total";
/// Recipients dropped after a failed write (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "fanout_delivery_failures_total";
/// Lifetime of a connection in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "fanout_connection_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case_and_prefixed() {
        let names = [
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            UPGRADE_FAILURES_TOTAL,
            ENVELOPES_ENQUEUED_TOTAL,
            ENVELOPES_DROPPED_TOTAL,
            DELIVERIES_TOTAL,
            DELIVERY_FAILURES_TOTAL,
            CONNECTION_DURATION_SECONDS,
        ];
        for name in names {
            assert!(name.starts_with("fanout_"), "{name} missing prefix");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
