//! Prometheus recorder and the metric names this crate emits.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything records a metric. The returned
/// handle renders the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules. Gateway-side names
// live in `courier_gateway::metric`.

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "courier_ws_connections_total";
/// WebSocket disconnections (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "courier_ws_disconnections_total";
/// Currently connected WebSocket clients (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "courier_ws_connections_active";
/// Commands dispatched (counter, labels: action).
pub const WS_COMMANDS_TOTAL: &str = "courier_ws_commands_total";
/// Commands that produced an error payload (counter, labels: action, code).
pub const WS_COMMAND_ERRORS_TOTAL: &str = "courier_ws_command_errors_total";
/// Command handling duration (histogram, labels: action).
pub const WS_COMMAND_DURATION_SECONDS: &str = "courier_ws_command_duration_seconds";
/// Outbound frames dropped on a full client channel (counter).
pub const WS_DROPPED_FRAMES_TOTAL: &str = "courier_ws_dropped_frames_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders() {
        // Build a local recorder; installing the global one would conflict
        // across tests.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_COMMANDS_TOTAL,
            WS_COMMAND_ERRORS_TOTAL,
            WS_COMMAND_DURATION_SECONDS,
            WS_DROPPED_FRAMES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
