//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Fails if another recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections dropped for a missing pong (counter).
pub const WS_KEEPALIVE_TIMEOUTS_TOTAL: &str = "ws_keepalive_timeouts_total";
/// Socket writes abandoned because the peer stopped reading (counter).
pub const WS_STALLED_WRITES_TOTAL: &str = "ws_stalled_writes_total";
/// Heartbeats answered (counter).
pub const WS_HEARTBEATS_TOTAL: &str = "ws_heartbeats_total";
/// Registered subscribers (gauge).
pub const SUBSCRIBERS_ACTIVE: &str = "subscribers_active";
/// Frames broadcast (counter, labels: kind).
pub const BROADCAST_FRAMES_TOTAL: &str = "broadcast_frames_total";
/// Per-subscriber deliveries (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "broadcast_deliveries_total";
/// Subscribers pruned after a failed send (counter).
pub const BROADCAST_PRUNED_TOTAL: &str = "broadcast_pruned_total";
/// Time spent in one sampler tick (histogram).
pub const SAMPLER_TICK_SECONDS: &str = "sampler_tick_seconds";
/// Ticks that broadcast nothing (counter, labels: reason).
pub const SAMPLER_SKIPPED_TOTAL: &str = "sampler_skipped_total";
/// Session state transitions (counter, labels: kind).
pub const SESSION_TRANSITIONS_TOTAL: &str = "session_transitions_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders() {
        // Not installed globally so tests stay independent.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(BROADCAST_FRAMES_TOTAL, "kind" => "telemetry").increment(2);
        });
        let output = handle.render();
        assert!(output.contains("broadcast_frames_total"));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_KEEPALIVE_TIMEOUTS_TOTAL,
            WS_STALLED_WRITES_TOTAL,
            WS_HEARTBEATS_TOTAL,
            SUBSCRIBERS_ACTIVE,
            BROADCAST_FRAMES_TOTAL,
            BROADCAST_DELIVERIES_TOTAL,
            BROADCAST_PRUNED_TOTAL,
            SAMPLER_TICK_SECONDS,
            SAMPLER_SKIPPED_TOTAL,
            SESSION_TRANSITIONS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
