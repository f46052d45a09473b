//! Listener, keep-alive and shutdown settings.

use serde::{Deserialize, Serialize};

/// Server network and runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket and HTTP port.
    pub port: u16,
    /// Interval between transport-level pings.
    pub ping_interval_ms: u64,
    /// How long to wait for a pong before dropping the connection.
    pub ping_timeout_ms: u64,
    /// Upper bound on the closing handshake during shutdown.
    pub close_timeout_ms: u64,
    /// Upper bound on a single enqueue to one subscriber.
    pub send_timeout_ms: u64,
    /// Outbound frames buffered per subscriber.
    pub queue_capacity: usize,
    /// Bind attempts after the first when the address is in use.
    pub max_bind_retries: u32,
    /// Fixed delay between bind attempts.
    pub bind_retry_delay_ms: u64,
    /// Grace period for tasks to finish after shutdown is requested.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8766,
            ping_interval_ms: 10_000,
            ping_timeout_ms: 5_000,
            close_timeout_ms: 2_000,
            send_timeout_ms: 1_000,
            queue_capacity: 256,
            max_bind_retries: 5,
            bind_retry_delay_ms: 5_000,
            shutdown_grace_ms: 5_000,
        }
    }
}
