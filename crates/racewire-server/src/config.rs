//! Runtime server configuration.

use std::time::Duration;

use racewire_settings::RacewireSettings;

/// Everything the server and its tasks need, with durations resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Upper bound on flushing and closing one connection at shutdown.
    pub close_timeout: Duration,
    /// Upper bound on a single enqueue to one subscriber.
    pub send_timeout: Duration,
    /// Outbound frames buffered per subscriber.
    pub queue_capacity: usize,
    pub max_bind_retries: u32,
    pub bind_retry_delay: Duration,
    /// Grace period for background tasks after shutdown is requested.
    pub shutdown_grace: Duration,
    pub target_rate_hz: f64,
    pub no_clients_rate_hz: f64,
    pub not_connected_rate_hz: f64,
    pub session_poll_interval: Duration,
}

impl ServerConfig {
    pub fn from_settings(settings: &RacewireSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            ping_interval: Duration::from_millis(server.ping_interval_ms),
            ping_timeout: Duration::from_millis(server.ping_timeout_ms),
            close_timeout: Duration::from_millis(server.close_timeout_ms),
            send_timeout: Duration::from_millis(server.send_timeout_ms),
            queue_capacity: server.queue_capacity.max(1),
            max_bind_retries: server.max_bind_retries,
            bind_retry_delay: Duration::from_millis(server.bind_retry_delay_ms),
            shutdown_grace: Duration::from_millis(server.shutdown_grace_ms),
            target_rate_hz: settings.broadcast.target_rate_hz,
            no_clients_rate_hz: settings.broadcast.no_clients_rate_hz,
            not_connected_rate_hz: settings.broadcast.not_connected_rate_hz,
            session_poll_interval: Duration::from_millis(settings.session.poll_interval_ms),
        }
    }

    /// `host:port` as passed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn target_period(&self) -> Duration {
        period(self.target_rate_hz)
    }

    pub fn no_clients_period(&self) -> Duration {
        period(self.no_clients_rate_hz)
    }

    pub fn not_connected_period(&self) -> Duration {
        period(self.not_connected_rate_hz)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&RacewireSettings::default())
    }
}

/// Period of a rate in Hz. Non-positive rates fall back to one second.
pub fn period(rate_hz: f64) -> Duration {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Duration::from_secs_f64(1.0 / rate_hz)
    } else {
        Duration::from_secs(1)
    }
}
