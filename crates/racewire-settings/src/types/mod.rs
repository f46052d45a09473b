//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section implements [`Default`]
//! and is `#[serde(default)]`, so a partial file fills in the rest.

mod logging;
mod server;
mod stream;

pub use logging::*;
pub use server::*;
pub use stream::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "broadcast": { "targetRateHz": 30.0 },
///   "source": { "kind": "simulated" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RacewireSettings {
    pub server: ServerSettings,
    pub broadcast: BroadcastSettings,
    pub session: SessionSettings,
    pub source: SourceSettings,
    pub logging: LoggingSettings,
}

impl RacewireSettings {
    /// Reject values that would stall or spin the periodic loops.
    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("broadcast.targetRateHz", self.broadcast.target_rate_hz),
            ("broadcast.noClientsRateHz", self.broadcast.no_clients_rate_hz),
            (
                "broadcast.notConnectedRateHz",
                self.broadcast.not_connected_rate_hz,
            ),
        ];
        for (name, rate) in rates {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} must be a positive number, got {rate}"
                )));
            }
        }
        if self.session.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "session.pollIntervalMs must be greater than zero".into(),
            ));
        }
        if self.server.ping_interval_ms == 0 || self.server.ping_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server ping interval and timeout must be greater than zero".into(),
            ));
        }
        if self.server.send_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.server.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.queueCapacity must be greater than zero".into(),
            ));
        }
        if self.source.kind == SourceKind::Dump && self.source.dump_path.is_none() {
            return Err(SettingsError::InvalidValue(
                "source.dumpPath is required when source.kind is \"dump\"".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RacewireSettings::default().validate().unwrap();
    }

    #[test]
    fn zero_rate_rejected() {
        let mut settings = RacewireSettings::default();
        settings.broadcast.target_rate_hz = 0.0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("targetRateHz"));
    }

    #[test]
    fn nan_rate_rejected() {
        let mut settings = RacewireSettings::default();
        settings.broadcast.no_clients_rate_hz = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn dump_source_needs_path() {
        let mut settings = RacewireSettings::default();
        settings.source.kind = SourceKind::Dump;
        assert!(settings.validate().is_err());
        settings.source.dump_path = Some("/tmp/irsdk.bin".into());
        settings.validate().unwrap();
    }

    #[test]
    fn zero_queue_rejected() {
        let mut settings = RacewireSettings::default();
        settings.server.queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn serializes_camel_case_sections() {
        let value = serde_json::to_value(RacewireSettings::default()).unwrap();
        assert_eq!(value["server"]["port"], 8766);
        assert_eq!(value["server"]["pingIntervalMs"], 10_000);
        assert_eq!(value["broadcast"]["targetRateHz"], 60.0);
        assert_eq!(value["session"]["pollIntervalMs"], 1000);
        assert_eq!(value["source"]["kind"], "irsdk");
        assert_eq!(value["logging"]["format"], "pretty");
    }
}
