//! Sampling, session detection and telemetry source settings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Broadcast tick rates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Tick rate while subscribers are connected and the source is live.
    pub target_rate_hz: f64,
    /// Idle rate while nobody is subscribed.
    pub no_clients_rate_hz: f64,
    /// Idle rate while the source is not connected.
    pub not_connected_rate_hz: f64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            target_rate_hz: 60.0,
            no_clients_rate_hz: 2.0,
            not_connected_rate_hz: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub poll_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

/// Which provider backs the source adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live shared memory of a running sim.
    #[default]
    Irsdk,
    /// A captured shared-memory image on disk.
    Dump,
    /// Synthetic laps.
    Simulated,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "irsdk" => Ok(Self::Irsdk),
            "dump" => Ok(Self::Dump),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Irsdk => "irsdk",
            Self::Dump => "dump",
            Self::Simulated => "simulated",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Image file read by the `dump` source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_path: Option<String>,
    /// Multiplier applied to the provider's speed (m/s to km/h by default).
    pub speed_factor: f32,
    /// Lap length of the simulated source, in seconds.
    pub simulated_lap_secs: f64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::Irsdk,
            dump_path: None,
            speed_factor: 3.6,
            simulated_lap_secs: 90.0,
        }
    }
}
