//! Telemetry samples, restart markers and session metadata read from a provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionToken;

/// Elapsed session time (seconds) below which a zeroed session counter is read
/// as a fresh in-sim session.
pub const RESTART_ELAPSED_THRESHOLD: f64 = 1.0;

/// One point-in-time reading of vehicle and session state.
///
/// Field names on the wire are the provider's variable names, so a dashboard
/// written against the raw SDK can consume frames unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(rename = "UniqueSessionID")]
    pub session: Option<SessionToken>,
    #[serde(rename = "SessionTime")]
    pub session_time: f64,
    #[serde(rename = "SessionTick")]
    pub session_tick: i32,
    #[serde(rename = "SessionNum")]
    pub session_num: i32,
    #[serde(rename = "SessionState")]
    pub session_state: i32,
    #[serde(rename = "SessionUniqueID")]
    pub session_unique_id: i32,
    /// km/h after unit conversion.
    #[serde(rename = "Speed")]
    pub speed: f32,
    #[serde(rename = "Yaw")]
    pub yaw: f32,
    #[serde(rename = "LapBestLap")]
    pub lap_best_lap: i32,
    #[serde(rename = "LapBestLapTime")]
    pub lap_best_lap_time: f32,
    #[serde(rename = "LapLastLapTime")]
    pub lap_last_lap_time: f32,
    #[serde(rename = "LapCurrentLapTime")]
    pub lap_current_lap_time: f32,
    #[serde(rename = "SteeringWheelAngle")]
    pub steering_wheel_angle: f32,
    #[serde(rename = "Throttle")]
    pub throttle: f32,
    #[serde(rename = "Brake")]
    pub brake: f32,
    #[serde(rename = "Clutch")]
    pub clutch: f32,
    #[serde(rename = "Gear")]
    pub gear: i32,
    #[serde(rename = "RPM")]
    pub rpm: f32,
    #[serde(rename = "Lap")]
    pub lap: i32,
    #[serde(rename = "LapCompleted")]
    pub lap_completed: i32,
    /// Capture time, ISO-8601 local.
    pub timestamp: String,
}

/// In-stream values used to spot a session restart without a provider id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionMarkers {
    pub lap_number: i32,
    /// Seconds since the in-sim session began.
    pub elapsed_time: f64,
}

impl SessionMarkers {
    /// Counter back at zero and less than a second elapsed.
    pub fn indicates_restart(&self) -> bool {
        self.lap_number == 0 && self.elapsed_time < RESTART_ELAPSED_THRESHOLD
    }
}

/// Race, session, car and driver description carried by lifecycle events.
///
/// The section trees are passed through from the provider's session string
/// without interpretation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(rename = "UniqueSessionID")]
    pub session: SessionToken,
    #[serde(rename = "RaceInfo")]
    pub race_info: Value,
    #[serde(rename = "SessionInfo")]
    pub session_info: Value,
    #[serde(rename = "CarInfo")]
    pub car_info: Value,
    #[serde(rename = "DriverInfo")]
    pub driver_info: Value,
    pub timestamp: String,
}
