//! Synthetic provider for demos and tests.
//!
//! Drives a single car around a fixed-length lap. Connectivity, the in-sim
//! session counter and the session clock can be steered through a
//! [`SimulatedControl`] held by the caller.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::errors::{Result, SourceError};
use crate::provider::{FieldValue, Provider};

#[derive(Debug)]
struct ControlState {
    connected: AtomicBool,
    session_num: AtomicI32,
    session_unique_id: AtomicI32,
    epoch: Mutex<Instant>,
    frozen_time: Mutex<Option<f64>>,
}

/// Shared handle that steers a [`SimulatedProvider`].
#[derive(Clone, Debug)]
pub struct SimulatedControl {
    state: Arc<ControlState>,
}

impl Default for SimulatedControl {
    fn default() -> Self {
        Self {
            state: Arc::new(ControlState {
                connected: AtomicBool::new(true),
                session_num: AtomicI32::new(0),
                session_unique_id: AtomicI32::new(1),
                epoch: Mutex::new(Instant::now()),
                frozen_time: Mutex::new(None),
            }),
        }
    }
}

impl SimulatedControl {
    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Start a fresh in-sim session: clock back to zero, counter reset, new
    /// provider session id.
    pub fn restart_session(&self) {
        *self.state.epoch.lock() = Instant::now();
        self.state.session_num.store(0, Ordering::SeqCst);
        let _ = self.state.session_unique_id.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_session_num(&self, num: i32) {
        self.state.session_num.store(num, Ordering::SeqCst);
    }

    /// Pin the session clock to a fixed value, or `None` to follow wall time.
    pub fn freeze_session_time(&self, secs: Option<f64>) {
        *self.state.frozen_time.lock() = secs;
    }

    fn session_time(&self) -> f64 {
        if let Some(t) = *self.state.frozen_time.lock() {
            return t;
        }
        self.state.epoch.lock().elapsed().as_secs_f64()
    }
}

/// Point-in-time state of the simulated car.
struct CarState {
    session_time: f64,
    speed: f64,
    rpm: f64,
    gear: i32,
    throttle: f64,
    brake: f64,
    steering: f64,
    yaw: f64,
    lap: i32,
    lap_completed: i32,
    lap_current: f64,
}

pub struct SimulatedProvider {
    control: SimulatedControl,
    lap_secs: f64,
    initialized: bool,
}

impl SimulatedProvider {
    pub fn new(lap_secs: f64) -> Self {
        Self::with_control(lap_secs, SimulatedControl::default())
    }

    pub fn with_control(lap_secs: f64, control: SimulatedControl) -> Self {
        Self {
            control,
            lap_secs: if lap_secs > 0.0 { lap_secs } else { 90.0 },
            initialized: false,
        }
    }

    pub fn control(&self) -> SimulatedControl {
        self.control.clone()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn car(&self) -> CarState {
        let t = self.control.session_time();
        let completed = (t / self.lap_secs).floor();
        let lap_current = t - completed * self.lap_secs;
        let phase = lap_current / self.lap_secs;

        // Two straights and two corners per lap.
        let wave = (2.0 * TAU * phase).cos();
        let speed = 45.0 + 25.0 * wave;
        let gear = (1.0 + speed / 14.0).floor().clamp(1.0, 6.0);
        let rpm = 2_500.0 + (speed * 3.6 * 42.0) % 4_800.0;
        let throttle = ((wave + 1.0) / 2.0).clamp(0.0, 1.0);
        let brake = if wave < -0.6 { -wave - 0.6 } else { 0.0 };
        let steering = (2.0 * TAU * phase).sin() * 0.4;

        CarState {
            session_time: t,
            speed,
            rpm,
            gear: gear as i32,
            throttle,
            brake,
            steering,
            yaw: TAU * phase - std::f64::consts::PI,
            lap: completed as i32 + 1,
            lap_completed: completed as i32,
            lap_current,
        }
    }
}

impl Provider for SimulatedProvider {
    fn startup(&mut self) -> Result<()> {
        if !self.control.is_connected() {
            return Err(SourceError::NotRunning);
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn field(&self, name: &str) -> Result<FieldValue> {
        if !self.initialized || !self.control.is_connected() {
            return Err(SourceError::NotRunning);
        }
        let car = self.car();
        let float = |v: f64| FieldValue::Float(v as f32);
        let has_lap = car.lap_completed > 0;
        Ok(match name {
            "SessionTime" => FieldValue::Double(car.session_time),
            "SessionTick" => FieldValue::Int((car.session_time * 60.0) as i32),
            "SessionNum" => FieldValue::Int(self.control.state.session_num.load(Ordering::SeqCst)),
            "SessionState" => FieldValue::Int(4),
            "SessionUniqueID" => {
                FieldValue::Int(self.control.state.session_unique_id.load(Ordering::SeqCst))
            }
            "Speed" => float(car.speed),
            "Yaw" => float(car.yaw),
            "LapBestLap" => FieldValue::Int(if has_lap { 1 } else { 0 }),
            "LapBestLapTime" | "LapLastLapTime" => {
                float(if has_lap { self.lap_secs } else { -1.0 })
            }
            "LapCurrentLapTime" => float(car.lap_current),
            "SteeringWheelAngle" => float(car.steering),
            "Throttle" => float(car.throttle),
            "Brake" => float(car.brake),
            "Clutch" => float(0.0),
            "Gear" => FieldValue::Int(car.gear),
            "RPM" => float(car.rpm),
            "Lap" => FieldValue::Int(car.lap),
            "LapCompleted" => FieldValue::Int(car.lap_completed),
            "IsOnTrack" => FieldValue::Bool(true),
            other => return Err(SourceError::MissingField(other.to_string())),
        })
    }

    fn session_section(&self, name: &str) -> Result<Value> {
        if !self.initialized || !self.control.is_connected() {
            return Err(SourceError::NotRunning);
        }
        let unique_id = self.control.state.session_unique_id.load(Ordering::SeqCst);
        Ok(match name {
            "WeekendInfo" => json!({
                "TrackName": "racewire_ring",
                "TrackDisplayName": "Racewire Ring",
                "TrackLength": "4.20 km",
                "EventType": "Test",
                "SessionID": unique_id,
            }),
            "SessionInfo" => json!({
                "Sessions": [{
                    "SessionNum": self.control.state.session_num.load(Ordering::SeqCst),
                    "SessionType": "Practice",
                    "SessionLaps": "unlimited",
                }]
            }),
            "CarSetup" => json!({ "UpdateCount": 1 }),
            "DriverInfo" => json!({
                "DriverCarIdx": 0,
                "Drivers": [{
                    "CarIdx": 0,
                    "UserName": "Sim Driver",
                    "CarScreenName": "Simulated GT",
                }]
            }),
            other => return Err(SourceError::MissingSection(other.to_string())),
        })
    }
}
