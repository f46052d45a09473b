//! Fail-soft facade over a [`Provider`].

use std::sync::Arc;

use parking_lot::Mutex;
use racewire_core::session::iso_timestamp;
use racewire_core::{Clock, SessionMarkers, SessionMetadata, SessionToken, TelemetrySample};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SourceError};
use crate::provider::{field_f32, field_f64, field_i32, Provider};

/// Default multiplier from the provider's m/s to km/h.
pub const DEFAULT_SPEED_FACTOR: f32 = 3.6;

/// What the session tracker and the sampler need from a telemetry source.
///
/// Every method is a synchronous point-in-time query that never fails: errors
/// are logged and surface as "not connected" or `None`.
pub trait TelemetrySource: Send + Sync {
    /// Re-attempts the provider handshake when not yet connected.
    fn is_connected(&self) -> bool;

    /// `None` when not connected or when any field read fails.
    fn read_sample(&self, session: Option<&SessionToken>) -> Option<TelemetrySample>;

    fn read_markers(&self) -> Option<SessionMarkers>;

    /// Metadata snapshot for lifecycle events.
    fn read_metadata(&self, session: &SessionToken) -> Option<SessionMetadata>;
}

/// Adapts any [`Provider`] to [`TelemetrySource`].
pub struct SourceAdapter<P: Provider> {
    provider: Mutex<P>,
    clock: Arc<dyn Clock>,
    speed_factor: f32,
}

impl<P: Provider> SourceAdapter<P> {
    pub fn new(provider: P, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider: Mutex::new(provider),
            clock,
            speed_factor: DEFAULT_SPEED_FACTOR,
        }
    }

    #[must_use]
    pub fn with_speed_factor(mut self, factor: f32) -> Self {
        self.speed_factor = factor;
        self
    }

    /// Release the provider's resources.
    pub fn shutdown(&self) {
        self.provider.lock().shutdown();
    }

    fn ensure_connected(provider: &mut P) -> bool {
        if provider.is_initialized() && provider.is_connected() {
            return true;
        }
        match provider.startup() {
            Ok(()) => provider.is_initialized() && provider.is_connected(),
            Err(SourceError::NotRunning) => false,
            Err(e) => {
                warn!(error = %e, "telemetry provider handshake failed");
                false
            }
        }
    }

    fn build_sample(
        &self,
        provider: &dyn Provider,
        session: Option<&SessionToken>,
    ) -> Result<TelemetrySample> {
        Ok(TelemetrySample {
            session: session.cloned(),
            session_time: field_f64(provider, "SessionTime")?,
            session_tick: field_i32(provider, "SessionTick")?,
            session_num: field_i32(provider, "SessionNum")?,
            session_state: field_i32(provider, "SessionState")?,
            session_unique_id: field_i32(provider, "SessionUniqueID")?,
            speed: self.speed_factor * field_f32(provider, "Speed")?,
            yaw: field_f32(provider, "Yaw")?,
            lap_best_lap: field_i32(provider, "LapBestLap")?,
            lap_best_lap_time: field_f32(provider, "LapBestLapTime")?,
            lap_last_lap_time: field_f32(provider, "LapLastLapTime")?,
            lap_current_lap_time: field_f32(provider, "LapCurrentLapTime")?,
            steering_wheel_angle: field_f32(provider, "SteeringWheelAngle")?,
            throttle: field_f32(provider, "Throttle")?,
            brake: field_f32(provider, "Brake")?,
            clutch: field_f32(provider, "Clutch")?,
            gear: field_i32(provider, "Gear")?,
            rpm: field_f32(provider, "RPM")?,
            lap: field_i32(provider, "Lap")?,
            lap_completed: field_i32(provider, "LapCompleted")?,
            timestamp: iso_timestamp(&self.clock.now()),
        })
    }

    fn build_markers(provider: &dyn Provider) -> Result<Option<SessionMarkers>> {
        if field_i32(provider, "SessionUniqueID")? == 0 {
            return Ok(None);
        }
        Ok(Some(SessionMarkers {
            lap_number: field_i32(provider, "SessionNum")?,
            elapsed_time: field_f64(provider, "SessionTime")?,
        }))
    }

    fn build_metadata(&self, provider: &dyn Provider, session: &SessionToken) -> Result<SessionMetadata> {
        Ok(SessionMetadata {
            session: session.clone(),
            race_info: section(provider, "WeekendInfo")?,
            session_info: section(provider, "SessionInfo")?,
            car_info: section(provider, "CarSetup")?,
            driver_info: section(provider, "DriverInfo")?,
            timestamp: iso_timestamp(&self.clock.now()),
        })
    }
}

/// A section that is absent from the session string reads as `null`.
fn section(provider: &dyn Provider, name: &str) -> Result<Value> {
    match provider.session_section(name) {
        Err(SourceError::MissingSection(_)) => Ok(Value::Null),
        other => other,
    }
}

impl<P: Provider> TelemetrySource for SourceAdapter<P> {
    fn is_connected(&self) -> bool {
        Self::ensure_connected(&mut self.provider.lock())
    }

    fn read_sample(&self, session: Option<&SessionToken>) -> Option<TelemetrySample> {
        let mut provider = self.provider.lock();
        if !Self::ensure_connected(&mut provider) {
            return None;
        }
        match self.build_sample(&*provider, session) {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!(error = %e, "telemetry sample unavailable");
                None
            }
        }
    }

    fn read_markers(&self) -> Option<SessionMarkers> {
        let mut provider = self.provider.lock();
        if !Self::ensure_connected(&mut provider) {
            return None;
        }
        Self::build_markers(&*provider).unwrap_or_else(|e| {
            debug!(error = %e, "session markers unavailable");
            None
        })
    }

    fn read_metadata(&self, session: &SessionToken) -> Option<SessionMetadata> {
        let mut provider = self.provider.lock();
        if !Self::ensure_connected(&mut provider) {
            return None;
        }
        match self.build_metadata(&*provider, session) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(error = %e, session = %session, "session metadata unavailable");
                None
            }
        }
    }
}

impl<P: Provider> Drop for SourceAdapter<P> {
    fn drop(&mut self) {
        self.provider.get_mut().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedProvider;
    use crate::FieldValue;
    use chrono::{Local, TimeZone};
    use racewire_core::ManualClock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).single().unwrap(),
        ))
    }

    /// Provider backed by a fixed field table.
    #[derive(Default)]
    struct TableProvider {
        fields: HashMap<&'static str, FieldValue>,
        sections: HashMap<&'static str, Value>,
        running: bool,
        initialized: bool,
        startups: Arc<AtomicUsize>,
        fail_startup: bool,
    }

    impl TableProvider {
        fn full() -> Self {
            let mut fields = HashMap::new();
            for name in [
                "Speed",
                "Yaw",
                "LapBestLapTime",
                "LapLastLapTime",
                "LapCurrentLapTime",
                "SteeringWheelAngle",
                "Throttle",
                "Brake",
                "Clutch",
                "RPM",
            ] {
                let _ = fields.insert(name, FieldValue::Float(1.0));
            }
            for name in [
                "SessionTick",
                "SessionNum",
                "SessionState",
                "LapBestLap",
                "Gear",
                "Lap",
                "LapCompleted",
            ] {
                let _ = fields.insert(name, FieldValue::Int(0));
            }
            let _ = fields.insert("SessionTime", FieldValue::Double(0.5));
            let _ = fields.insert("SessionUniqueID", FieldValue::Int(7));
            let _ = fields.insert("Speed", FieldValue::Float(50.0));
            Self {
                fields,
                running: true,
                ..Default::default()
            }
        }
    }

    impl Provider for TableProvider {
        fn startup(&mut self) -> Result<()> {
            let _ = self.startups.fetch_add(1, Ordering::SeqCst);
            if self.fail_startup {
                return Err(SourceError::Malformed("bad header".into()));
            }
            if !self.running {
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
            self.running
        }

        fn field(&self, name: &str) -> Result<FieldValue> {
            self.fields
                .get(name)
                .cloned()
                .ok_or_else(|| SourceError::MissingField(name.to_string()))
        }

        fn session_section(&self, name: &str) -> Result<Value> {
            self.sections
                .get(name)
                .cloned()
                .ok_or_else(|| SourceError::MissingSection(name.to_string()))
        }
    }

    #[test]
    fn sample_applies_speed_factor_and_token() {
        let adapter = SourceAdapter::new(TableProvider::full(), clock());
        let token = SessionToken::from_raw("01012025120000");
        let sample = adapter.read_sample(Some(&token)).unwrap();
        assert_eq!(sample.session, Some(token));
        assert!((sample.speed - 180.0).abs() < 1e-3);
        assert_eq!(sample.timestamp, "2025-01-01T12:00:00.000000");
    }

    #[test]
    fn custom_speed_factor() {
        let adapter = SourceAdapter::new(TableProvider::full(), clock()).with_speed_factor(1.0);
        let sample = adapter.read_sample(None).unwrap();
        assert!((sample.speed - 50.0).abs() < 1e-3);
        assert!(sample.session.is_none());
    }

    #[test]
    fn any_missing_field_yields_none() {
        let mut provider = TableProvider::full();
        let _ = provider.fields.remove("Clutch");
        let adapter = SourceAdapter::new(provider, clock());
        assert!(adapter.read_sample(None).is_none());
    }

    #[test]
    fn wrong_field_type_yields_none() {
        let mut provider = TableProvider::full();
        let _ = provider.fields.insert("Gear", FieldValue::Float(3.0));
        let adapter = SourceAdapter::new(provider, clock());
        assert!(adapter.read_sample(None).is_none());
    }

    #[test]
    fn not_running_is_disconnected_and_retried() {
        let startups = Arc::new(AtomicUsize::new(0));
        let provider = TableProvider {
            running: false,
            startups: Arc::clone(&startups),
            ..TableProvider::full()
        };
        let adapter = SourceAdapter::new(provider, clock());
        assert!(!adapter.is_connected());
        assert!(!adapter.is_connected());
        assert!(adapter.read_sample(None).is_none());
        assert!(adapter.read_markers().is_none());
        assert_eq!(startups.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn handshake_error_maps_to_not_available() {
        let provider = TableProvider {
            fail_startup: true,
            ..TableProvider::full()
        };
        let adapter = SourceAdapter::new(provider, clock());
        assert!(!adapter.is_connected());
    }

    #[test]
    fn connected_provider_skips_handshake() {
        let startups = Arc::new(AtomicUsize::new(0));
        let provider = TableProvider {
            startups: Arc::clone(&startups),
            ..TableProvider::full()
        };
        let adapter = SourceAdapter::new(provider, clock());
        assert!(adapter.is_connected());
        assert!(adapter.is_connected());
        assert_eq!(startups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn markers_from_session_num_and_time() {
        let adapter = SourceAdapter::new(TableProvider::full(), clock());
        let markers = adapter.read_markers().unwrap();
        assert_eq!(markers.lap_number, 0);
        assert!((markers.elapsed_time - 0.5).abs() < f64::EPSILON);
        assert!(markers.indicates_restart());
    }

    #[test]
    fn markers_absent_without_provider_session_id() {
        let mut provider = TableProvider::full();
        let _ = provider.fields.insert("SessionUniqueID", FieldValue::Int(0));
        let adapter = SourceAdapter::new(provider, clock());
        assert!(adapter.read_markers().is_none());
    }

    #[test]
    fn metadata_maps_sections() {
        let mut provider = TableProvider::full();
        let _ = provider
            .sections
            .insert("WeekendInfo", serde_json::json!({"TrackName": "spa"}));
        let _ = provider
            .sections
            .insert("DriverInfo", serde_json::json!({"DriverCarIdx": 3}));
        let adapter = SourceAdapter::new(provider, clock());
        let token = SessionToken::from_raw("01012025120000");

        let meta = adapter.read_metadata(&token).unwrap();
        assert_eq!(meta.session, token);
        assert_eq!(meta.race_info["TrackName"], "spa");
        assert_eq!(meta.driver_info["DriverCarIdx"], 3);
        assert!(meta.car_info.is_null());
    }

    #[test]
    fn metadata_none_when_disconnected() {
        let provider = TableProvider {
            running: false,
            ..TableProvider::full()
        };
        let adapter = SourceAdapter::new(provider, clock());
        assert!(adapter
            .read_metadata(&SessionToken::from_raw("01012025120000"))
            .is_none());
    }

    #[test]
    fn adapts_simulated_provider() {
        let provider = SimulatedProvider::new(90.0);
        let adapter = SourceAdapter::new(provider, clock());
        assert!(adapter.is_connected());
        let sample = adapter.read_sample(None).unwrap();
        assert!(sample.rpm > 0.0);
    }
}
