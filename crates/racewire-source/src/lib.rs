//! # racewire-source
//!
//! The telemetry source seen by the rest of the system.
//!
//! - [`Provider`]: the external provider boundary (handshake, field reads,
//!   session description sections)
//! - [`SourceAdapter`]: wraps a provider behind [`TelemetrySource`], turning
//!   every failure into "not connected" or `None`
//! - [`IrsdkProvider`]: iRacing shared memory, live or from a captured image
//! - [`SimulatedProvider`]: synthetic laps

pub mod adapter;
pub mod errors;
pub mod irsdk;
pub mod provider;
pub mod simulated;

pub use adapter::{SourceAdapter, TelemetrySource, DEFAULT_SPEED_FACTOR};
pub use errors::{Result, SourceError};
pub use irsdk::IrsdkProvider;
pub use provider::{FieldValue, Provider};
pub use simulated::{SimulatedControl, SimulatedProvider};
