//! # racewire-core
//!
//! Types shared across the racewire workspace.
//!
//! - [`session`]: time-derived session tokens and the [`Clock`] seam
//! - [`telemetry`]: per-tick samples, session markers and metadata snapshots
//! - [`frames`]: the JSON frames exchanged with subscribers

pub mod frames;
pub mod session;
pub mod telemetry;

pub use frames::{ClientMessage, LifecycleEvent, ServerFrame, ServerReply};
pub use session::{iso_timestamp, Clock, ManualClock, SessionToken, SystemClock};
pub use telemetry::{SessionMarkers, SessionMetadata, TelemetrySample};
