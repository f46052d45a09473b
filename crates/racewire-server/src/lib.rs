//! # racewire-server
//!
//! Fans live telemetry out to WebSocket subscribers.
//!
//! - [`registry`]: the set of live subscriber handles
//! - [`broadcast`]: one payload to every handle, pruning failures
//! - [`sampler`]: the periodic telemetry tick
//! - [`session`]: source connectivity to lifecycle events
//! - [`handler`]: one accepted connection, from upgrade to close
//! - [`server`]: router, listener and background tasks

pub mod broadcast;
pub mod config;
pub mod errors;
pub mod handler;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod sampler;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod subscriber;

pub use broadcast::{BroadcastEngine, BroadcastReport};
pub use config::ServerConfig;
pub use errors::ServerError;
pub use registry::SubscriberRegistry;
pub use sampler::{IdleReason, Sampler, TickOutcome};
pub use server::{RacewireServer, RunningServer};
pub use session::{CurrentSession, SessionMachine, SessionState, SessionTracker, Transition};
pub use shutdown::ShutdownCoordinator;
pub use subscriber::{SendError, Subscriber, SubscriberId};
