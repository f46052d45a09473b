//! Source error types.

use thiserror::Error;

/// Errors raised by providers. The adapter never lets these escape.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The sim is not running or has not published its shared memory.
    #[error("telemetry provider is not running")]
    NotRunning,
    /// The live backend does not exist on this platform.
    #[error("live telemetry is not supported on this platform")]
    Unsupported,
    /// The provider has not been started.
    #[error("telemetry provider is not initialized")]
    NotInitialized,
    /// No variable with this name in the current image.
    #[error("unknown telemetry field: {0}")]
    MissingField(String),
    /// No top-level section with this name in the session string.
    #[error("unknown session section: {0}")]
    MissingSection(String),
    #[error("field {field} has type {actual}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
    /// The sim kept rewriting the buffer while it was being read.
    #[error("telemetry buffer rewritten while reading {0}")]
    Torn(String),
    /// The shared-memory image is truncated or inconsistent.
    #[error("malformed telemetry image: {0}")]
    Malformed(String),
    #[error("failed to parse session string: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to convert session string: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;
