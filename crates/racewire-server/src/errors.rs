//! Server error types.

use std::io;

/// Fatal errors while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound for a reason other than the address
    /// being taken.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The address stayed in use through every retry.
    #[error("{addr} still in use after {attempts} attempts")]
    BindExhausted {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics recorder: {0}")]
    Metrics(String),
}
