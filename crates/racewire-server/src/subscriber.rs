//! One subscriber handle: the queue into a connection's writer task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Opaque subscriber identity, `sub_<uuid v7>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn generate() -> Self {
        Self(format!("sub_{}", uuid::Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a frame did not reach a subscriber's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The writer is gone or the handle was retired.
    #[error("subscriber closed")]
    Closed,
    /// The queue stayed full for the whole send timeout.
    #[error("send timed out")]
    TimedOut,
}

/// A registered subscriber.
///
/// Frames go into a bounded queue drained by the connection's writer task.
/// Retiring the handle is permanent and wakes everything waiting on
/// [`Subscriber::retired`].
pub struct Subscriber {
    pub id: SubscriberId,
    /// Peer address as reported by the listener.
    pub remote: String,
    tx: mpsc::Sender<Arc<str>>,
    retired: CancellationToken,
    pub connected_at: Instant,
    last_pong: Mutex<Instant>,
}

impl Subscriber {
    /// Create a handle and the receiving end of its queue.
    pub fn channel(
        remote: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let subscriber = Arc::new(Self {
            id: SubscriberId::generate(),
            remote: remote.into(),
            tx,
            retired: CancellationToken::new(),
            connected_at: now,
            last_pong: Mutex::new(now),
        });
        (subscriber, rx)
    }

    /// Enqueue a frame, waiting at most `timeout` for queue space.
    pub async fn send(&self, payload: Arc<str>, timeout: Duration) -> Result<(), SendError> {
        if self.is_retired() {
            return Err(SendError::Closed);
        }
        match tokio::time::timeout(timeout, self.tx.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::TimedOut),
        }
    }

    /// Mark the handle dead. Idempotent.
    pub fn retire(&self) {
        self.retired.cancel();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    /// Resolves once the handle is retired.
    pub fn retired(&self) -> WaitForCancellationFuture<'_> {
        self.retired.cancelled()
    }

    /// Record transport activity from the peer (pong or ping).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// When the peer last answered.
    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}
