//! The set of live subscriber handles.

use std::sync::Arc;

use metrics::gauge;
use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::SUBSCRIBERS_ACTIVE;
use crate::subscriber::{Subscriber, SubscriberId};

/// Insertion-ordered set of subscribers behind one lock.
///
/// The lock is never held across an `.await`; broadcasts work on a
/// [`snapshot`](Self::snapshot).
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. Returns `false` for a retired or already present
    /// handle.
    pub fn add(&self, subscriber: Arc<Subscriber>) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscriber.is_retired() || subscribers.iter().any(|s| s.id == subscriber.id) {
            return false;
        }
        debug!(subscriber = %subscriber.id, remote = %subscriber.remote, "subscriber registered");
        subscribers.push(subscriber);
        gauge!(SUBSCRIBERS_ACTIVE).set(subscribers.len() as f64);
        true
    }

    /// Remove and retire a handle. Removing an absent id is a no-op.
    pub fn remove(&self, id: &SubscriberId) -> Option<Arc<Subscriber>> {
        let removed = {
            let mut subscribers = self.subscribers.lock();
            let pos = subscribers.iter().position(|s| &s.id == id)?;
            let removed = subscribers.remove(pos);
            gauge!(SUBSCRIBERS_ACTIVE).set(subscribers.len() as f64);
            removed
        };
        removed.retire();
        debug!(subscriber = %id, "subscriber removed");
        Some(removed)
    }

    /// Point-in-time copy in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.lock().iter().any(|s| &s.id == id)
    }
}
