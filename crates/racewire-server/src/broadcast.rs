//! Fan-out of one payload to every registered subscriber.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use racewire_core::{LifecycleEvent, ServerFrame};
use tracing::{debug, error, info};

use crate::metrics::{BROADCAST_DELIVERIES_TOTAL, BROADCAST_FRAMES_TOTAL, BROADCAST_PRUNED_TOTAL};
use crate::registry::SubscriberRegistry;

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Handles in the snapshot.
    pub attempted: usize,
    pub delivered: usize,
    /// Handles removed from the registry after a failed send.
    pub pruned: usize,
}

/// Sends frames to a snapshot of the registry and prunes failures.
pub struct BroadcastEngine {
    registry: Arc<SubscriberRegistry>,
    send_timeout: Duration,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<SubscriberRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn has_subscribers(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Serialize a lifecycle event once and send it to everyone.
    pub async fn broadcast_event(&self, event: LifecycleEvent) -> BroadcastReport {
        let name = event.name();
        let report = self.broadcast_frame(&ServerFrame::from(event), name).await;
        info!(
            event = name,
            delivered = report.delivered,
            pruned = report.pruned,
            "lifecycle event broadcast"
        );
        report
    }

    /// Serialize any frame once and send it to everyone.
    pub async fn broadcast_frame(&self, frame: &ServerFrame, kind: &'static str) -> BroadcastReport {
        match frame.encode() {
            Ok(payload) => {
                counter!(BROADCAST_FRAMES_TOTAL, "kind" => kind).increment(1);
                self.broadcast_payload(payload).await
            }
            Err(e) => {
                error!(kind, error = %e, "failed to serialize frame");
                BroadcastReport::default()
            }
        }
    }

    /// Send an already serialized payload to every handle in a snapshot.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Handles
    /// whose send failed are removed before this returns. Handles added after
    /// the snapshot do not receive this payload.
    pub async fn broadcast_payload(&self, payload: Arc<str>) -> BroadcastReport {
        let targets = self.registry.snapshot();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let timeout = self.send_timeout;
        let sends = targets.iter().map(|subscriber| {
            let payload = Arc::clone(&payload);
            async move { subscriber.send(payload, timeout).await }
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport {
            attempted: targets.len(),
            ..BroadcastReport::default()
        };
        for (subscriber, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(subscriber = %subscriber.id, error = %e, "send failed, pruning subscriber");
                    if self.registry.remove(&subscriber.id).is_some() {
                        report.pruned += 1;
                    }
                }
            }
        }

        counter!(BROADCAST_DELIVERIES_TOTAL).increment(report.delivered as u64);
        if report.pruned > 0 {
            counter!(BROADCAST_PRUNED_TOTAL).increment(report.pruned as u64);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::Subscriber;
    use racewire_core::SessionToken;
    use tokio::sync::mpsc;

    const SEND_TIMEOUT: Duration = Duration::from_millis(100);

    fn engine() -> BroadcastEngine {
        BroadcastEngine::new(Arc::new(SubscriberRegistry::new()), SEND_TIMEOUT)
    }

    fn join(engine: &BroadcastEngine, capacity: usize) -> (Arc<Subscriber>, mpsc::Receiver<Arc<str>>) {
        let (sub, rx) = Subscriber::channel("peer", capacity);
        assert!(engine.registry().add(sub.clone()));
        (sub, rx)
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let engine = engine();
        let report = engine.broadcast_payload(Arc::from("x")).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_same_payload() {
        let engine = engine();
        let mut receivers: Vec<_> = (0..3).map(|_| join(&engine, 4).1).collect();

        let report = engine.broadcast_payload(Arc::from("frame")).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 3);

        let first = receivers[0].recv().await.unwrap();
        for rx in &mut receivers[1..] {
            let got = rx.recv().await.unwrap();
            assert!(Arc::ptr_eq(&first, &got));
        }
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned() {
        let engine = engine();
        let (_alive, mut alive_rx) = join(&engine, 4);
        let (dead, dead_rx) = join(&engine, 4);
        drop(dead_rx);

        let report = engine.broadcast_payload(Arc::from("frame")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert!(!engine.registry().contains(&dead.id));
        assert!(dead.is_retired());
        assert_eq!(&*alive_rx.recv().await.unwrap(), "frame");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_times_out_and_is_pruned() {
        let engine = engine();
        let (_ok, mut ok_rx) = join(&engine, 4);
        let (stalled, _stalled_rx) = join(&engine, 1);

        let first = engine.broadcast_payload(Arc::from("one")).await;
        assert_eq!(first.delivered, 2);

        let second = engine.broadcast_payload(Arc::from("two")).await;
        assert_eq!(second.delivered, 1);
        assert_eq!(second.pruned, 1);
        assert!(!engine.registry().contains(&stalled.id));
        assert_eq!(&*ok_rx.recv().await.unwrap(), "one");
        assert_eq!(&*ok_rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn late_joiner_misses_earlier_payload() {
        let engine = engine();
        let (_early, mut early_rx) = join(&engine, 4);
        let _ = engine.broadcast_payload(Arc::from("first")).await;
        let (_late, mut late_rx) = join(&engine, 4);

        assert_eq!(&*early_rx.recv().await.unwrap(), "first");
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lifecycle_event_wire_shape() {
        let engine = engine();
        let (_sub, mut rx) = join(&engine, 4);
        let report = engine
            .broadcast_event(LifecycleEvent::SessionEnd {
                session_id: SessionToken::from_raw("01012025120000"),
            })
            .await;
        assert_eq!(report.delivered, 1);

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            serde_json::json!({"event": "session_end", "sessionId": "01012025120000"})
        );
    }
}
