//! The periodic telemetry tick.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use racewire_core::ServerFrame;
use racewire_source::TelemetrySource;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, trace};

use crate::broadcast::{BroadcastEngine, BroadcastReport};
use crate::config::ServerConfig;
use crate::metrics::{SAMPLER_SKIPPED_TOTAL, SAMPLER_TICK_SECONDS};
use crate::session::CurrentSession;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleReason {
    NoSubscribers,
    Disconnected,
}

impl IdleReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::NoSubscribers => "no_subscribers",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was read.
    Idle(IdleReason),
    /// The source had no complete sample.
    NoSample,
    Sent(BroadcastReport),
}

/// Tick rates, as periods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerRates {
    pub target: Duration,
    pub no_subscribers: Duration,
    pub disconnected: Duration,
}

impl SamplerRates {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            target: config.target_period(),
            no_subscribers: config.no_clients_period(),
            disconnected: config.not_connected_period(),
        }
    }
}

/// Reads one sample per tick and broadcasts it.
pub struct Sampler {
    source: Arc<dyn TelemetrySource>,
    engine: Arc<BroadcastEngine>,
    current: CurrentSession,
    rates: SamplerRates,
}

impl Sampler {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        engine: Arc<BroadcastEngine>,
        current: CurrentSession,
        rates: SamplerRates,
    ) -> Self {
        Self {
            source,
            engine,
            current,
            rates,
        }
    }

    /// One tick. The source is not read when nobody is subscribed or when it
    /// reports disconnected.
    pub async fn tick(&self) -> TickOutcome {
        if !self.engine.has_subscribers() {
            return Self::idle(IdleReason::NoSubscribers);
        }
        if !self.source.is_connected() {
            return Self::idle(IdleReason::Disconnected);
        }

        let session = self.current.get();
        let Some(sample) = self.source.read_sample(session.as_ref()) else {
            counter!(SAMPLER_SKIPPED_TOTAL, "reason" => "no_sample").increment(1);
            return TickOutcome::NoSample;
        };
        trace!(
            session_time = sample.session_time,
            subscribers = self.engine.registry().count(),
            "telemetry sample"
        );

        let frame = ServerFrame::from(sample);
        match frame.encode() {
            Ok(payload) => TickOutcome::Sent(self.engine.broadcast_payload(payload).await),
            Err(e) => {
                error!(error = %e, "failed to serialize telemetry sample");
                TickOutcome::NoSample
            }
        }
    }

    fn idle(reason: IdleReason) -> TickOutcome {
        counter!(SAMPLER_SKIPPED_TOTAL, "reason" => reason.as_str()).increment(1);
        TickOutcome::Idle(reason)
    }

    /// How long to wait before the next tick. Busy ticks only sleep the rest
    /// of the target period; an overrun is not caught up.
    pub fn delay_after(&self, outcome: &TickOutcome, elapsed: Duration) -> Duration {
        match outcome {
            TickOutcome::Idle(IdleReason::NoSubscribers) => self.rates.no_subscribers,
            TickOutcome::Idle(IdleReason::Disconnected) => self.rates.disconnected,
            TickOutcome::NoSample | TickOutcome::Sent(_) => {
                self.rates.target.saturating_sub(elapsed)
            }
        }
    }

    /// Tick until `cancel` fires.
    #[instrument(skip_all, name = "sampler")]
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            target_ms = self.rates.target.as_secs_f64() * 1_000.0,
            "telemetry sampler started"
        );
        loop {
            let started = Instant::now();
            let outcome = self.tick().await;
            let elapsed = started.elapsed();
            if matches!(outcome, TickOutcome::Sent(_)) {
                histogram!(SAMPLER_TICK_SECONDS).record(elapsed.as_secs_f64());
            }
            let delay = self.delay_after(&outcome, elapsed);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        info!("telemetry sampler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriberRegistry;
    use crate::subscriber::Subscriber;
    use racewire_core::{SessionMarkers, SessionMetadata, SessionToken, TelemetrySample};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        connected: AtomicBool,
        has_sample: AtomicBool,
        reads: AtomicUsize,
    }

    impl TelemetrySource for CountingSource {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn read_sample(&self, session: Option<&SessionToken>) -> Option<TelemetrySample> {
            let _ = self.reads.fetch_add(1, Ordering::SeqCst);
            self.has_sample.load(Ordering::SeqCst).then(|| TelemetrySample {
                session: session.cloned(),
                session_time: 12.5,
                ..TelemetrySample::default()
            })
        }

        fn read_markers(&self) -> Option<SessionMarkers> {
            None
        }

        fn read_metadata(&self, _session: &SessionToken) -> Option<SessionMetadata> {
            None
        }
    }

    fn rates() -> SamplerRates {
        SamplerRates {
            target: Duration::from_millis(16),
            no_subscribers: Duration::from_millis(500),
            disconnected: Duration::from_millis(400),
        }
    }

    fn sampler(source: Arc<CountingSource>, current: CurrentSession) -> Sampler {
        let engine = Arc::new(BroadcastEngine::new(
            Arc::new(SubscriberRegistry::new()),
            Duration::from_millis(100),
        ));
        Sampler::new(source, engine, current, rates())
    }

    fn subscribe(sampler: &Sampler) -> tokio::sync::mpsc::Receiver<Arc<str>> {
        let (sub, rx) = Subscriber::channel("peer", 8);
        assert!(sampler.engine.registry().add(sub));
        rx
    }

    #[tokio::test]
    async fn empty_registry_never_reads() {
        let source = Arc::new(CountingSource::default());
        source.connected.store(true, Ordering::SeqCst);
        let sampler = sampler(source.clone(), CurrentSession::new());

        assert_eq!(sampler.tick().await, TickOutcome::Idle(IdleReason::NoSubscribers));
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnected_source_never_reads() {
        let source = Arc::new(CountingSource::default());
        let sampler = sampler(source.clone(), CurrentSession::new());
        let _rx = subscribe(&sampler);

        assert_eq!(sampler.tick().await, TickOutcome::Idle(IdleReason::Disconnected));
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_sample_skips_the_cycle() {
        let source = Arc::new(CountingSource::default());
        source.connected.store(true, Ordering::SeqCst);
        let sampler = sampler(source.clone(), CurrentSession::new());
        let mut rx = subscribe(&sampler);

        assert_eq!(sampler.tick().await, TickOutcome::NoSample);
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sample_is_broadcast_with_current_session() {
        let source = Arc::new(CountingSource::default());
        source.connected.store(true, Ordering::SeqCst);
        source.has_sample.store(true, Ordering::SeqCst);
        let current = CurrentSession::new();
        current.set(Some(SessionToken::from_raw("01012025120000")));
        let sampler = sampler(source, current);
        let mut rx = subscribe(&sampler);

        let outcome = sampler.tick().await;
        assert!(matches!(outcome, TickOutcome::Sent(r) if r.delivered == 1));

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["UniqueSessionID"], "01012025120000");
        assert_eq!(frame["SessionTime"], 12.5);
        assert!(frame.get("event").is_none());
    }

    #[test]
    fn delays_follow_the_outcome() {
        let sampler = sampler(Arc::new(CountingSource::default()), CurrentSession::new());
        let sent = TickOutcome::Sent(BroadcastReport::default());

        assert_eq!(
            sampler.delay_after(&TickOutcome::Idle(IdleReason::NoSubscribers), Duration::ZERO),
            Duration::from_millis(500)
        );
        assert_eq!(
            sampler.delay_after(&TickOutcome::Idle(IdleReason::Disconnected), Duration::ZERO),
            Duration::from_millis(400)
        );
        assert_eq!(
            sampler.delay_after(&sent, Duration::from_millis(6)),
            Duration::from_millis(10)
        );
        assert_eq!(
            sampler.delay_after(&TickOutcome::NoSample, Duration::from_millis(40)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let source = Arc::new(CountingSource::default());
        let sampler = sampler(source, CurrentSession::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sampler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
