//! Session tracking: source connectivity and restart markers turned into
//! lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use metrics::counter;
use parking_lot::RwLock;
use racewire_core::{Clock, LifecycleEvent, SessionMarkers, SessionToken};
use racewire_source::TelemetrySource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broadcast::BroadcastEngine;
use crate::metrics::SESSION_TRANSITIONS_TOTAL;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Active(SessionToken),
}

/// A state change observed by [`SessionMachine::observe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Started(SessionToken),
    Changed {
        previous: SessionToken,
        current: SessionToken,
    },
    Ended(SessionToken),
}

impl Transition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started(_) => "start",
            Self::Changed { .. } => "change",
            Self::Ended(_) => "end",
        }
    }

    /// The session that is active after this transition.
    pub fn active_after(&self) -> Option<&SessionToken> {
        match self {
            Self::Started(token) | Self::Changed { current: token, .. } => Some(token),
            Self::Ended(_) => None,
        }
    }
}

/// Pure session state machine.
///
/// - connect: `NoSession -> Active(new)`
/// - disconnect: `Active -> NoSession`
/// - restart markers while connected: `Active(old) -> Active(new)` when the
///   freshly generated token differs from `old`
///
/// Tokens have one-second granularity, so a restart seen in the same second
/// as the current token produces no change, and markers that stay under the
/// threshold across a second boundary produce another one.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    was_connected: bool,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::NoSession,
            was_connected: false,
        }
    }

    /// Start from an already active session, as if connected.
    pub fn with_active(token: SessionToken) -> Self {
        Self {
            state: SessionState::Active(token),
            was_connected: true,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current(&self) -> Option<&SessionToken> {
        match &self.state {
            SessionState::Active(token) => Some(token),
            SessionState::NoSession => None,
        }
    }

    /// Feed one poll result. At most one connectivity transition and one
    /// marker transition come out, in that order.
    pub fn observe(
        &mut self,
        connected: bool,
        markers: Option<SessionMarkers>,
        now: &DateTime<Local>,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if connected != self.was_connected {
            self.was_connected = connected;
            if connected {
                let token = SessionToken::from_time(now);
                self.state = SessionState::Active(token.clone());
                transitions.push(Transition::Started(token));
            } else if let SessionState::Active(token) =
                std::mem::replace(&mut self.state, SessionState::NoSession)
            {
                transitions.push(Transition::Ended(token));
            }
        }

        if connected && markers.is_some_and(|m| m.indicates_restart()) {
            if let SessionState::Active(previous) = &self.state {
                let current = SessionToken::from_time(now);
                if &current != previous {
                    let previous = previous.clone();
                    self.state = SessionState::Active(current.clone());
                    transitions.push(Transition::Changed { previous, current });
                }
            }
        }

        transitions
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// The active session as seen by the sampler and connection handlers.
///
/// Written only by the tracker; readers always see a whole token.
#[derive(Clone, Debug, Default)]
pub struct CurrentSession {
    inner: Arc<RwLock<Option<SessionToken>>>,
}

impl CurrentSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<SessionToken> {
        self.inner.read().clone()
    }

    pub fn set(&self, token: Option<SessionToken>) {
        *self.inner.write() = token;
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().is_some()
    }
}

/// Polls the source and publishes lifecycle events.
pub struct SessionTracker {
    machine: SessionMachine,
    source: Arc<dyn TelemetrySource>,
    engine: Arc<BroadcastEngine>,
    current: CurrentSession,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl SessionTracker {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        engine: Arc<BroadcastEngine>,
        current: CurrentSession,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            machine: SessionMachine::new(),
            source,
            engine,
            current,
            clock,
            poll_interval,
        }
    }

    /// One poll: read connectivity and markers, apply transitions, publish
    /// the current session and broadcast the matching events.
    pub async fn poll(&mut self) -> Vec<Transition> {
        let connected = self.source.is_connected();
        let markers = if connected {
            self.source.read_markers()
        } else {
            None
        };
        let now = self.clock.now();
        let transitions = self.machine.observe(connected, markers, &now);

        for transition in &transitions {
            self.current.set(transition.active_after().cloned());
            counter!(SESSION_TRANSITIONS_TOTAL, "kind" => transition.kind()).increment(1);
            self.announce(transition).await;
        }
        transitions
    }

    async fn announce(&self, transition: &Transition) {
        match transition {
            Transition::Started(token) => {
                info!(session = %token, "session started");
                if let Some(metadata) = self.metadata_for(token) {
                    let _ = self
                        .engine
                        .broadcast_event(LifecycleEvent::SessionStart { metadata })
                        .await;
                }
            }
            Transition::Changed { previous, current } => {
                info!(previous = %previous, session = %current, "session changed");
                if let Some(metadata) = self.metadata_for(current) {
                    let _ = self
                        .engine
                        .broadcast_event(LifecycleEvent::SessionChange { metadata })
                        .await;
                }
            }
            Transition::Ended(token) => {
                info!(session = %token, "session ended");
                if self.engine.has_subscribers() {
                    let _ = self
                        .engine
                        .broadcast_event(LifecycleEvent::SessionEnd {
                            session_id: token.clone(),
                        })
                        .await;
                }
            }
        }
    }

    /// Metadata for an event, or `None` when nobody is listening or the
    /// source cannot provide it.
    fn metadata_for(&self, token: &SessionToken) -> Option<racewire_core::SessionMetadata> {
        if !self.engine.has_subscribers() {
            debug!(session = %token, "no subscribers, lifecycle event not sent");
            return None;
        }
        let metadata = self.source.read_metadata(token);
        if metadata.is_none() {
            warn!(session = %token, "session metadata unavailable, lifecycle event skipped");
        }
        metadata
    }

    /// Poll until `cancel` fires.
    #[instrument(skip_all, name = "session_tracker")]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "session tracker started");
        loop {
            let _ = self.poll().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("session tracker stopped");
    }
}
