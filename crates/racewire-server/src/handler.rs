//! One accepted WebSocket connection, from upgrade to close.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use racewire_core::{ClientMessage, LifecycleEvent, ServerFrame, ServerReply};
use racewire_source::TelemetrySource;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL, WS_HEARTBEATS_TOTAL, WS_KEEPALIVE_TIMEOUTS_TOTAL,
    WS_STALLED_WRITES_TOTAL,
};
use crate::registry::SubscriberRegistry;
use crate::session::CurrentSession;
use crate::subscriber::{Subscriber, SubscriberId};

/// What every connection needs from the server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<SubscriberRegistry>,
    pub source: Arc<dyn TelemetrySource>,
    pub current: CurrentSession,
    pub config: Arc<ServerConfig>,
    pub shutdown: CancellationToken,
}

/// Removes the handle from the registry on every exit path.
struct Registration {
    registry: Arc<SubscriberRegistry>,
    id: SubscriberId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _ = self.registry.remove(&self.id);
    }
}

/// Why the writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    Shutdown,
    Retired,
    KeepAliveTimeout,
    Transport,
}

/// Serve one connection until close, transport error, keep-alive timeout,
/// pruning or shutdown.
#[instrument(skip_all, fields(remote = %remote))]
pub async fn serve_connection(socket: WebSocket, remote: String, ctx: ConnectionContext) {
    let (subscriber, queue) = Subscriber::channel(remote, ctx.config.queue_capacity);
    if !ctx.registry.add(subscriber.clone()) {
        return;
    }
    let registration = Registration {
        registry: ctx.registry.clone(),
        id: subscriber.id.clone(),
    };

    info!(subscriber = %subscriber.id, "subscriber connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        queue,
        subscriber.clone(),
        ctx.config.clone(),
        ctx.shutdown.clone(),
    ));

    if greet(&subscriber, &ctx).await {
        loop {
            tokio::select! {
                () = ctx.shutdown.cancelled() => break,
                () = subscriber.retired() => break,
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => on_text(&subscriber, text.as_str(), &ctx).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => on_text(&subscriber, text, &ctx).await,
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => subscriber.mark_alive(),
                    Some(Ok(Message::Close(_))) => {
                        debug!("client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive failed");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    // Wakes the writer unless it is already flushing for shutdown.
    drop(registration);
    match writer.await {
        Ok(exit) => debug!(?exit, "writer finished"),
        Err(e) => warn!(error = %e, "writer task failed"),
    }

    info!(subscriber = %subscriber.id, "subscriber disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(subscriber.age().as_secs_f64());
}

/// Send `connection_established` when a session is active. Returns `false`
/// if the greeting could not be queued.
async fn greet(subscriber: &Subscriber, ctx: &ConnectionContext) -> bool {
    let Some(session) = ctx.current.get() else {
        return true;
    };
    if !ctx.source.is_connected() {
        return true;
    }
    let Some(metadata) = ctx.source.read_metadata(&session) else {
        return true;
    };
    let payload = match ServerFrame::from(LifecycleEvent::ConnectionEstablished { metadata }).encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to serialize connection_established");
            return true;
        }
    };
    match subscriber.send(payload, ctx.config.send_timeout).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "connection_established not delivered");
            false
        }
    }
}

async fn on_text(subscriber: &Subscriber, text: &str, ctx: &ConnectionContext) {
    match ClientMessage::parse(text) {
        Some(ClientMessage::Heartbeat) => {
            counter!(WS_HEARTBEATS_TOTAL).increment(1);
            let Ok(ack) = ServerFrame::from(ServerReply::HeartbeatAck).encode() else {
                return;
            };
            if let Err(e) = subscriber.send(ack, ctx.config.send_timeout).await {
                debug!(error = %e, "heartbeat ack not delivered");
            }
        }
        Some(ClientMessage::Other) | None => {
            debug!(len = text.len(), "ignoring client message");
        }
    }
}

/// Drain the queue into the socket and keep the connection alive.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Arc<str>>,
    subscriber: Arc<Subscriber>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) -> WriterExit {
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    // Oldest ping still waiting for a pong.
    let mut awaiting: Option<Instant> = None;

    let exit = loop {
        let deadline = awaiting.map(|sent| sent + config.ping_timeout);
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break WriterExit::Shutdown,
            () = subscriber.retired() => break WriterExit::Retired,
            frame = queue.recv() => match frame {
                Some(text) => {
                    if !write(&mut ws_tx, Message::Text(text.as_ref().into()), config.send_timeout).await {
                        break WriterExit::Transport;
                    }
                }
                None => break WriterExit::Retired,
            },
            _ = ping.tick() => {
                let now = Instant::now();
                if awaiting.map_or(true, |sent| subscriber.last_pong() >= sent) {
                    awaiting = Some(now);
                }
                if !write(&mut ws_tx, Message::Ping(Default::default()), config.send_timeout).await {
                    break WriterExit::Transport;
                }
            }
            () = sleep_until(deadline) => {
                if awaiting.is_some_and(|sent| subscriber.last_pong() >= sent) {
                    awaiting = None;
                    continue;
                }
                warn!(timeout = ?config.ping_timeout, "no pong from client, closing");
                counter!(WS_KEEPALIVE_TIMEOUTS_TOTAL).increment(1);
                break WriterExit::KeepAliveTimeout;
            }
        }
    };

    // Stops the reader for exits it did not cause.
    subscriber.retire();

    match exit {
        WriterExit::Shutdown => {
            close(&mut ws_tx, &mut queue, close_code::AWAY, "server shutting down", config.close_timeout).await;
        }
        WriterExit::Retired => {
            close(&mut ws_tx, &mut queue, close_code::NORMAL, "", config.close_timeout).await;
        }
        WriterExit::KeepAliveTimeout => {
            close(&mut ws_tx, &mut queue, close_code::ERROR, "keepalive ping timeout", config.close_timeout).await;
        }
        WriterExit::Transport => {}
    }
    exit
}

/// Write one message. A peer that stops reading makes the write pend
/// forever, so it is abandoned after `limit`.
async fn write(ws_tx: &mut SplitSink<WebSocket, Message>, msg: Message, limit: Duration) -> bool {
    match tokio::time::timeout(limit, ws_tx.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "websocket send failed");
            false
        }
        Err(_) => {
            warn!(?limit, "websocket send stalled, dropping connection");
            counter!(WS_STALLED_WRITES_TOTAL).increment(1);
            false
        }
    }
}

/// Flush what is already queued, then send Close, all within `limit`.
async fn close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    queue: &mut mpsc::Receiver<Arc<str>>,
    code: u16,
    reason: &'static str,
    limit: Duration,
) {
    let flush = async {
        while let Ok(text) = queue.try_recv() {
            ws_tx.send(Message::Text(text.as_ref().into())).await?;
        }
        ws_tx
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await?;
        ws_tx.close().await
    };
    match tokio::time::timeout(limit, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "close handshake failed"),
        Err(_) => debug!(?limit, "close handshake timed out"),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
