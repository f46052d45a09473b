//! `RacewireServer`: Axum router, listener and background tasks.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use racewire_core::Clock;
use racewire_source::TelemetrySource;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broadcast::BroadcastEngine;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::handler::{self, ConnectionContext};
use crate::health::{self, HealthResponse};
use crate::registry::SubscriberRegistry;
use crate::sampler::{Sampler, SamplerRates};
use crate::session::{CurrentSession, SessionTracker};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub connection: ConnectionContext,
    /// Live WebSocket sessions, drained at shutdown.
    pub connections: TaskTracker,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// The broadcaster: owns the shared state and wires it into every task.
pub struct RacewireServer {
    config: Arc<ServerConfig>,
    registry: Arc<SubscriberRegistry>,
    engine: Arc<BroadcastEngine>,
    source: Arc<dyn TelemetrySource>,
    clock: Arc<dyn Clock>,
    current: CurrentSession,
    shutdown: Arc<ShutdownCoordinator>,
    connections: TaskTracker,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// Handles of a started server.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub listener: JoinHandle<()>,
    pub session_tracker: JoinHandle<()>,
    pub sampler: JoinHandle<()>,
}

impl RunningServer {
    /// Wait for the first task to end. Before shutdown, any exit is
    /// unexpected.
    pub async fn first_exit(&mut self) -> (&'static str, Result<(), JoinError>) {
        tokio::select! {
            r = &mut self.listener => ("listener", r),
            r = &mut self.session_tracker => ("session_tracker", r),
            r = &mut self.sampler => ("sampler", r),
        }
    }

    /// Handles still worth joining.
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        [self.listener, self.session_tracker, self.sampler]
            .into_iter()
            .filter(|h| !h.is_finished())
            .collect()
    }
}

impl RacewireServer {
    pub fn new(
        config: ServerConfig,
        source: Arc<dyn TelemetrySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let engine = Arc::new(BroadcastEngine::new(registry.clone(), config.send_timeout));
        Self {
            config: Arc::new(config),
            registry,
            engine,
            source,
            clock,
            current: CurrentSession::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connections: TaskTracker::new(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            source: self.source.clone(),
            current: self.current.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.token(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            connection: self.connection_context(),
            connections: self.connections.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// The returned handle finishes once the listener has stopped and every
    /// open WebSocket session has closed.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = bind_with_retry(
            &self.config.bind_addr(),
            self.config.max_bind_retries,
            self.config.bind_retry_delay,
        )
        .await?;
        let addr = listener.local_addr()?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let connections = self.connections.clone();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "listener failed");
            }
            let _ = connections.close();
            connections.wait().await;
            info!("listener stopped");
        });

        info!(%addr, "websocket server listening");
        Ok((addr, handle))
    }

    pub fn session_tracker(&self) -> SessionTracker {
        SessionTracker::new(
            self.source.clone(),
            self.engine.clone(),
            self.current.clone(),
            self.clock.clone(),
            self.config.session_poll_interval,
        )
    }

    pub fn sampler(&self) -> Sampler {
        Sampler::new(
            self.source.clone(),
            self.engine.clone(),
            self.current.clone(),
            SamplerRates::from_config(&self.config),
        )
    }

    /// Listener, session tracker and sampler, all tied to the shutdown token.
    pub async fn start(&self) -> Result<RunningServer, ServerError> {
        let (addr, listener) = self.listen().await?;
        let token = self.shutdown.token();
        let session_tracker = tokio::spawn(self.session_tracker().run(token.clone()));
        let sampler = tokio::spawn(self.sampler().run(token));
        Ok(RunningServer {
            addr,
            listener,
            session_tracker,
            sampler,
        })
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    pub fn current_session(&self) -> &CurrentSession {
        &self.current
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Bind `addr`, retrying while it is in use.
///
/// Makes `1 + max_retries` attempts with a fixed `delay` between them. Other
/// bind errors fail immediately.
pub async fn bind_with_retry(
    addr: &str,
    max_retries: u32,
    delay: Duration,
) -> Result<TcpListener, ServerError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if attempt > max_retries {
                    return Err(ServerError::BindExhausted {
                        addr: addr.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                warn!(addr, attempt, retry_in = ?delay, "address in use, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(ServerError::Bind {
                    addr: addr.to_string(),
                    source: e,
                })
            }
        }
    }
}

/// GET / and /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.connection.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let ctx = state.connection;
    let connections = state.connections;
    ws.on_upgrade(move |socket| {
        connections.track_future(handler::serve_connection(socket, remote.to_string(), ctx))
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let session = state.connection.current.get();
    Json(health::health_check(
        state.start_time,
        state.connection.registry.count(),
        session.as_ref(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use racewire_core::{SessionMarkers, SessionMetadata, SessionToken, SystemClock, TelemetrySample};
    use racewire_source::{SimulatedProvider, SourceAdapter};
    use tower::ServiceExt;

    fn make_server() -> RacewireServer {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let source = Arc::new(SourceAdapter::new(SimulatedProvider::new(90.0), clock.clone()));
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        RacewireServer::new(config, source, clock)
    }

    /// A provider whose connectivity check blows up.
    struct PanickingSource;

    impl TelemetrySource for PanickingSource {
        fn is_connected(&self) -> bool {
            panic!("provider crashed");
        }

        fn read_sample(&self, _session: Option<&SessionToken>) -> Option<TelemetrySample> {
            None
        }

        fn read_markers(&self) -> Option<SessionMarkers> {
            None
        }

        fn read_metadata(&self, _session: &SessionToken) -> Option<SessionMetadata> {
            None
        }
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_subscribers_and_session() {
        let server = make_server();
        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["subscribers"], 0);
        assert!(parsed["session"].is_null());

        server
            .current_session()
            .set(Some(SessionToken::from_raw("01012025120000")));
        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["session"], "01012025120000");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn bind_retry_gives_up_while_address_is_held() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap().to_string();

        let err = bind_with_retry(&addr, 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            ServerError::BindExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bind_retry_succeeds_once_address_frees_up() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap().to_string();
        let _release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        });

        let listener = bind_with_retry(&addr, 20, Duration::from_millis(25)).await;
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn invalid_address_fails_without_retry() {
        let err = bind_with_retry("not-an-address", 5, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn start_runs_all_tasks_until_shutdown() {
        let server = make_server();
        let running = server.start().await.unwrap();
        assert!(!running.listener.is_finished());

        let handles = running.into_handles();
        assert_eq!(handles.len(), 3);
        assert!(
            server
                .shutdown()
                .graceful_shutdown(handles, Some(Duration::from_secs(5)))
                .await
        );
    }

    #[tokio::test]
    async fn first_exit_names_a_crashed_task() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = RacewireServer::new(config, Arc::new(PanickingSource), Arc::new(SystemClock));
        let mut running = server.start().await.unwrap();

        let (task, result) = tokio::time::timeout(Duration::from_secs(5), running.first_exit())
            .await
            .unwrap();
        assert_eq!(task, "session_tracker");
        assert!(result.unwrap_err().is_panic());

        let handles = running.into_handles();
        assert_eq!(handles.len(), 2);
        assert!(
            server
                .shutdown()
                .graceful_shutdown(handles, Some(Duration::from_secs(5)))
                .await
        );
    }

    #[tokio::test]
    async fn first_exit_reports_a_task_that_returned() {
        let mut running = RunningServer {
            addr: "127.0.0.1:0".parse().unwrap(),
            listener: tokio::spawn(std::future::pending::<()>()),
            session_tracker: tokio::spawn(std::future::pending::<()>()),
            sampler: tokio::spawn(async {}),
        };
        let (task, result) = running.first_exit().await;
        assert_eq!(task, "sampler");
        assert!(result.is_ok());
        for handle in running.into_handles() {
            handle.abort();
        }
    }
}
