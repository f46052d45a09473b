//! Graceful shutdown via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Used when the caller gives no grace period.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One token shared by the listener, the periodic tasks and every connection.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for `handles` to finish.
    ///
    /// Returns `true` when every task finished cleanly inside the grace
    /// period. Tasks still running afterwards are aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = timeout.as_millis() as u64,
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);

        match tokio::time::timeout(timeout, drain).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_err()).count();
                for err in results.into_iter().filter_map(Result::err) {
                    error!(error = %err, "task ended abnormally during shutdown");
                }
                failed == 0
            }
            Err(_) => {
                warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
        assert!(!coord.token().is_cancelled());
    }

    #[test]
    fn shutdown_reaches_every_token() {
        let coord = ShutdownCoordinator::new();
        let tokens: Vec<_> = (0..3).map(|_| coord.token()).collect();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test]
    async fn drains_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        assert!(coord.graceful_shutdown(vec![handle], None).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_times_out() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let clean = coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(!clean);
    }

    #[tokio::test]
    async fn panicked_task_is_reported() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async { panic!("sampler exploded") });
        assert!(!coord.graceful_shutdown(vec![handle], None).await);
    }
}
