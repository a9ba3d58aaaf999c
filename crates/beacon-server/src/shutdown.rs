//! Server shutdown: say goodbye to displays, stop background work, drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::BroadcastHub;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What a drain accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Displays that were sent `server_shutdown`.
    pub notified: usize,
    pub finished: usize,
    /// Tasks still running at the deadline.
    pub aborted: usize,
}

/// Owns the server-wide cancellation token and the display goodbye.
///
/// Displays are notified at most once, before the token fires, so every
/// open stream carries `server_shutdown` as its last frame.
pub struct ShutdownCoordinator {
    hub: Arc<BroadcastHub>,
    token: CancellationToken,
    notified: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self {
            hub,
            token: CancellationToken::new(),
            notified: AtomicBool::new(false),
        }
    }

    /// Child token for a background task.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Notify displays and cancel. Returns how many displays were notified;
    /// zero on repeat calls.
    pub fn shutdown(&self) -> usize {
        let notified = if self.notified.swap(true, Ordering::AcqRel) {
            0
        } else {
            self.hub.shutdown()
        };
        self.token.cancel();
        notified
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down, then wait up to `timeout` for `handles`. Stragglers are
    /// aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> ShutdownReport {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let notified = self.shutdown();
        info!(
            notified,
            tasks = handles.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining server tasks"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ShutdownReport {
            notified,
            ..ShutdownReport::default()
        };
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.finished += 1,
                Err(_) => {
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }
        if report.aborted > 0 {
            warn!(aborted = report.aborted, "drain deadline passed, tasks aborted");
        }
        report
    }
}
