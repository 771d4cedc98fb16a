// Cooperative stop signal shared by the whole process
//
// The flag moves from "running" to "stopped" exactly once and never resets.
// Long-running loops either poll `is_stopped()` once per iteration or wait on
// `wait_timeout()` instead of sleeping, so they wake as soon as a stop is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Process-wide, monotonic stop request.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<StopInner>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative stop.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn stop(&self) -> bool {
        let already = self.inner.stopped.swap(true, Ordering::SeqCst);
        if !already {
            info!("Stop requested, notifying cooperative consumers");
            self.inner.notify.notify_waiters();
        }
        !already
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking so a concurrent `stop()` cannot be missed.
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Waits up to `timeout` for a stop request.
    ///
    /// Returns `true` if the flag is set when the wait ends.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, self.stopped()).await;
        self.is_stopped()
    }
}
