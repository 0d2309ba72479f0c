use shared::gauge;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::metrics_defs::UPLOADS_INFLIGHT;

#[derive(Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts uploads that are still being relayed so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct DrainTracker {
    inner: Arc<Inner>,
}

impl DrainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of an upload. It stays in flight until the returned
    /// guard is dropped.
    pub fn begin(&self) -> InFlightGuard {
        let count = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!(UPLOADS_INFLIGHT).set(count as f64);
        InFlightGuard {
            tracker: self.clone(),
        }
    }

    fn end(&self) {
        let count = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!(UPLOADS_INFLIGHT).set(count as f64);
        if count == 0 {
            self.inner.idle.notify_waiters();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until nothing is in flight. Returns `false` if `timeout` passed first.
    pub async fn wait_for_quiescence(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                // Register before checking so a wakeup between the check and
                // the await is not lost.
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Keeps one upload counted as in flight for as long as it lives.
pub struct InFlightGuard {
    tracker: DrainTracker,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}
