//! Rate-limited publishing of the reported state
//!
//! Trailing-edge coalescing: the first notification publishes right away,
//! further notifications inside the interval collapse into one publish at the
//! end of it, and a quiet interval puts the worker back to sleep.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Pushes the current reported state to the backend
///
/// Implementations log their own failures.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish_state(&self);
}

struct Inner {
    publisher: Arc<dyn StatePublisher>,
    interval: Duration,
    update_required: AtomicBool,
    update_scheduled: AtomicBool,
    wake: Notify,
}

pub struct UpdateThrottler {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateThrottler {
    /// Create a throttler and start its worker
    pub fn new(publisher: Arc<dyn StatePublisher>, interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            publisher,
            interval,
            update_required: AtomicBool::new(false),
            update_scheduled: AtomicBool::new(false),
            wake: Notify::new(),
        });
        let worker = tokio::spawn(worker_loop(inner.clone()));

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Signal that local state changed
    pub fn notify(&self) {
        let inner = &self.inner;
        debug!(
            required = inner.update_required.load(Ordering::SeqCst),
            scheduled = inner.update_scheduled.load(Ordering::SeqCst),
            "Local shadow updated"
        );
        inner.update_required.store(true, Ordering::SeqCst);
        if inner
            .update_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!("Scheduling update immediately");
            inner.wake.notify_one();
        } else {
            trace!("Update already scheduled");
        }
    }

    /// Publish now, outside the throttling schedule
    pub async fn update_immediately(&self) {
        self.inner.publisher.publish_state().await;
    }

    /// Cancel any scheduled run
    pub fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.abort();
        }
    }
}

impl Drop for UpdateThrottler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    loop {
        inner.wake.notified().await;

        loop {
            if inner.update_required.swap(false, Ordering::SeqCst) {
                debug!("Updating cloud shadow");
                inner.publisher.publish_state().await;
                tokio::time::sleep(inner.interval).await;
                continue;
            }

            trace!("Nothing to update, going idle");
            inner.update_scheduled.store(false, Ordering::SeqCst);

            // A notify() that saw `scheduled` still set has not woken us
            let missed = inner.update_required.load(Ordering::SeqCst)
                && inner
                    .update_scheduled
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
            if !missed {
                break;
            }
        }
    }
}
