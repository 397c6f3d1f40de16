//! Counting of in-flight background work.
//!
//! Saves and exports run on background tasks. The UI only needs to know how
//! many were started and how many have finished, so the tracker keeps two
//! monotonic counters and nothing else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Snapshot of the tracker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCounts {
    pub started: u64,
    pub finished: u64,
}

impl TaskCounts {
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.finished)
    }
}

/// Shared counters for background save/export tasks.
///
/// Cloning is cheap and every clone observes the same counters.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    started: AtomicU64,
    finished: AtomicU64,
    drained: Notify,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a background unit has begun.
    pub fn task_started(&self) {
        let started = self.inner.started.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!("Task started ({} started)", started);
    }

    /// Records that a background unit has ended, successfully or not.
    ///
    /// Pairing is the caller's job; an unmatched finish is logged and ignored
    /// so the finished count never overtakes the started count.
    pub fn task_finished(&self) {
        let result = self
            .inner
            .finished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |finished| {
                (finished < self.inner.started.load(Ordering::SeqCst)).then_some(finished + 1)
            });

        match result {
            Ok(previous) => {
                tracing::trace!("Task finished ({} finished)", previous + 1);
                if self.is_drained() {
                    self.inner.drained.notify_waiters();
                }
            }
            Err(_) => tracing::warn!("task_finished called without a matching task_started"),
        }
    }

    /// Brackets a unit of work: started now, finished when the guard drops.
    pub fn track(&self) -> TaskGuard {
        self.task_started();
        TaskGuard {
            tracker: self.clone(),
        }
    }

    pub fn counts(&self) -> TaskCounts {
        // finished first so a concurrent start can only widen the gap
        let finished = self.inner.finished.load(Ordering::SeqCst);
        let started = self.inner.started.load(Ordering::SeqCst);
        TaskCounts { started, finished }
    }

    pub fn in_flight(&self) -> u64 {
        self.counts().in_flight()
    }

    pub fn is_drained(&self) -> bool {
        self.in_flight() == 0
    }

    /// Resolves once every started task has finished.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

/// Marks a tracked task finished when dropped.
#[derive(Debug)]
pub struct TaskGuard {
    tracker: TaskTracker,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker.task_finished();
    }
}
