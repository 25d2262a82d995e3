//! Cancellable timer primitives used by the transport heartbeat, the
//! graceful-shutdown deadline, and the reconnect backoff.
//!
//! Each scheduled task gets its own child [`CancellationToken`] derived from
//! the [`Scheduler`]'s root token, so cancelling the scheduler (on process
//! shutdown) cancels every outstanding timer without the caller having to
//! track handles individually.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;

/// Handle to a scheduled task. Dropping it does not cancel the task; call
/// [`TaskHandle::cancel`] explicitly, or cancel the owning [`Scheduler`].
pub struct TaskHandle {
    token: CancellationToken,
}

impl TaskHandle {
    /// Cancels the task. A no-op if it already ran or was already cancelled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` if the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Schedules one-shot and periodic work on top of a [`TaskSpawner`].
///
/// This is the only place in the engine that touches `tokio::time`
/// directly; the transport, session, and supervisor code schedule through
/// here so a single root token can cancel every timer during shutdown.
#[derive(Clone)]
pub struct Scheduler<S: TaskSpawner + Clone> {
    spawner: S,
    root: CancellationToken,
}

impl<S: TaskSpawner + Clone + 'static> Scheduler<S> {
    #[must_use]
    pub fn new(spawner: S) -> Self {
        Self {
            spawner,
            root: CancellationToken::new(),
        }
    }

    /// Cancels every task scheduled through this scheduler.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Runs `task` once after `delay`, unless cancelled first.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.root.child_token();
        let handle = TaskHandle {
            token: token.clone(),
        };
        self.spawner.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => task(),
            }
        });
        handle
    }

    /// Runs `task` every `interval`, until cancelled. The first invocation
    /// happens after one interval, not immediately.
    pub fn schedule_periodic<F>(&self, interval: Duration, mut task: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let token = self.root.child_token();
        let handle = TaskHandle {
            token: token.clone(),
        };
        self.spawner.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => task(),
                }
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn schedule_once_runs_after_delay() {
        let scheduler = Scheduler::new(TokioSpawner::current());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        scheduler.schedule_once(Duration::from_millis(50), move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_handle_prevents_execution() {
        let scheduler = Scheduler::new(TokioSpawner::current());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let handle = scheduler.schedule_once(Duration::from_millis(50), move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_periodic_runs_repeatedly_until_shutdown() {
        let scheduler = Scheduler::new(TokioSpawner::current());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        scheduler.schedule_periodic(Duration::from_millis(20), move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(65)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        scheduler.shutdown();
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
