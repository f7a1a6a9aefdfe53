//! Lifecycle controller with a cancellation signal and in-flight tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions, a `watch` channel as the
//! cancellation signal observed by long-running loops, and an atomic counter
//! with RAII guards for commands currently being applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle state of a pipeline component.
///
/// State machine: Starting -> Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed but not yet running.
    Starting,
    /// Workers or pollers are active.
    Running,
    /// Stop requested; current iterations are finishing.
    Draining,
    /// Every task has exited.
    Stopped,
}

/// Coordinates start/stop of a component's background tasks.
#[derive(Debug)]
pub struct Lifecycle {
    cancel: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<LifecycleState>,
}

impl Lifecycle {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (cancel, _rx) = watch::channel(false);
        Self {
            cancel,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(LifecycleState::Starting),
        }
    }

    /// Moves to `Running`.
    pub fn set_running(&self) {
        self.state.store(Arc::new(LifecycleState::Running));
    }

    /// Moves to `Stopped`.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns a receiver that observes the cancellation signal.
    ///
    /// Pass it to [`cancelled`] inside a `select!` next to the loop's main
    /// suspension point.
    #[must_use]
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Moves to `Draining` without firing the cancellation signal.
    pub fn set_draining(&self) {
        self.state.store(Arc::new(LifecycleState::Draining));
    }

    /// Moves to `Draining` and fires the cancellation signal.
    ///
    /// The value is stored even when nobody is subscribed, so receivers
    /// created later observe it too.
    pub fn cancel(&self) {
        self.set_draining();
        self.cancel.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Tracks one unit of in-flight work until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Units of work currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the cancellation signal has fired.
///
/// A dropped sender counts as cancellation.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

/// RAII guard that decrements the in-flight counter when dropped, including
/// during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn state_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);

        lifecycle.set_running();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        lifecycle.cancel();
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(lifecycle.is_cancelled());

        lifecycle.set_stopped();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn in_flight_guards_count() {
        let lifecycle = Lifecycle::new();
        let a = lifecycle.in_flight_guard();
        let b = lifecycle.in_flight_guard();
        assert_eq!(lifecycle.in_flight_count(), 2);

        drop(a);
        assert_eq!(lifecycle.in_flight_count(), 1);
        drop(b);
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let lifecycle = Arc::new(Lifecycle::new());
        let mut rx = lifecycle.cancellation();

        let waiter = tokio::spawn(async move {
            cancelled(&mut rx).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        lifecycle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should observe cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn late_subscribers_see_prior_cancellation() {
        let lifecycle = Lifecycle::new();
        lifecycle.cancel();

        let mut rx = lifecycle.cancellation();
        tokio::time::timeout(Duration::from_secs(1), cancelled(&mut rx))
            .await
            .expect("already-cancelled signal resolves immediately");
    }

    #[test]
    fn cancel_without_subscribers_is_remembered() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_cancelled());

        lifecycle.cancel();
        assert!(lifecycle.is_cancelled());
        assert!(*lifecycle.cancellation().borrow());
    }

    #[test]
    fn set_draining_leaves_signal_unfired() {
        let lifecycle = Lifecycle::new();
        lifecycle.set_running();
        lifecycle.set_draining();
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(!lifecycle.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_cancelled() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.cancellation();
        drop(lifecycle);

        tokio::time::timeout(Duration::from_secs(1), cancelled(&mut rx))
            .await
            .expect("closed channel resolves");
    }
}
