//! Fixed-interval poll fallback.
//!
//! Used instead of the push channel when the identity's TLS policy cannot be
//! expressed by it. Each tick refreshes the list view and the active
//! resource. At most one tick is in flight; a tick that fires while the
//! previous one is still running is skipped, not queued. Dropping the
//! [`Poller`] cancels the tick in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::core::{ReadModel, ServerIdentity};

use super::catchup::refresh_current;

/// Single-flight gate.
#[derive(Debug, Clone, Default)]
pub struct PollGate {
    in_flight: Arc<AtomicBool>,
}

impl PollGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate, unless a tick already holds it.
    pub fn try_begin(&self) -> Option<PollGuard> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(PollGuard {
            in_flight: self.in_flight.clone(),
        })
    }

    /// Whether a tick is running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Held for the duration of one tick. Reopens the gate on drop.
#[derive(Debug)]
pub struct PollGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Poll loop for one identity.
pub struct Poller {
    identity: ServerIdentity,
    read_model: Arc<dyn ReadModel>,
    interval: Duration,
    gate: PollGate,
    in_flight: Option<AbortHandle>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("identity", &self.identity)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Create a poller.
    pub fn new(identity: ServerIdentity, read_model: Arc<dyn ReadModel>, interval: Duration) -> Self {
        Self {
            identity,
            read_model,
            interval,
            gate: PollGate::new(),
            in_flight: None,
        }
    }

    /// Start one tick in the background. Returns `None` if the previous tick
    /// is still in flight.
    pub fn tick(&mut self) -> Option<JoinHandle<()>> {
        let Some(guard) = self.gate.try_begin() else {
            debug!(identity = %self.identity, "poll tick skipped, previous still in flight");
            return None;
        };
        let read_model = self.read_model.clone();
        let identity = self.identity.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let report = refresh_current(read_model.as_ref(), &identity).await;
            debug!(identity = %identity, failures = report.failures, "poll tick done");
        });
        self.in_flight = Some(task.abort_handle());
        Some(task)
    }

    /// Tick forever at the configured interval, the first tick immediately.
    pub async fn run(&mut self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(tick) = self.in_flight.take() {
            tick.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CatchUpError, ResourceId};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct SlowModel {
        release: Notify,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl ReadModel for SlowModel {
        async fn refresh_list(&self, _identity: &ServerIdentity) -> Result<(), CatchUpError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }

        async fn pending_resources(
            &self,
            _identity: &ServerIdentity,
        ) -> Result<Vec<ResourceId>, CatchUpError> {
            Ok(Vec::new())
        }

        async fn refresh_resource(
            &self,
            _identity: &ServerIdentity,
            _resource: &ResourceId,
        ) -> Result<(), CatchUpError> {
            Ok(())
        }

        fn active_resource(&self, _identity: &ServerIdentity) -> Option<ResourceId> {
            None
        }
    }

    #[test]
    fn test_gate_single_flight() {
        let gate = PollGate::new();
        let guard = gate.try_begin().unwrap();
        assert!(gate.is_in_flight());
        assert!(gate.try_begin().is_none());
        drop(guard);
        assert!(gate.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let model = Arc::new(SlowModel {
            release: Notify::new(),
            lists: AtomicUsize::new(0),
        });
        let mut poller = Poller::new("alpha".into(), model.clone(), Duration::from_secs(8));

        let first = poller.tick().unwrap();
        tokio::task::yield_now().await;
        assert!(poller.tick().is_none());

        model.release.notify_one();
        first.await.unwrap();
        assert!(!poller.gate.is_in_flight());

        let second = poller.tick().unwrap();
        model.release.notify_one();
        second.await.unwrap();
        assert_eq!(model.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval() {
        let model = Arc::new(SlowModel {
            release: Notify::new(),
            lists: AtomicUsize::new(0),
        });
        let mut poller = Poller::new("alpha".into(), model.clone(), Duration::from_secs(8));
        let runner = tokio::spawn(async move { poller.run().await });

        // first tick blocks in refresh_list, so ticks at 8s and 16s are skipped
        tokio::time::sleep(Duration::from_secs(17)).await;
        assert_eq!(model.lists.load(Ordering::SeqCst), 1);

        model.release.notify_one();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(model.lists.load(Ordering::SeqCst), 2);
        runner.abort();
    }

    #[tokio::test]
    async fn test_dropping_poller_cancels_in_flight_tick() {
        let model = Arc::new(SlowModel {
            release: Notify::new(),
            lists: AtomicUsize::new(0),
        });
        let mut poller = Poller::new("alpha".into(), model.clone(), Duration::from_secs(8));
        let gate = poller.gate.clone();

        let tick = poller.tick().unwrap();
        tokio::task::yield_now().await;
        assert_eq!(model.lists.load(Ordering::SeqCst), 1);

        drop(poller);
        assert!(tick.await.unwrap_err().is_cancelled());
        assert!(!gate.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborting_run_cancels_in_flight_tick() {
        let model = Arc::new(SlowModel {
            release: Notify::new(),
            lists: AtomicUsize::new(0),
        });
        let mut poller = Poller::new("alpha".into(), model.clone(), Duration::from_secs(8));
        let gate = poller.gate.clone();
        let runner = tokio::spawn(async move { poller.run().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(gate.is_in_flight());
        runner.abort();
        let _ = runner.await;

        // the tick blocked in refresh_list is gone with the loop
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!gate.is_in_flight());
    }
}
