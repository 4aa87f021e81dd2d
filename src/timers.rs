//! One-shot named timer service.
//!
//! The orchestrator only needs "wake me at time T under this name":
//! registration is idempotent (re-registering a name replaces the pending
//! timer, never duplicates it), names are individually cancellable, and
//! fired timers deliver a [`TimerFire`] over an mpsc channel consumed by
//! the orchestrator's event loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A fired timer, delivered to the orchestrator event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    /// The registered timer name.
    pub name: String,
}

/// Named one-shot timer registration.
pub trait TimerService: Send + Sync {
    /// Register (or replace) a timer. Firing at a time already in the past
    /// delivers immediately.
    fn register(&self, name: &str, fires_at_ms: u64);

    /// Cancel a pending timer. Returns `true` when one was pending.
    fn cancel(&self, name: &str) -> bool;

    /// Cancel a batch of timers, returning how many were pending.
    fn cancel_many(&self, names: &[String]) -> usize {
        names.iter().filter(|name| self.cancel(name)).count()
    }

    /// Names of currently pending timers.
    fn registered(&self) -> Vec<String>;
}

/// Tokio-backed timer service: one sleeping task per pending timer.
pub struct TokioTimerService {
    fire_tx: mpsc::UnboundedSender<TimerFire>,
    handles: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TokioTimerService {
    /// Create a timer service delivering fires on `fire_tx`.
    #[must_use]
    pub fn new(fire_tx: mpsc::UnboundedSender<TimerFire>) -> Self {
        Self {
            fire_tx,
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl TimerService for TokioTimerService {
    fn register(&self, name: &str, fires_at_ms: u64) {
        let delay_ms = fires_at_ms.saturating_sub(crate::store::now_epoch_millis());
        let fire_tx = self.fire_tx.clone();
        let handles = Arc::clone(&self.handles);
        let task_name = name.to_owned();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            if fire_tx
                .send(TimerFire {
                    name: task_name.clone(),
                })
                .is_err()
            {
                debug!("timer fire channel closed, dropping '{task_name}'");
            }
            if let Ok(mut guard) = handles.lock() {
                guard.remove(&task_name);
            }
        });

        let mut guard = self
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = guard.insert(name.to_owned(), handle) {
            previous.abort();
        }
    }

    fn cancel(&self, name: &str) -> bool {
        let mut guard = self
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.remove(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn registered(&self) -> Vec<String> {
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// Manual timer service for tests: records registrations, never fires on
/// its own. Tests inject [`TimerFire`] messages directly into the
/// orchestrator's channel.
#[derive(Debug, Default)]
pub struct ManualTimerService {
    pending: Mutex<BTreeMap<String, u64>>,
}

impl ManualTimerService {
    /// Create an empty manual timer service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered fire time for `name`, if pending.
    #[must_use]
    pub fn fires_at(&self, name: &str) -> Option<u64> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

impl TimerService for ManualTimerService {
    fn register(&self, name: &str, fires_at_ms: u64) {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.to_owned(), fires_at_ms);
    }

    fn cancel(&self, name: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    fn registered(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::now_epoch_millis;

    #[tokio::test]
    async fn registered_timer_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimerService::new(tx);

        timers.register("t1", now_epoch_millis());

        let fire = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("fire in time")
            .expect("channel open");
        assert_eq!(fire.name, "t1");
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "one-shot timer must not fire twice"
        );
    }

    #[tokio::test]
    async fn reregistration_replaces_without_duplicate_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimerService::new(tx);

        // First registration far in the future, replacement immediate.
        timers.register("t1", now_epoch_millis() + 60_000);
        timers.register("t1", now_epoch_millis());

        let fire = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("fire in time")
            .expect("channel open");
        assert_eq!(fire.name, "t1");
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "replaced timer must not also fire"
        );
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimerService::new(tx);

        timers.register("t1", now_epoch_millis() + 50);
        assert!(timers.cancel("t1"));
        assert!(!timers.cancel("t1"));

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn past_fire_time_delivers_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimerService::new(tx);

        timers.register("late", 1);
        let fire = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("fire in time")
            .expect("channel open");
        assert_eq!(fire.name, "late");
    }

    #[test]
    fn manual_service_tracks_registrations() {
        let timers = ManualTimerService::new();
        timers.register("a", 100);
        timers.register("b", 200);
        timers.register("a", 150);

        assert_eq!(timers.fires_at("a"), Some(150));
        assert_eq!(timers.registered().len(), 2);
        assert!(timers.cancel("a"));
        assert_eq!(timers.registered(), vec!["b".to_owned()]);
        assert_eq!(
            timers.cancel_many(&["b".to_owned(), "missing".to_owned()]),
            1
        );
    }
}
