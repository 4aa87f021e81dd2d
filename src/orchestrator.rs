//! Campaign orchestrator facade.
//!
//! Wires the store, timer service, and session worker together: owns the
//! timer-fire event loop, the immediate-mode loop handle, restart resync,
//! and the broadcast stream of campaign events consumed by host frontends.

use crate::config::OrchestratorConfig;
use crate::dispatch::SessionDispatcher;
use crate::journal::{LogEntry, LogRecorder};
use crate::manager::RunManager;
use crate::store::{RunMode, StateStore, now_epoch_millis};
use crate::timers::{TimerFire, TimerService};
use crate::worker::SessionWorker;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broadcast capacity for campaign events.
const EVENT_CAPACITY: usize = 128;

/// Lifecycle and outcome notifications for frontends.
#[derive(Debug, Clone)]
pub enum CampaignEvent {
    /// A run was started.
    RunStarted {
        /// The new run's id.
        run_id: String,
        /// Its triggering discipline.
        mode: RunMode,
    },
    /// A run ended, either by the terminal timer or naturally.
    RunFinished {
        /// The finished run's id.
        run_id: String,
    },
    /// A session outcome was recorded to the journal.
    SessionRecorded {
        /// The owning run's id.
        run_id: String,
        /// The recorded entry.
        entry: LogEntry,
    },
}

/// Flat status view of the persisted state, for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatus {
    /// Whether a run is active.
    pub is_running: bool,
    /// Active run id, if any.
    pub run_id: Option<String>,
    /// Active run mode, if any.
    pub mode: Option<RunMode>,
    /// Active run keyword pool.
    pub keywords: Vec<String>,
    /// Run start, epoch milliseconds.
    pub start_ts: Option<u64>,
    /// Run start, RFC 3339.
    pub started_at: Option<String>,
    /// Campaign length in days (scheduled mode).
    pub days: Option<u32>,
    /// Days with recorded progress (scheduled mode).
    pub days_completed: Option<u32>,
    /// Number of generated session slots (scheduled mode).
    pub scheduled_sessions: Option<usize>,
    /// Journal length.
    pub log_count: usize,
    /// Whether a suggestion credential is present.
    pub credential_present: bool,
    /// Stale timer fires / results dropped since startup.
    pub stale_events_dropped: u64,
}

struct ImmediateRun {
    run_id: String,
    cancel: CancellationToken,
}

/// The campaign orchestrator.
pub struct CampaignOrchestrator {
    store: Arc<dyn StateStore>,
    manager: RunManager,
    dispatcher: Arc<SessionDispatcher>,
    recorder: LogRecorder,
    event_tx: broadcast::Sender<CampaignEvent>,
    immediate: Mutex<Option<ImmediateRun>>,
}

impl CampaignOrchestrator {
    /// Wire an orchestrator over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        worker: Arc<dyn SessionWorker>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let (event_tx, _event_rx) = broadcast::channel(EVENT_CAPACITY);
        let dispatcher = Arc::new(SessionDispatcher::new(
            Arc::clone(&store),
            worker,
            config.dispatch.clone(),
            config.journal.max_entries,
            event_tx.clone(),
        ));
        let recorder = LogRecorder::new(Arc::clone(&store), config.journal.max_entries);
        let manager = RunManager::new(Arc::clone(&store), timers, config);

        Arc::new(Self {
            store,
            manager,
            dispatcher,
            recorder,
            event_tx,
            immediate: Mutex::new(None),
        })
    }

    /// Subscribe to campaign events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.event_tx.subscribe()
    }

    /// Start a scheduled run.
    pub fn start(&self, keywords: Vec<String>) -> crate::Result<String> {
        let run_id = self.manager.start(keywords)?;
        let _ = self.event_tx.send(CampaignEvent::RunStarted {
            run_id: run_id.clone(),
            mode: RunMode::Scheduled,
        });
        Ok(run_id)
    }

    /// Start an immediate run and its dispatcher loop.
    pub fn start_immediate(self: &Arc<Self>, keywords: Vec<String>) -> crate::Result<String> {
        let run_id = self.manager.start_immediate(keywords)?;
        self.spawn_immediate_loop(run_id.clone());
        let _ = self.event_tx.send(CampaignEvent::RunStarted {
            run_id: run_id.clone(),
            mode: RunMode::Immediate,
        });
        Ok(run_id)
    }

    /// Stop the active run. Idempotent; returns the stopped run id, if any.
    pub fn stop(&self) -> crate::Result<Option<String>> {
        let stopped = self.manager.stop()?;

        // Best-effort cancellation: shortcut the loop's backoff, but let an
        // in-flight worker invocation finish. Its result is dropped by the
        // stale-run check when it lands.
        let previous = self
            .immediate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(run) = previous {
            debug!(run_id = %run.run_id, "cancelling immediate loop");
            run.cancel.cancel();
        }

        Ok(stopped)
    }

    /// Flat status view plus diagnostics.
    #[must_use]
    pub fn status(&self) -> CampaignStatus {
        let state = self.store.snapshot();
        let run = state.run.as_ref();
        CampaignStatus {
            is_running: state.is_running(),
            run_id: run.map(|r| r.run_id.clone()),
            mode: run.map(|r| r.mode),
            keywords: run.map(|r| r.keywords.clone()).unwrap_or_default(),
            start_ts: run.map(|r| r.start_ts),
            started_at: run.and_then(|r| {
                chrono::DateTime::from_timestamp_millis(i64::try_from(r.start_ts).ok()?)
                    .map(|ts| ts.to_rfc3339())
            }),
            days: run
                .filter(|r| r.mode == RunMode::Scheduled)
                .map(|r| r.days),
            days_completed: run
                .filter(|r| r.mode == RunMode::Scheduled)
                .map(|r| r.days_completed),
            scheduled_sessions: run
                .filter(|r| r.mode == RunMode::Scheduled)
                .map(|r| r.schedule.len()),
            log_count: state.logs.len(),
            credential_present: state.credential.is_some(),
            stale_events_dropped: self.dispatcher.stale_events_dropped(),
        }
    }

    /// Journal access for the control surface.
    #[must_use]
    pub fn recorder(&self) -> &LogRecorder {
        &self.recorder
    }

    /// Set or clear the suggestion credential. Returns whether one is
    /// present afterwards.
    pub fn set_credential(&self, value: Option<String>) -> crate::Result<bool> {
        let state = self.store.update(&mut |state| {
            state.credential = value.clone().filter(|v| !v.trim().is_empty());
        })?;
        Ok(state.credential.is_some())
    }

    /// The stored suggestion credential, if present.
    #[must_use]
    pub fn credential(&self) -> Option<String> {
        self.store.snapshot().credential
    }

    /// Spawn the timer-fire event loop.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut fire_rx: mpsc::UnboundedReceiver<TimerFire>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(fire) = fire_rx.recv().await {
                this.handle_fire(fire);
            }
            debug!("timer fire channel closed, event loop exiting");
        })
    }

    /// Rebuild runtime state from the persisted document after a restart:
    /// re-register pending timers for a scheduled run (idempotent), or
    /// resume the immediate loop. Returns how many timers were registered.
    pub fn resume(self: &Arc<Self>) -> usize {
        let state = self.store.snapshot();
        let Some(run) = state.run else {
            return 0;
        };

        match run.mode {
            RunMode::Scheduled => {
                let now = now_epoch_millis();
                let mut registered = 0;
                let mut missed = 0;
                for entry in &run.schedule {
                    if entry.fires_at >= now {
                        self.manager.register_timer(&entry.timer_name, entry.fires_at);
                        registered += 1;
                    } else {
                        missed += 1;
                    }
                }
                if let Some(end) = &run.end_timer {
                    // A past-due terminal timer fires immediately and
                    // finishes the run.
                    self.manager.register_timer(&end.timer_name, end.fires_at);
                    registered += 1;
                }
                info!(
                    run_id = %run.run_id,
                    registered,
                    missed,
                    "resynced scheduled run timers"
                );
                registered
            }
            RunMode::Immediate => {
                info!(run_id = %run.run_id, "resuming immediate run");
                self.spawn_immediate_loop(run.run_id);
                0
            }
        }
    }

    fn spawn_immediate_loop(self: &Arc<Self>, run_id: String) {
        let cancel = CancellationToken::new();
        tokio::spawn(
            Arc::clone(&self.dispatcher).run_immediate_loop(run_id.clone(), cancel.clone()),
        );

        let mut guard = self
            .immediate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = guard.replace(ImmediateRun { run_id, cancel }) {
            previous.cancel.cancel();
        }
    }

    /// Handle one fired timer against the current persisted state.
    fn handle_fire(self: &Arc<Self>, fire: TimerFire) {
        let state = self.store.snapshot();
        let Some(run) = state.run else {
            self.dispatcher.note_stale(&format!("timer '{}'", fire.name));
            return;
        };

        let owned = state
            .timer_index
            .get(&run.run_id)
            .is_some_and(|names| names.contains(&fire.name));
        if !owned {
            self.dispatcher.note_stale(&format!("timer '{}'", fire.name));
            return;
        }

        if run
            .end_timer
            .as_ref()
            .is_some_and(|end| end.timer_name == fire.name)
        {
            match self.manager.finish(&run.run_id) {
                Ok(true) => {
                    let _ = self.event_tx.send(CampaignEvent::RunFinished {
                        run_id: run.run_id.clone(),
                    });
                }
                Ok(false) => {
                    self.dispatcher
                        .note_stale(&format!("terminal timer '{}'", fire.name));
                }
                Err(e) => warn!("failed to finish run '{}': {e}", run.run_id),
            }
            return;
        }

        // A live session slot: each fire dispatches exactly one session,
        // concurrent fires each get their own task.
        let dispatcher = Arc::clone(&self.dispatcher);
        let run_id = run.run_id.clone();
        let keywords = run.keywords.clone();
        tokio::spawn(async move {
            dispatcher.run_scheduled_session(run_id, keywords).await;
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::MemoryStateStore;
    use crate::timers::ManualTimerService;
    use crate::worker::ScriptedWorker;
    use std::time::Duration;

    fn orchestrator() -> (
        Arc<CampaignOrchestrator>,
        Arc<MemoryStateStore>,
        Arc<ManualTimerService>,
        Arc<ScriptedWorker>,
    ) {
        let store = Arc::new(MemoryStateStore::new());
        let timers = Arc::new(ManualTimerService::new());
        let worker = Arc::new(ScriptedWorker::new());
        let orchestrator = CampaignOrchestrator::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&timers) as Arc<dyn TimerService>,
            Arc::clone(&worker) as Arc<dyn SessionWorker>,
            OrchestratorConfig::default(),
        );
        (orchestrator, store, timers, worker)
    }

    #[tokio::test]
    async fn status_reflects_started_run() {
        let (orchestrator, _store, _timers, _worker) = orchestrator();

        let idle = orchestrator.status();
        assert!(!idle.is_running);
        assert!(idle.run_id.is_none());

        let run_id = orchestrator.start(vec!["a".to_owned()]).expect("start");
        let status = orchestrator.status();
        assert!(status.is_running);
        assert_eq!(status.run_id.as_deref(), Some(run_id.as_str()));
        assert_eq!(status.mode, Some(RunMode::Scheduled));
        assert_eq!(status.days, Some(7));
        assert_eq!(status.days_completed, Some(0));
        assert!(status.started_at.is_some());
        assert!(status.scheduled_sessions.is_some());
    }

    #[tokio::test]
    async fn terminal_fire_finishes_run_and_emits_event() {
        let (orchestrator, store, _timers, _worker) = orchestrator();
        let mut events = orchestrator.subscribe();

        let run_id = orchestrator.start(vec!["a".to_owned()]).expect("start");
        let started = events.recv().await.expect("started event");
        assert!(matches!(started, CampaignEvent::RunStarted { .. }));

        orchestrator.handle_fire(TimerFire {
            name: format!("{run_id}:end"),
        });

        let finished = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        match finished {
            CampaignEvent::RunFinished { run_id: finished_id } => {
                assert_eq!(finished_id, run_id);
            }
            other => panic!("expected RunFinished, got {other:?}"),
        }
        assert!(!store.snapshot().is_running());
    }

    #[tokio::test]
    async fn stale_fire_is_dropped_and_counted() {
        let (orchestrator, store, _timers, _worker) = orchestrator();
        orchestrator.start(vec!["a".to_owned()]).expect("start");

        orchestrator.handle_fire(TimerFire {
            name: "other-run:0:123".to_owned(),
        });

        assert_eq!(orchestrator.status().stale_events_dropped, 1);
        assert!(store.snapshot().logs.is_empty());
    }

    #[tokio::test]
    async fn session_fire_dispatches_and_records() {
        let (orchestrator, store, _timers, worker) = orchestrator();
        worker.push_success("a", 12.0);

        let run_id = orchestrator.start(vec!["a".to_owned()]).expect("start");
        let first_slot = store
            .snapshot()
            .run
            .expect("run")
            .schedule
            .first()
            .expect("slots")
            .timer_name
            .clone();

        orchestrator.handle_fire(TimerFire { name: first_slot });

        // The session runs on a spawned task; wait for the journal entry.
        for _ in 0..200 {
            if !store.snapshot().logs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let logs = store.snapshot().logs;
        assert_eq!(logs.len(), 1);
        assert_eq!(worker.requests()[0].run_id, run_id);
    }

    #[tokio::test]
    async fn resume_reregisters_future_slots_and_terminal_timer() {
        let (orchestrator, store, timers, _worker) = orchestrator();
        orchestrator.start(vec!["a".to_owned()]).expect("start");

        let run = store.snapshot().run.expect("run");
        let expected = run
            .schedule
            .iter()
            .filter(|entry| entry.fires_at >= now_epoch_millis())
            .count()
            + 1;

        // Simulate a restart losing the in-memory timer set.
        for name in timers.registered() {
            timers.cancel(&name);
        }
        assert!(timers.registered().is_empty());

        let registered = orchestrator.resume();
        assert_eq!(registered, expected);
        assert!(timers.fires_at(&format!("{}:end", run.run_id)).is_some());
    }

    #[tokio::test]
    async fn resume_without_run_is_a_noop() {
        let (orchestrator, _store, timers, _worker) = orchestrator();
        assert_eq!(orchestrator.resume(), 0);
        assert!(timers.registered().is_empty());
    }

    #[tokio::test]
    async fn stop_cancels_immediate_loop() {
        let (orchestrator, store, _timers, worker) = orchestrator();
        worker.push_success("x", 1.0);

        let run_id = orchestrator
            .start_immediate(vec!["x".to_owned()])
            .expect("start");
        assert_eq!(store.snapshot().active_run_id(), Some(run_id.as_str()));

        let stopped = orchestrator.stop().expect("stop");
        assert_eq!(stopped.as_deref(), Some(run_id.as_str()));
        assert!(!store.snapshot().is_running());

        // Idempotent.
        assert_eq!(orchestrator.stop().expect("stop again"), None);
    }

    #[tokio::test]
    async fn credential_roundtrip_and_presence() {
        let (orchestrator, _store, _timers, _worker) = orchestrator();
        assert!(!orchestrator.status().credential_present);

        assert!(orchestrator
            .set_credential(Some("token-1".to_owned()))
            .expect("set"));
        assert!(orchestrator.status().credential_present);
        assert_eq!(orchestrator.credential().as_deref(), Some("token-1"));

        assert!(!orchestrator.set_credential(None).expect("clear"));
        assert!(!orchestrator.status().credential_present);

        // Blank values count as absent.
        assert!(!orchestrator
            .set_credential(Some("   ".to_owned()))
            .expect("blank"));
    }
}
