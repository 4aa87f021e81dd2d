//! Session dispatch: timer-triggered sessions and the immediate-mode loop.
//!
//! Both modes share one worker-invocation contract and one outcome path.
//! Every recorded outcome re-checks the active run id inside the store's
//! read-modify-write, so results from a stopped run are dropped instead of
//! corrupting the next run's state.

use crate::config::DispatchConfig;
use crate::journal::{LogEntry, push_entry};
use crate::orchestrator::CampaignEvent;
use crate::store::{RunMode, StateStore, now_epoch_millis};
use crate::worker::{SessionError, SessionRequest, SessionWorker};
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fallback keyword pool used when a run has no keywords of its own.
pub const DEFAULT_KEYWORDS: &[&str] = &["news", "music", "technology", "travel", "cooking"];

/// Synthetic failure message for a worker that never responded.
pub const NO_RESPONSE_MESSAGE: &str = "no response from session worker";

/// Immediate-mode phase, advanced once per loop turn.
#[derive(Debug)]
enum LoopPhase {
    /// Pick a keyword and build the next session request.
    Dispatching,
    /// One session in flight; wait for its outcome.
    AwaitingResult(SessionRequest),
    /// Sleep before the next dispatch.
    Backoff(Duration),
}

/// Dispatches sessions and records their outcomes.
pub struct SessionDispatcher {
    store: Arc<dyn StateStore>,
    worker: Arc<dyn SessionWorker>,
    config: DispatchConfig,
    max_log_entries: usize,
    events: broadcast::Sender<CampaignEvent>,
    stale_events: AtomicU64,
}

impl SessionDispatcher {
    /// Create a dispatcher over the given store and worker.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        worker: Arc<dyn SessionWorker>,
        config: DispatchConfig,
        max_log_entries: usize,
        events: broadcast::Sender<CampaignEvent>,
    ) -> Self {
        Self {
            store,
            worker,
            config,
            max_log_entries: max_log_entries.max(1),
            events,
            stale_events: AtomicU64::new(0),
        }
    }

    /// How many stale timer fires / results have been dropped.
    #[must_use]
    pub fn stale_events_dropped(&self) -> u64 {
        self.stale_events.load(Ordering::Relaxed)
    }

    /// Note a stale event: dropped silently but kept observable.
    pub fn note_stale(&self, what: &str) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
        debug!("ignoring stale event: {what}");
    }

    /// Run one scheduled session slot to completion. Each slot fires at
    /// most once: launch failures are logged, never retried.
    pub async fn run_scheduled_session(&self, run_id: String, keywords: Vec<String>) {
        let keyword = pick_keyword(&keywords);
        let request = SessionRequest {
            session_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.clone(),
            keyword: keyword.clone(),
            max_watch_secs: self.config.max_watch_secs,
        };

        debug!(run_id = %run_id, keyword = %keyword, "dispatching scheduled session");
        let entry = match self.worker.run_session(request).await {
            Ok(report) => LogEntry::from(report),
            Err(SessionError::Launch(message)) => {
                warn!(run_id = %run_id, "session launch failed: {message}");
                LogEntry::failure(keyword, message)
            }
            Err(SessionError::NoResponse) => LogEntry::failure(keyword, NO_RESPONSE_MESSAGE),
        };

        if let Err(e) = self.record_outcome(&run_id, entry) {
            warn!(run_id = %run_id, "failed to record session outcome: {e}");
        }
    }

    /// Immediate-mode loop: exactly one session in flight, a randomized
    /// pause between sessions, a short fixed pause after a launch failure.
    ///
    /// The persisted run is re-checked at every iteration boundary; the
    /// loop ends when the run is gone or replaced. `cancel` only shortcuts
    /// the backoff sleep so a stop does not wait out a long delay.
    pub async fn run_immediate_loop(self: Arc<Self>, run_id: String, cancel: CancellationToken) {
        info!(run_id = %run_id, "immediate loop started");
        let mut phase = LoopPhase::Dispatching;

        loop {
            phase = match phase {
                LoopPhase::Dispatching => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let state = self.store.snapshot();
                    let Some(run) = state.run else { break };
                    if run.run_id != run_id {
                        break;
                    }

                    let keyword = pick_keyword(&run.keywords);
                    LoopPhase::AwaitingResult(SessionRequest {
                        session_id: uuid::Uuid::new_v4().to_string(),
                        run_id: run_id.clone(),
                        keyword,
                        max_watch_secs: self.config.max_watch_secs,
                    })
                }
                LoopPhase::AwaitingResult(request) => {
                    let keyword = request.keyword.clone();
                    debug!(run_id = %run_id, keyword = %keyword, "dispatching immediate session");

                    let (entry, delay) = match self.worker.run_session(request).await {
                        Ok(report) => (LogEntry::from(report), self.session_delay()),
                        Err(SessionError::Launch(message)) => {
                            warn!(run_id = %run_id, "session launch failed: {message}");
                            (
                                LogEntry::failure(keyword, message),
                                Duration::from_secs(self.config.launch_retry_delay_secs),
                            )
                        }
                        Err(SessionError::NoResponse) => (
                            LogEntry::failure(keyword, NO_RESPONSE_MESSAGE),
                            self.session_delay(),
                        ),
                    };

                    if let Err(e) = self.record_outcome(&run_id, entry) {
                        warn!(run_id = %run_id, "failed to record session outcome: {e}");
                    }
                    LoopPhase::Backoff(delay)
                }
                LoopPhase::Backoff(delay) => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    LoopPhase::Dispatching
                }
            };
        }

        info!(run_id = %run_id, "immediate loop exited");
    }

    /// Record one session outcome against `run_id`.
    ///
    /// Returns `Ok(false)` (and mutates nothing) when `run_id` is no longer
    /// the active run. Scheduled runs also advance `days_completed` here.
    pub fn record_outcome(&self, run_id: &str, entry: LogEntry) -> crate::Result<bool> {
        let mut recorded = false;
        self.store.update(&mut |state| {
            recorded = false;
            if state.active_run_id() != Some(run_id) {
                return;
            }

            if let Some(run) = state.run.as_mut() {
                if run.mode == RunMode::Scheduled {
                    let elapsed_days = u32::try_from(
                        now_epoch_millis().saturating_sub(run.start_ts) / crate::schedule::DAY_MS,
                    )
                    .unwrap_or(u32::MAX);
                    run.days_completed = run.days.min(elapsed_days.saturating_add(1));
                }
            }

            push_entry(state, entry.clone(), self.max_log_entries);
            recorded = true;
        })?;

        if recorded {
            let _ = self.events.send(CampaignEvent::SessionRecorded {
                run_id: run_id.to_owned(),
                entry,
            });
        } else {
            self.note_stale(&format!("session result for run '{run_id}'"));
        }
        Ok(recorded)
    }

    fn session_delay(&self) -> Duration {
        let min = self.config.min_session_delay_secs;
        let max = self.config.max_session_delay_secs.max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }
}

/// Uniform random pick from the run's keywords, falling back to the
/// built-in defaults so a pick never blocks on an empty list.
#[must_use]
pub fn pick_keyword(keywords: &[String]) -> String {
    let mut rng = rand::thread_rng();
    if let Some(keyword) = keywords.choose(&mut rng) {
        return keyword.clone();
    }
    DEFAULT_KEYWORDS
        .choose(&mut rng)
        .copied()
        .unwrap_or("news")
        .to_owned()
}
