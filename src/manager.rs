//! Run lifecycle: start, stop, and terminal completion.
//!
//! The manager owns the single-active-run invariant. Every decision is
//! made against the persisted state inside one store update, never against
//! an in-memory cache, so the invariant survives process restarts and
//! concurrent control requests.

use crate::config::OrchestratorConfig;
use crate::schedule::{build_entries, end_entry, generate_schedule};
use crate::store::{ActiveRun, RunMode, StateStore, now_epoch_millis};
use crate::timers::TimerService;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use tracing::{debug, info};

/// Hard cap on a run's keyword list.
const MAX_KEYWORDS: usize = 20;

/// Run lifecycle manager.
pub struct RunManager {
    store: Arc<dyn StateStore>,
    timers: Arc<dyn TimerService>,
    config: OrchestratorConfig,
}

impl RunManager {
    /// Create a manager over the given store and timer service.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            timers,
            config,
        }
    }

    /// Start a scheduled run.
    ///
    /// Generates the full multi-day schedule, persists the run together
    /// with its timer index, then registers one timer per session slot plus
    /// the terminal timer. Registration is idempotent and re-derivable from
    /// the persisted schedule, so a crash mid-registration is recovered by
    /// the orchestrator's resync.
    ///
    /// # Errors
    ///
    /// [`crate::CampaignError::AlreadyRunning`] when a run is already
    /// active in the persisted state.
    pub fn start(&self, keywords: Vec<String>) -> crate::Result<String> {
        self.config.schedule.validate()?;

        let keywords = normalize_keywords(keywords);
        let start_ts = now_epoch_millis();
        let run_id = mint_run_id(start_ts);

        let times = generate_schedule(start_ts, &self.config.schedule, &mut rand::thread_rng());
        let entries = build_entries(&run_id, &times);
        let end = end_entry(&run_id, start_ts, &self.config.schedule);

        let mut timer_names: Vec<String> =
            entries.iter().map(|e| e.timer_name.clone()).collect();
        timer_names.push(end.timer_name.clone());

        let run = ActiveRun {
            run_id: run_id.clone(),
            mode: RunMode::Scheduled,
            start_ts,
            keywords,
            days: self.config.schedule.days,
            days_completed: 0,
            schedule: entries.clone(),
            end_timer: Some(end.clone()),
        };

        self.persist_new_run(run, timer_names)?;

        for entry in &entries {
            self.timers.register(&entry.timer_name, entry.fires_at);
        }
        self.timers.register(&end.timer_name, end.fires_at);

        info!(
            run_id = %run_id,
            sessions = entries.len(),
            days = self.config.schedule.days,
            "scheduled run started"
        );
        Ok(run_id)
    }

    /// Start an immediate run: no schedule, no timers. The dispatcher's
    /// self-scheduling loop takes over from here.
    ///
    /// # Errors
    ///
    /// [`crate::CampaignError::AlreadyRunning`] when a run is already
    /// active in the persisted state.
    pub fn start_immediate(&self, keywords: Vec<String>) -> crate::Result<String> {
        let keywords = normalize_keywords(keywords);
        let start_ts = now_epoch_millis();
        let run_id = mint_run_id(start_ts);

        let run = ActiveRun {
            run_id: run_id.clone(),
            mode: RunMode::Immediate,
            start_ts,
            keywords,
            days: 0,
            days_completed: 0,
            schedule: Vec::new(),
            end_timer: None,
        };

        self.persist_new_run(run, Vec::new())?;

        info!(run_id = %run_id, "immediate run started");
        Ok(run_id)
    }

    /// Stop the active run, cancelling exactly its timers and leaving the
    /// journal untouched. Idempotent: returns `Ok(None)` when nothing was
    /// running.
    pub fn stop(&self) -> crate::Result<Option<String>> {
        let mut stopped: Option<(String, Vec<String>)> = None;
        self.store.update(&mut |state| {
            if let Some(run) = state.run.take() {
                let names = state.timer_index.remove(&run.run_id).unwrap_or_default();
                stopped = Some((run.run_id, names));
            }
        })?;

        match stopped {
            Some((run_id, names)) => {
                let cancelled = self.timers.cancel_many(&names);
                info!(run_id = %run_id, cancelled, "run stopped");
                Ok(Some(run_id))
            }
            None => {
                debug!("stop requested with no active run");
                Ok(None)
            }
        }
    }

    /// Terminal-timer handler: force the run inactive regardless of how
    /// many days completed. Returns `false` without mutating anything when
    /// `run_id` is no longer the active run.
    pub fn finish(&self, run_id: &str) -> crate::Result<bool> {
        let mut leftover: Option<Vec<String>> = None;
        self.store.update(&mut |state| {
            let current = state.active_run_id().map(str::to_owned);
            if current.as_deref() == Some(run_id) {
                state.run = None;
                leftover = Some(state.timer_index.remove(run_id).unwrap_or_default());
            }
        })?;

        match leftover {
            Some(names) => {
                let cancelled = self.timers.cancel_many(&names);
                info!(run_id = %run_id, cancelled, "run finished");
                Ok(true)
            }
            None => {
                debug!(run_id = %run_id, "terminal fire for a run that is no longer active");
                Ok(false)
            }
        }
    }

    /// Re-register a timer from persisted schedule data (resync path).
    pub(crate) fn register_timer(&self, name: &str, fires_at: u64) {
        self.timers.register(name, fires_at);
    }

    fn persist_new_run(&self, run: ActiveRun, timer_names: Vec<String>) -> crate::Result<()> {
        let run_id = run.run_id.clone();
        let mut already_running = false;
        self.store.update(&mut |state| {
            if state.run.is_some() {
                already_running = true;
                return;
            }
            state.run = Some(run.clone());
            if !timer_names.is_empty() {
                state.timer_index.insert(run_id.clone(), timer_names.clone());
            }
        })?;

        if already_running {
            return Err(crate::CampaignError::AlreadyRunning);
        }
        Ok(())
    }
}

/// Trim, drop empties, and cap the keyword list. An empty result is kept
/// as-is: keyword picks fall back to the built-in defaults.
fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = keywords
        .into_iter()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty())
        .collect();
    cleaned.truncate(MAX_KEYWORDS);
    cleaned
}

/// Collision-resistant run id: start time plus a random suffix.
fn mint_run_id(now_ms: u64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("run-{now_ms}-{}", suffix.to_lowercase())
}
