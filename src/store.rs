//! Durable campaign state and the state-store seam.
//!
//! All persisted state lives in one versioned [`CampaignState`] document.
//! Components never touch ambient globals; every read goes through
//! [`StateStore::snapshot`] and every mutation through the serialized
//! read-modify-write of [`StateStore::update`].

use crate::journal::LogEntry;
use crate::schedule::ScheduleEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Persisted state schema version.
pub const STATE_VERSION: u8 = 1;

/// Which triggering discipline a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Sessions fire at precomputed future timestamps.
    Scheduled,
    /// Sessions fire back-to-back with short randomized gaps.
    Immediate,
}

impl RunMode {
    /// Render the mode to its wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Immediate => "immediate",
        }
    }
}

/// The single active campaign run, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRun {
    /// Authoritative run identifier.
    pub run_id: String,
    /// Triggering discipline.
    pub mode: RunMode,
    /// Run start, epoch milliseconds.
    pub start_ts: u64,
    /// Keyword pool for session picks (may be empty; pick falls back to
    /// the built-in defaults).
    pub keywords: Vec<String>,
    /// Campaign length in days (scheduled mode).
    pub days: u32,
    /// Days with at least one recorded outcome so far (scheduled mode).
    pub days_completed: u32,
    /// Full session schedule, generated once at start. Empty in
    /// immediate mode.
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
    /// Terminal timer, if one was registered.
    #[serde(default)]
    pub end_timer: Option<ScheduleEntry>,
}

/// The whole persisted campaign document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignState {
    /// Schema version.
    pub version: u8,
    /// Active run, if any. `None` means not running.
    pub run: Option<ActiveRun>,
    /// Outcome journal, newest first, bounded by the journal config.
    pub logs: Vec<LogEntry>,
    /// Opaque credential for the suggestion service. Only its presence
    /// matters to the core.
    pub credential: Option<String>,
    /// Explicit run-id -> timer-name index used for cancellation, instead
    /// of parsing timer names.
    pub timer_index: BTreeMap<String, Vec<String>>,
}

impl Default for CampaignState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            run: None,
            logs: Vec::new(),
            credential: None,
            timer_index: BTreeMap::new(),
        }
    }
}

impl CampaignState {
    /// Returns `true` when a run is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// The active run id, if any.
    #[must_use]
    pub fn active_run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.run_id.as_str())
    }
}

/// Serialized access to the durable campaign document.
///
/// `update` is a single read-modify-write: implementations must apply the
/// mutation and persist atomically with respect to concurrent callers, so
/// back-to-back session completions never lose journal appends.
pub trait StateStore: Send + Sync {
    /// Current state, cloned.
    fn snapshot(&self) -> CampaignState;

    /// Apply `mutate` under the store's write lock and persist the result.
    ///
    /// Returns the state as persisted.
    fn update(&self, mutate: &mut dyn FnMut(&mut CampaignState)) -> crate::Result<CampaignState>;
}

/// In-memory store for tests and embedding without durability.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<CampaignState>,
}

impl MemoryStateStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self) -> CampaignState {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut CampaignState)) -> crate::Result<CampaignState> {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mutate(&mut guard);
        Ok(guard.clone())
    }
}

/// JSON-file-backed store. One file holds the whole document; writes go
/// through a temp file and atomic rename.
pub struct JsonStateStore {
    path: PathBuf,
    state: Mutex<CampaignState>,
}

impl JsonStateStore {
    /// Open (or initialize) the store at `path`.
    ///
    /// A missing file starts fresh. A malformed file is logged and replaced
    /// on the next write. Any other I/O failure is fatal: no state can be
    /// trusted without the store.
    pub fn open(path: PathBuf) -> crate::Result<Self> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CampaignState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "ignoring malformed campaign state at {}: {e}",
                        path.display()
                    );
                    CampaignState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CampaignState::default(),
            Err(e) => {
                return Err(crate::CampaignError::Store(format!(
                    "failed to read campaign state at {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the default state file path: `~/.config/cadence/state.json`.
    pub fn default_state_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("cadence").join("state.json")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("cadence")
                .join("state.json")
        } else {
            PathBuf::from("/tmp/cadence-config/state.json")
        }
    }

    fn persist(&self, state: &CampaignState) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::CampaignError::Store(format!("failed to create state directory: {e}"))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(state).map_err(|e| {
            crate::CampaignError::Store(format!("failed to serialize campaign state: {e}"))
        })?;
        std::fs::write(&tmp_path, json).map_err(|e| {
            crate::CampaignError::Store(format!("failed to write state temp file: {e}"))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            crate::CampaignError::Store(format!("failed to finalize state file: {e}"))
        })?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn snapshot(&self) -> CampaignState {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut CampaignState)) -> crate::Result<CampaignState> {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next = guard.clone();
        mutate(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::journal::LogEntry;

    #[test]
    fn default_state_is_not_running() {
        let state = CampaignState::default();
        assert!(!state.is_running());
        assert!(state.active_run_id().is_none());
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn memory_store_update_is_visible_in_snapshot() {
        let store = MemoryStateStore::new();
        store
            .update(&mut |state| {
                state.credential = Some("token".to_owned());
            })
            .expect("update");
        assert_eq!(store.snapshot().credential.as_deref(), Some("token"));
    }

    #[test]
    fn json_store_round_trips_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let store = JsonStateStore::open(path.clone()).expect("open");
        store
            .update(&mut |state| {
                state.logs.insert(0, LogEntry::failure("cats", "boom"));
                state
                    .timer_index
                    .insert("run-1".to_owned(), vec!["run-1:end".to_owned()]);
            })
            .expect("update");

        let reopened = JsonStateStore::open(path).expect("reopen");
        let state = reopened.snapshot();
        assert_eq!(state.logs.len(), 1);
        assert_eq!(state.logs[0].keyword, "cats");
        assert_eq!(
            state.timer_index.get("run-1").map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn json_store_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStateStore::open(dir.path().join("state.json")).expect("open");
        assert!(!store.snapshot().is_running());
    }

    #[test]
    fn json_store_malformed_file_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write");
        let store = JsonStateStore::open(path).expect("open");
        assert!(!store.snapshot().is_running());
    }

    #[test]
    fn run_mode_serde_uses_snake_case() {
        let json = serde_json::to_string(&RunMode::Scheduled).expect("serialize");
        assert_eq!(json, "\"scheduled\"");
        let parsed: RunMode = serde_json::from_str("\"immediate\"").expect("deserialize");
        assert_eq!(parsed, RunMode::Immediate);
    }

    #[test]
    fn now_epoch_millis_is_nonzero() {
        assert!(now_epoch_millis() > 0);
    }
}
