//! Bounded, most-recent-first outcome journal.
//!
//! The journal lives inside the persisted campaign document and survives
//! across runs; only an explicit [`LogRecorder::clear`] empties it.

use crate::store::{CampaignState, StateStore, now_epoch_millis};
use crate::worker::SessionReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default cap on retained journal entries.
pub const DEFAULT_LOG_LIMIT: usize = 50;

/// Outcome classification for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Worker completed and reported success.
    Success,
    /// Worker failed, reported failure, or went silent.
    Error,
}

/// One recorded session outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Outcome classification.
    pub kind: LogKind,
    /// Keyword the session ran with.
    pub keyword: String,
    /// Seconds of watch time accumulated (0 for failures before playback).
    #[serde(default)]
    pub watch_secs: f64,
    /// Number of videos watched, when counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos_watched: Option<u32>,
    /// Failure description for error entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recording time, epoch milliseconds.
    pub timestamp: u64,
}

impl LogEntry {
    /// Build a success entry.
    #[must_use]
    pub fn success(keyword: impl Into<String>, watch_secs: f64, videos_watched: Option<u32>) -> Self {
        Self {
            kind: LogKind::Success,
            keyword: keyword.into(),
            watch_secs: watch_secs.max(0.0),
            videos_watched,
            error: None,
            timestamp: now_epoch_millis(),
        }
    }

    /// Build an error entry.
    #[must_use]
    pub fn failure(keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            keyword: keyword.into(),
            watch_secs: 0.0,
            videos_watched: None,
            error: Some(message.into()),
            timestamp: now_epoch_millis(),
        }
    }

    /// Human-readable recording time (RFC 3339), for status payloads.
    #[must_use]
    pub fn recorded_at(&self) -> Option<String> {
        chrono::DateTime::from_timestamp_millis(i64::try_from(self.timestamp).ok()?)
            .map(|ts| ts.to_rfc3339())
    }
}

impl From<SessionReport> for LogEntry {
    fn from(report: SessionReport) -> Self {
        if report.success {
            Self::success(report.keyword, report.watch_secs, report.videos_watched)
        } else {
            let mut entry = Self::failure(
                report.keyword,
                report
                    .error
                    .unwrap_or_else(|| "session worker reported failure".to_owned()),
            );
            entry.watch_secs = report.watch_secs.max(0.0);
            entry.videos_watched = report.videos_watched;
            entry
        }
    }
}

/// Prepend an entry and enforce the cap. Used inside a single store update
/// so concurrent appends cannot interleave.
pub(crate) fn push_entry(state: &mut CampaignState, entry: LogEntry, max_entries: usize) {
    state.logs.insert(0, entry);
    state.logs.truncate(max_entries.max(1));
}

/// Journal access over the durable store.
#[derive(Clone)]
pub struct LogRecorder {
    store: Arc<dyn StateStore>,
    max_entries: usize,
}

impl LogRecorder {
    /// Create a recorder with the given retention cap.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, max_entries: usize) -> Self {
        Self {
            store,
            max_entries: max_entries.max(1),
        }
    }

    /// Append one entry, evicting the oldest past the cap.
    pub fn append(&self, entry: LogEntry) -> crate::Result<()> {
        self.store.update(&mut |state| {
            push_entry(state, entry.clone(), self.max_entries);
        })?;
        Ok(())
    }

    /// Replace the journal with an empty sequence.
    pub fn clear(&self) -> crate::Result<()> {
        self.store.update(&mut |state| {
            state.logs.clear();
        })?;
        Ok(())
    }

    /// Current entries, newest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.store.snapshot().logs
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::MemoryStateStore;

    fn recorder(max: usize) -> LogRecorder {
        LogRecorder::new(Arc::new(MemoryStateStore::new()), max)
    }

    #[test]
    fn append_is_newest_first() {
        let recorder = recorder(10);
        recorder.append(LogEntry::failure("a", "x")).expect("append");
        recorder
            .append(LogEntry::success("b", 30.0, Some(2)))
            .expect("append");

        let entries = recorder.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].keyword, "b");
        assert_eq!(entries[1].keyword, "a");
    }

    #[test]
    fn append_beyond_cap_keeps_latest() {
        let recorder = recorder(5);
        for i in 0..9 {
            recorder
                .append(LogEntry::failure(format!("kw-{i}"), "x"))
                .expect("append");
        }

        let entries = recorder.entries();
        assert_eq!(entries.len(), 5);
        // Newest-first: the last five appended, most recent at the front.
        let keywords: Vec<&str> = entries.iter().map(|e| e.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["kw-8", "kw-7", "kw-6", "kw-5", "kw-4"]);
    }

    #[test]
    fn clear_empties_the_journal() {
        let recorder = recorder(5);
        recorder.append(LogEntry::failure("a", "x")).expect("append");
        recorder.clear().expect("clear");
        assert!(recorder.entries().is_empty());
    }

    #[test]
    fn success_report_maps_to_success_entry() {
        let entry: LogEntry = SessionReport {
            keyword: "cats".to_owned(),
            success: true,
            watch_secs: 42.5,
            videos_watched: Some(3),
            error: None,
        }
        .into();
        assert_eq!(entry.kind, LogKind::Success);
        assert_eq!(entry.watch_secs, 42.5);
        assert_eq!(entry.videos_watched, Some(3));
        assert!(entry.error.is_none());
    }

    #[test]
    fn failure_report_maps_to_error_entry_with_message() {
        let entry: LogEntry = SessionReport {
            keyword: "cats".to_owned(),
            success: false,
            watch_secs: 7.0,
            videos_watched: None,
            error: Some("player never loaded".to_owned()),
        }
        .into();
        assert_eq!(entry.kind, LogKind::Error);
        assert_eq!(entry.watch_secs, 7.0);
        assert_eq!(entry.error.as_deref(), Some("player never loaded"));
    }

    #[test]
    fn failure_report_without_message_gets_generic_one() {
        let entry: LogEntry = SessionReport {
            keyword: "cats".to_owned(),
            success: false,
            watch_secs: 0.0,
            videos_watched: None,
            error: None,
        }
        .into();
        assert!(entry.error.is_some());
    }

    #[test]
    fn recorded_at_renders_rfc3339() {
        let mut entry = LogEntry::failure("a", "x");
        entry.timestamp = 1_700_000_000_000;
        let rendered = entry.recorded_at().expect("timestamp renders");
        assert!(rendered.starts_with("2023-11-14T"));
    }
}
