//! Session worker collaborator contract.
//!
//! The worker performs the actual page interaction for one session; its
//! internals are out of scope here. The orchestrator only sees this seam:
//! a request in, a report (or a typed failure) out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One session's parameters, handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Unique id for this invocation.
    pub session_id: String,
    /// The run this session belongs to.
    pub run_id: String,
    /// Keyword driving the session.
    pub keyword: String,
    /// Upper bound on watch time, in seconds.
    pub max_watch_secs: u32,
}

/// The worker's outcome report for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Keyword the session ran with.
    pub keyword: String,
    /// Whether the worker considers the session successful.
    pub success: bool,
    /// Seconds of watch time accumulated.
    #[serde(default)]
    pub watch_secs: f64,
    /// Number of videos watched, when the worker counted them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos_watched: Option<u32>,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Why a session produced no report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The execution context could not be created or injected.
    #[error("session launch failed: {0}")]
    Launch(String),
    /// The worker went silent past the result deadline.
    #[error("no response from session worker")]
    NoResponse,
}

/// Session worker seam. Implementations open a fresh execution context per
/// session and must not block forever: a silent context is reported as
/// [`SessionError::NoResponse`].
#[async_trait]
pub trait SessionWorker: Send + Sync {
    /// Run one session to completion and report the outcome.
    async fn run_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<SessionReport, SessionError>;
}

/// Scripted worker for tests: pops queued outcomes in order and records
/// every request it receives. An empty queue yields a generic success.
#[derive(Default)]
pub struct ScriptedWorker {
    outcomes: Mutex<VecDeque<std::result::Result<SessionReport, SessionError>>>,
    requests: Mutex<Vec<SessionRequest>>,
}

impl ScriptedWorker {
    /// Create a scripted worker with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome.
    pub fn push_outcome(&self, outcome: std::result::Result<SessionReport, SessionError>) {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Queue a success report for `keyword`.
    pub fn push_success(&self, keyword: &str, watch_secs: f64) {
        self.push_outcome(Ok(SessionReport {
            keyword: keyword.to_owned(),
            success: true,
            watch_secs,
            videos_watched: Some(1),
            error: None,
        }));
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SessionWorker for ScriptedWorker {
    async fn run_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<SessionReport, SessionError> {
        let keyword = request.keyword.clone();
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);

        let queued = self
            .outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        match queued {
            Some(outcome) => outcome,
            None => Ok(SessionReport {
                keyword,
                success: true,
                watch_secs: 0.0,
                videos_watched: None,
                error: None,
            }),
        }
    }
}
