//! Host-dispatched session worker.
//!
//! Sessions are executed by the frontend attached to the host bridge: each
//! invocation broadcasts a `session.dispatch` event, then waits for the
//! matching `session.result` command. Pending sessions are kept in
//! insertion order so a result without a session id can resolve the oldest
//! pending session for its keyword.

use crate::host::contract::EventEnvelope;
use crate::worker::{SessionError, SessionReport, SessionRequest, SessionWorker};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

struct PendingSession {
    session_id: String,
    keyword: String,
    report_tx: oneshot::Sender<SessionReport>,
}

/// Worker implementation that delegates session execution to the attached
/// host frontend.
pub struct HostSessionWorker {
    event_tx: broadcast::Sender<EventEnvelope>,
    pending: Arc<Mutex<Vec<PendingSession>>>,
    result_timeout: Duration,
}

impl HostSessionWorker {
    /// Create a worker emitting dispatch events on `event_tx` and waiting
    /// up to `result_timeout` for each session's result.
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<EventEnvelope>, result_timeout: Duration) -> Self {
        Self {
            event_tx,
            pending: Arc::new(Mutex::new(Vec::new())),
            result_timeout,
        }
    }

    /// Deliver a session result from the frontend.
    ///
    /// A result carrying a session id resolves that exact session; one
    /// without resolves the oldest pending session with the same keyword.
    /// Returns `false` when nothing matched (e.g. the session already
    /// timed out).
    pub fn resolve(&self, session_id: Option<&str>, report: SessionReport) -> bool {
        let mut guard = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let position = match session_id {
            Some(id) => guard.iter().position(|p| p.session_id == id),
            None => guard.iter().position(|p| p.keyword == report.keyword),
        };

        match position {
            Some(index) => {
                let pending = guard.remove(index);
                pending.report_tx.send(report).is_ok()
            }
            None => {
                debug!(
                    session_id = session_id.unwrap_or("<none>"),
                    keyword = %report.keyword,
                    "session result did not match any pending session"
                );
                false
            }
        }
    }

    /// Number of sessions currently awaiting a result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn remove_pending(&self, session_id: &str) {
        let mut guard = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.retain(|p| p.session_id != session_id);
    }
}

#[async_trait]
impl SessionWorker for HostSessionWorker {
    async fn run_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<SessionReport, SessionError> {
        let (report_tx, report_rx) = oneshot::channel();
        {
            let mut guard = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.push(PendingSession {
                session_id: request.session_id.clone(),
                keyword: request.keyword.clone(),
                report_tx,
            });
        }

        let envelope = EventEnvelope::new(
            uuid::Uuid::new_v4().to_string(),
            "session.dispatch",
            serde_json::json!({
                "session_id": request.session_id,
                "run_id": request.run_id,
                "keyword": request.keyword,
                "max_watch_secs": request.max_watch_secs,
            }),
        );
        if self.event_tx.send(envelope).is_err() {
            // Nobody is listening: there is no execution context to open.
            self.remove_pending(&request.session_id);
            return Err(SessionError::Launch(
                "no session frontend attached to the host bridge".to_owned(),
            ));
        }

        match tokio::time::timeout(self.result_timeout, report_rx).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) | Err(_) => {
                self.remove_pending(&request.session_id);
                Err(SessionError::NoResponse)
            }
        }
    }
}
