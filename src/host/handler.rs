//! Production host command handler wired to the campaign orchestrator.

use crate::host::channel::CampaignCommandHandler;
use crate::host::contract::{EventEnvelope, SessionResultPayload};
use crate::host::worker::HostSessionWorker;
use crate::journal::LogEntry;
use crate::orchestrator::{CampaignEvent, CampaignOrchestrator};
use crate::suggest::{KeywordSuggester, SuggestError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handler backing the host bridge with a live orchestrator.
pub struct OrchestratorHandler {
    orchestrator: Arc<CampaignOrchestrator>,
    session_worker: Arc<HostSessionWorker>,
    suggester: Option<Arc<dyn KeywordSuggester>>,
}

impl OrchestratorHandler {
    /// Wire a handler over the orchestrator and its host session worker.
    #[must_use]
    pub fn new(
        orchestrator: Arc<CampaignOrchestrator>,
        session_worker: Arc<HostSessionWorker>,
        suggester: Option<Arc<dyn KeywordSuggester>>,
    ) -> Self {
        Self {
            orchestrator,
            session_worker,
            suggester,
        }
    }

    /// Forward orchestrator events onto the host event broadcast as
    /// envelopes. Runs until the orchestrator's event channel closes.
    pub fn spawn_event_bridge(
        orchestrator: &Arc<CampaignOrchestrator>,
        event_tx: broadcast::Sender<EventEnvelope>,
    ) -> JoinHandle<()> {
        let mut campaign_rx = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match campaign_rx.recv().await {
                    Ok(event) => {
                        let (name, payload) = match event {
                            CampaignEvent::RunStarted { run_id, mode } => (
                                "campaign.started",
                                serde_json::json!({"run_id": run_id, "mode": mode.as_str()}),
                            ),
                            CampaignEvent::RunFinished { run_id } => (
                                "campaign.finished",
                                serde_json::json!({"run_id": run_id}),
                            ),
                            CampaignEvent::SessionRecorded { run_id, entry } => (
                                "session.recorded",
                                serde_json::json!({"run_id": run_id, "entry": entry}),
                            ),
                        };
                        let envelope = EventEnvelope::new(
                            uuid::Uuid::new_v4().to_string(),
                            name,
                            payload,
                        );
                        if event_tx.send(envelope).is_err() {
                            debug!("host event channel has no subscribers; dropping {name}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(lagged = n, "campaign event bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl CampaignCommandHandler for OrchestratorHandler {
    fn start_campaign(&self, keywords: Vec<String>) -> crate::Result<String> {
        self.orchestrator.start(keywords)
    }

    fn start_immediate_campaign(&self, keywords: Vec<String>) -> crate::Result<String> {
        self.orchestrator.start_immediate(keywords)
    }

    fn stop_campaign(&self) -> crate::Result<Option<String>> {
        self.orchestrator.stop()
    }

    fn campaign_status(&self) -> crate::Result<serde_json::Value> {
        serde_json::to_value(self.orchestrator.status())
            .map_err(|e| crate::CampaignError::Channel(format!("status serialization: {e}")))
    }

    async fn suggest_keywords(
        &self,
        topic: &str,
    ) -> std::result::Result<Vec<String>, SuggestError> {
        let credential = self
            .orchestrator
            .credential()
            .ok_or(SuggestError::MissingCredential)?;
        let suggester = self.suggester.as_ref().ok_or_else(|| {
            SuggestError::Api("no suggestion client configured".to_owned())
        })?;
        suggester.suggest(topic, &credential).await
    }

    fn list_logs(&self) -> crate::Result<Vec<LogEntry>> {
        Ok(self.orchestrator.recorder().entries())
    }

    fn clear_logs(&self) -> crate::Result<()> {
        self.orchestrator.recorder().clear()
    }

    fn set_credential(&self, value: Option<String>) -> crate::Result<bool> {
        self.orchestrator.set_credential(value)
    }

    fn session_result(&self, payload: SessionResultPayload) -> crate::Result<bool> {
        let session_id = payload.session_id.clone();
        Ok(self
            .session_worker
            .resolve(session_id.as_deref(), payload.into()))
    }
}
