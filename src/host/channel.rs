//! Host command channel and router for frontend integrations.

use crate::error::{CampaignError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::journal::LogEntry;
use crate::suggest::SuggestError;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Campaign control seam behind the command router. The host binary plugs
/// in the real orchestrator; tests plug in recording fakes.
#[async_trait]
pub trait CampaignCommandHandler: Send + Sync + 'static {
    /// Start a scheduled run.
    fn start_campaign(&self, keywords: Vec<String>) -> Result<String>;

    /// Start an immediate run.
    fn start_immediate_campaign(&self, keywords: Vec<String>) -> Result<String>;

    /// Stop the active run, returning its id when one was running.
    fn stop_campaign(&self) -> Result<Option<String>>;

    /// Flat status view.
    fn campaign_status(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"is_running": false}))
    }

    /// Fetch keyword suggestions for a topic.
    async fn suggest_keywords(
        &self,
        _topic: &str,
    ) -> std::result::Result<Vec<String>, SuggestError> {
        Err(SuggestError::Api(
            "no suggestion client configured".to_owned(),
        ))
    }

    /// Journal entries, newest first.
    fn list_logs(&self) -> Result<Vec<LogEntry>> {
        Ok(Vec::new())
    }

    /// Clear the journal.
    fn clear_logs(&self) -> Result<()> {
        Ok(())
    }

    /// Set or clear the suggestion credential; returns presence afterwards.
    fn set_credential(&self, _value: Option<String>) -> Result<bool> {
        Ok(false)
    }

    /// Deliver a worker session result. Returns `true` when a pending
    /// session accepted it.
    fn session_result(
        &self,
        _payload: crate::host::contract::SessionResultPayload,
    ) -> Result<bool> {
        Ok(false)
    }
}

/// Inert handler for bridge tests and bring-up.
#[derive(Debug, Default)]
pub struct NoopCampaignHandler;

#[async_trait]
impl CampaignCommandHandler for NoopCampaignHandler {
    fn start_campaign(&self, _keywords: Vec<String>) -> Result<String> {
        Ok("run-0-noop".to_owned())
    }

    fn start_immediate_campaign(&self, _keywords: Vec<String>) -> Result<String> {
        Ok("run-0-noop".to_owned())
    }

    fn stop_campaign(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

/// Sending half of the command channel.
#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    /// Dispatch one command and await its response.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            CampaignError::Channel(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                CampaignError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| CampaignError::Channel(format!("host command response dropped: {e}")))?
    }

    /// Subscribe to host events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Receiving half: routes commands through the handler.
pub struct HostCommandServer<H: CampaignCommandHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    handler: H,
}

/// Create a command channel with its own event broadcast.
#[must_use]
pub fn command_channel<H: CampaignCommandHandler>(
    request_capacity: usize,
    event_capacity: usize,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    command_channel_with_events(request_capacity, event_tx, handler)
}

/// Create a command channel using an existing event broadcast sender, so
/// events emitted elsewhere (orchestrator bridge, session dispatches)
/// reach the frontend through the same path.
#[must_use]
pub fn command_channel_with_events<H: CampaignCommandHandler>(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx,
        },
        HostCommandServer {
            request_rx,
            handler,
        },
    )
}

impl<H: CampaignCommandHandler> HostCommandServer<H> {
    /// Drain requests until every client is dropped.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = self.route(&request.envelope).await;
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the appropriate handler call.
    ///
    /// Malformed payloads propagate as `Err`; handler-level failures (e.g.
    /// a second start while running) become error envelopes carrying the
    /// original request id.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request_id = envelope.request_id.clone();
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"pong": true, "contract_version": super::contract::EVENT_VERSION}),
            )),
            CommandName::CampaignStart => {
                let keywords = parse_keywords(&envelope.payload)?;
                match self.handler.start_campaign(keywords) {
                    Ok(run_id) => Ok(ResponseEnvelope::ok(
                        request_id,
                        serde_json::json!({"status": "started", "run_id": run_id}),
                    )),
                    Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
                }
            }
            CommandName::CampaignStartImmediate => {
                let keywords = parse_keywords(&envelope.payload)?;
                match self.handler.start_immediate_campaign(keywords) {
                    Ok(run_id) => Ok(ResponseEnvelope::ok(
                        request_id,
                        serde_json::json!({"status": "started", "run_id": run_id}),
                    )),
                    Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
                }
            }
            CommandName::CampaignStop => match self.handler.stop_campaign() {
                Ok(stopped) => Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"status": "stopped", "stopped_run_id": stopped}),
                )),
                Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
            },
            CommandName::CampaignStatus => match self.handler.campaign_status() {
                Ok(status) => Ok(ResponseEnvelope::ok(request_id, status)),
                Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
            },
            CommandName::KeywordsSuggest => {
                let topic = parse_topic(&envelope.payload)?;
                match self.handler.suggest_keywords(&topic).await {
                    Ok(keywords) => Ok(ResponseEnvelope::ok(
                        request_id,
                        serde_json::json!({"keywords": keywords}),
                    )),
                    Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
                }
            }
            CommandName::LogsList => match self.handler.list_logs() {
                Ok(logs) => Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"logs": logs}),
                )),
                Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
            },
            CommandName::LogsClear => match self.handler.clear_logs() {
                Ok(()) => Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"cleared": true}),
                )),
                Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
            },
            CommandName::CredentialSet => {
                let value = parse_credential(&envelope.payload)?;
                match self.handler.set_credential(value) {
                    Ok(present) => Ok(ResponseEnvelope::ok(
                        request_id,
                        serde_json::json!({"present": present}),
                    )),
                    Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
                }
            }
            CommandName::SessionResult => {
                let payload = parse_session_result(&envelope.payload)?;
                match self.handler.session_result(payload) {
                    Ok(accepted) => Ok(ResponseEnvelope::ok(
                        request_id,
                        serde_json::json!({"accepted": accepted}),
                    )),
                    Err(e) => Ok(ResponseEnvelope::error(request_id, e.to_string())),
                }
            }
        }
    }
}

fn parse_keywords(payload: &serde_json::Value) -> Result<Vec<String>> {
    match payload.get("keywords") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| CampaignError::Channel(format!("invalid keywords payload: {e}"))),
    }
}

fn parse_topic(payload: &serde_json::Value) -> Result<String> {
    let topic = payload
        .get("topic")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if topic.is_empty() {
        return Err(CampaignError::Channel(
            "suggest payload requires a non-empty 'topic'".to_owned(),
        ));
    }
    Ok(topic.to_owned())
}

fn parse_credential(payload: &serde_json::Value) -> Result<Option<String>> {
    match payload.get("value") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(CampaignError::Channel(format!(
            "credential 'value' must be a string or null, got {other}"
        ))),
    }
}

fn parse_session_result(
    payload: &serde_json::Value,
) -> Result<crate::host::contract::SessionResultPayload> {
    serde_json::from_value(payload.clone())
        .map_err(|e| CampaignError::Channel(format!("invalid session result payload: {e}")))
}
