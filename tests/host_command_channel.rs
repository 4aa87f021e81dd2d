//! Host command channel drills: envelope routing against a recording
//! handler, plus a full-stack pass over the orchestrator-backed handler
//! with host-dispatched sessions.

use async_trait::async_trait;
use cadence::config::{DispatchConfig, OrchestratorConfig};
use cadence::host::channel::{CampaignCommandHandler, command_channel};
use cadence::host::contract::{CommandEnvelope, CommandName, SessionResultPayload};
use cadence::host::handler::OrchestratorHandler;
use cadence::host::worker::HostSessionWorker;
use cadence::orchestrator::CampaignOrchestrator;
use cadence::store::{MemoryStateStore, StateStore};
use cadence::suggest::SuggestError;
use cadence::timers::{ManualTimerService, TimerService};
use cadence::worker::SessionWorker;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Clone, Default)]
struct RecordingHandler {
    starts: Arc<Mutex<Vec<Vec<String>>>>,
    immediate_starts: Arc<Mutex<Vec<Vec<String>>>>,
    stops: Arc<Mutex<usize>>,
    credentials: Arc<Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl CampaignCommandHandler for RecordingHandler {
    fn start_campaign(&self, keywords: Vec<String>) -> cadence::Result<String> {
        self.starts.lock().expect("lock starts").push(keywords);
        Ok("run-1-test".to_owned())
    }

    fn start_immediate_campaign(&self, keywords: Vec<String>) -> cadence::Result<String> {
        self.immediate_starts
            .lock()
            .expect("lock immediate starts")
            .push(keywords);
        Ok("run-2-test".to_owned())
    }

    fn stop_campaign(&self) -> cadence::Result<Option<String>> {
        *self.stops.lock().expect("lock stops") += 1;
        Ok(Some("run-1-test".to_owned()))
    }

    async fn suggest_keywords(
        &self,
        topic: &str,
    ) -> std::result::Result<Vec<String>, SuggestError> {
        Ok(vec![format!("{topic} basics"), format!("{topic} tips")])
    }

    fn set_credential(&self, value: Option<String>) -> cadence::Result<bool> {
        let present = value.is_some();
        self.credentials
            .lock()
            .expect("lock credentials")
            .push(value);
        Ok(present)
    }
}

fn envelope(command: CommandName, payload: serde_json::Value) -> CommandEnvelope {
    CommandEnvelope::new("req-1", command, payload)
}

#[tokio::test]
async fn start_command_reaches_handler_with_keywords() {
    let handler = RecordingHandler::default();
    let starts = Arc::clone(&handler.starts);
    let (client, server) = command_channel(8, 8, handler);
    tokio::spawn(server.run());

    let response = client
        .send(envelope(
            CommandName::CampaignStart,
            serde_json::json!({"keywords": ["a", "b"]}),
        ))
        .await
        .expect("response");

    assert!(response.ok);
    assert_eq!(response.payload["status"], serde_json::json!("started"));
    assert_eq!(response.payload["run_id"], serde_json::json!("run-1-test"));
    assert_eq!(
        starts.lock().expect("lock").as_slice(),
        &[vec!["a".to_owned(), "b".to_owned()]]
    );
}

#[tokio::test]
async fn immediate_start_and_stop_round_trip() {
    let handler = RecordingHandler::default();
    let stops = Arc::clone(&handler.stops);
    let (client, server) = command_channel(8, 8, handler);
    tokio::spawn(server.run());

    let response = client
        .send(envelope(
            CommandName::CampaignStartImmediate,
            serde_json::json!({}),
        ))
        .await
        .expect("response");
    assert!(response.ok);
    assert_eq!(response.payload["run_id"], serde_json::json!("run-2-test"));

    let response = client
        .send(envelope(CommandName::CampaignStop, serde_json::json!({})))
        .await
        .expect("response");
    assert!(response.ok);
    assert_eq!(response.payload["status"], serde_json::json!("stopped"));
    assert_eq!(*stops.lock().expect("lock"), 1);
}

#[tokio::test]
async fn suggest_round_trips_keyword_list() {
    let (client, server) = command_channel(8, 8, RecordingHandler::default());
    tokio::spawn(server.run());

    let response = client
        .send(envelope(
            CommandName::KeywordsSuggest,
            serde_json::json!({"topic": "gardening"}),
        ))
        .await
        .expect("response");
    assert!(response.ok);
    assert_eq!(
        response.payload["keywords"],
        serde_json::json!(["gardening basics", "gardening tips"])
    );
}

#[tokio::test]
async fn credential_set_reports_presence() {
    let handler = RecordingHandler::default();
    let credentials = Arc::clone(&handler.credentials);
    let (client, server) = command_channel(8, 8, handler);
    tokio::spawn(server.run());

    let response = client
        .send(envelope(
            CommandName::CredentialSet,
            serde_json::json!({"value": "token-1"}),
        ))
        .await
        .expect("response");
    assert!(response.ok);
    assert_eq!(response.payload["present"], serde_json::json!(true));
    assert_eq!(
        credentials.lock().expect("lock").as_slice(),
        &[Some("token-1".to_owned())]
    );
}

// ---------------------------------------------------------------------------
// Full stack: orchestrator-backed handler with host-dispatched sessions
// ---------------------------------------------------------------------------

fn full_stack() -> (
    OrchestratorHandler,
    Arc<CampaignOrchestrator>,
    broadcast::Receiver<cadence::host::contract::EventEnvelope>,
) {
    let store = Arc::new(MemoryStateStore::new()) as Arc<dyn StateStore>;
    let timers = Arc::new(ManualTimerService::new()) as Arc<dyn TimerService>;
    let (event_tx, event_rx) = broadcast::channel(32);

    let session_worker = Arc::new(HostSessionWorker::new(
        event_tx.clone(),
        Duration::from_secs(5),
    ));

    let config = OrchestratorConfig {
        dispatch: DispatchConfig {
            // Long success backoff keeps the immediate loop at one session
            // for the duration of the test.
            min_session_delay_secs: 3_600,
            max_session_delay_secs: 3_600,
            ..DispatchConfig::default()
        },
        ..OrchestratorConfig::default()
    };

    let orchestrator = CampaignOrchestrator::new(
        store,
        timers,
        Arc::clone(&session_worker) as Arc<dyn SessionWorker>,
        config,
    );
    OrchestratorHandler::spawn_event_bridge(&orchestrator, event_tx);

    (
        OrchestratorHandler::new(Arc::clone(&orchestrator), session_worker, None),
        orchestrator,
        event_rx,
    )
}

#[tokio::test]
async fn host_dispatched_session_result_lands_in_journal() {
    let (handler, orchestrator, mut event_rx) = full_stack();
    let (client, server) = command_channel(8, 8, handler);
    tokio::spawn(server.run());

    // Start an immediate campaign; the loop dispatches through the host
    // worker, which broadcasts a session.dispatch event.
    let response = client
        .send(envelope(
            CommandName::CampaignStartImmediate,
            serde_json::json!({"keywords": ["cats"]}),
        ))
        .await
        .expect("response");
    assert!(response.ok);

    let dispatch = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        if event.event == "session.dispatch" {
            break event;
        }
    };
    assert_eq!(dispatch.payload["keyword"], serde_json::json!("cats"));
    let session_id = dispatch.payload["session_id"]
        .as_str()
        .expect("session id")
        .to_owned();

    // Deliver the worker result through the command surface.
    let response = client
        .send(envelope(
            CommandName::SessionResult,
            serde_json::json!({
                "session_id": session_id,
                "keyword": "cats",
                "success": true,
                "watch_secs": 33.0,
                "videos_watched": 2,
            }),
        ))
        .await
        .expect("response");
    assert!(response.ok);
    assert_eq!(response.payload["accepted"], serde_json::json!(true));

    // The outcome reaches the journal and the session.recorded event fires.
    let recorded = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        if event.event == "session.recorded" {
            break event;
        }
    };
    assert_eq!(
        recorded.payload["entry"]["keyword"],
        serde_json::json!("cats")
    );

    let logs = orchestrator.recorder().entries();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].watch_secs, 33.0);

    client
        .send(envelope(CommandName::CampaignStop, serde_json::json!({})))
        .await
        .expect("stop");
    assert!(!orchestrator.status().is_running);
}

#[tokio::test]
async fn stale_session_result_after_stop_is_rejected() {
    let (handler, orchestrator, _event_rx) = full_stack();

    orchestrator
        .start_immediate(vec!["cats".to_owned()])
        .expect("start");
    // Give the loop a moment to park a pending session.
    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.stop().expect("stop");

    // The pending session still resolves (the invocation was in flight
    // when stop landed), but the recorded outcome is dropped as stale.
    let accepted = handler
        .session_result(SessionResultPayload {
            session_id: None,
            keyword: "cats".to_owned(),
            success: true,
            watch_secs: 5.0,
            videos_watched: None,
            error: None,
        })
        .expect("handled");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.recorder().entries().is_empty());
    if accepted {
        assert!(orchestrator.status().stale_events_dropped >= 1);
    }
}
