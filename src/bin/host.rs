//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! This binary reads `CommandEnvelope` messages as newline-delimited JSON
//! from stdin, dispatches them through the host command channel, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use cadence::config::OrchestratorConfig;
use cadence::host::handler::OrchestratorHandler;
use cadence::host::stdio::run_stdio_bridge_with_events;
use cadence::host::worker::HostSessionWorker;
use cadence::orchestrator::CampaignOrchestrator;
use cadence::store::JsonStateStore;
use cadence::suggest::{HttpSuggestClient, KeywordSuggester};
use cadence::timers::TokioTimerService;
use cadence::worker::SessionWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Event broadcast capacity for the host bridge.
const EVENT_CAPACITY: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("cadence-host starting");

    let config_path = OrchestratorConfig::default_config_path();
    let config = if config_path.exists() {
        OrchestratorConfig::from_file(&config_path)
            .map_err(|e| anyhow::anyhow!("cannot load config {}: {e}", config_path.display()))?
    } else {
        OrchestratorConfig::default()
    };

    let store = Arc::new(
        JsonStateStore::open(JsonStateStore::default_state_path())
            .map_err(|e| anyhow::anyhow!("cannot open state store: {e}"))?,
    );

    let (fire_tx, fire_rx) = mpsc::unbounded_channel();
    let timers = Arc::new(TokioTimerService::new(fire_tx));

    let (event_tx, _event_rx) = broadcast::channel(EVENT_CAPACITY);
    let session_worker = Arc::new(HostSessionWorker::new(
        event_tx.clone(),
        Duration::from_secs(config.dispatch.result_timeout_secs()),
    ));

    let suggester: Option<Arc<dyn KeywordSuggester>> = match HttpSuggestClient::new(
        &config.suggest.endpoint,
        Duration::from_secs(config.suggest.timeout_secs),
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("keyword suggestions disabled: {e}");
            None
        }
    };

    let orchestrator = CampaignOrchestrator::new(
        Arc::clone(&store) as Arc<dyn cadence::store::StateStore>,
        timers,
        Arc::clone(&session_worker) as Arc<dyn SessionWorker>,
        config,
    );

    let event_loop = orchestrator.spawn_event_loop(fire_rx);
    let event_bridge = OrchestratorHandler::spawn_event_bridge(&orchestrator, event_tx.clone());
    let resynced = orchestrator.resume();
    if resynced > 0 {
        tracing::info!(timers = resynced, "restored pending timers from state");
    }

    let handler = OrchestratorHandler::new(orchestrator, session_worker, suggester);
    run_stdio_bridge_with_events(handler, event_tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "cadence-host exited with error");
            anyhow::anyhow!("cadence-host failed: {e}")
        })?;

    event_bridge.abort();
    event_loop.abort();
    tracing::info!("cadence-host shut down cleanly");
    Ok(())
}
