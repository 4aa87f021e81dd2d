//! Cadence: session campaign orchestrator.
//!
//! Coordinates multi-day campaigns of discrete keyword-driven sessions,
//! each delegated to an external page-automation worker.
//!
//! # Architecture
//!
//! The orchestrator is built from small components over two primitives --
//! "persist state" and "wake me at time T":
//! - **Store**: durable, versioned campaign document with serialized
//!   read-modify-write (`store`)
//! - **Timers**: named one-shot wake-ups delivered over a channel (`timers`)
//! - **Schedule**: pure randomized multi-day session planning (`schedule`)
//! - **Manager**: run lifecycle and the single-active-run invariant
//!   (`manager`)
//! - **Dispatcher**: timer-triggered sessions and the immediate-mode loop
//!   (`dispatch`)
//! - **Journal**: bounded most-recent-first outcome log (`journal`)
//! - **Host**: versioned command/event envelopes over a stdio bridge
//!   (`host`)

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod journal;
pub mod manager;
pub mod orchestrator;
pub mod schedule;
pub mod store;
pub mod suggest;
pub mod timers;
pub mod worker;

pub use config::OrchestratorConfig;
pub use error::{CampaignError, Result};
pub use journal::{LogEntry, LogKind};
pub use orchestrator::{CampaignEvent, CampaignOrchestrator, CampaignStatus};
pub use store::{CampaignState, RunMode};
pub use worker::{SessionReport, SessionRequest, SessionWorker};
