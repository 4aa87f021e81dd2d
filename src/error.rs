//! Error types for the campaign orchestrator.

/// Top-level error type for the session campaign system.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// A start request arrived while a run is already active.
    #[error("campaign already running")]
    AlreadyRunning,

    /// Durable state store error (read, write, or serialization).
    #[error("store error: {0}")]
    Store(String),

    /// Timer registration or cancellation error.
    #[error("timer error: {0}")]
    Timer(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Session dispatch coordination error.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CampaignError>;
