//! Versioned host command/event envelopes for frontend integration.

use crate::worker::SessionReport;
use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Command set for host integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "campaign.start")]
    CampaignStart,
    #[serde(rename = "campaign.start_immediate")]
    CampaignStartImmediate,
    #[serde(rename = "campaign.stop")]
    CampaignStop,
    #[serde(rename = "campaign.status")]
    CampaignStatus,
    #[serde(rename = "keywords.suggest")]
    KeywordsSuggest,
    #[serde(rename = "logs.list")]
    LogsList,
    #[serde(rename = "logs.clear")]
    LogsClear,
    #[serde(rename = "credential.set")]
    CredentialSet,
    #[serde(rename = "session.result")]
    SessionResult,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::CampaignStart => "campaign.start",
            Self::CampaignStartImmediate => "campaign.start_immediate",
            Self::CampaignStop => "campaign.stop",
            Self::CampaignStatus => "campaign.status",
            Self::KeywordsSuggest => "keywords.suggest",
            Self::LogsList => "logs.list",
            Self::LogsClear => "logs.clear",
            Self::CredentialSet => "credential.set",
            Self::SessionResult => "session.result",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "campaign.start" => Some(Self::CampaignStart),
            "campaign.start_immediate" => Some(Self::CampaignStartImmediate),
            "campaign.stop" => Some(Self::CampaignStop),
            "campaign.status" => Some(Self::CampaignStatus),
            "keywords.suggest" => Some(Self::KeywordsSuggest),
            "logs.list" => Some(Self::LogsList),
            "logs.clear" => Some(Self::LogsClear),
            "credential.set" => Some(Self::CredentialSet),
            "session.result" => Some(Self::SessionResult),
            _ => None,
        }
    }
}

/// A versioned command envelope from frontend -> backend host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned response envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned event envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Worker -> orchestrator session result message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResultPayload {
    /// Session id echoed from the dispatch event, when the frontend has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Keyword the session ran with.
    pub keyword: String,
    /// Whether the worker considers the session successful.
    pub success: bool,
    /// Seconds of watch time accumulated.
    #[serde(default)]
    pub watch_secs: f64,
    /// Number of videos watched, when counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos_watched: Option<u32>,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SessionResultPayload> for SessionReport {
    fn from(payload: SessionResultPayload) -> Self {
        Self {
            keyword: payload.keyword,
            success: payload.success,
            watch_secs: payload.watch_secs,
            videos_watched: payload.videos_watched,
            error: payload.error,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn command_names_round_trip_wire_format() {
        let all = [
            CommandName::HostPing,
            CommandName::CampaignStart,
            CommandName::CampaignStartImmediate,
            CommandName::CampaignStop,
            CommandName::CampaignStatus,
            CommandName::KeywordsSuggest,
            CommandName::LogsList,
            CommandName::LogsClear,
            CommandName::CredentialSet,
            CommandName::SessionResult,
        ];
        for command in all {
            assert_eq!(CommandName::parse(command.as_str()), Some(command));
            let json = serde_json::to_string(&command).expect("serialize");
            assert_eq!(json, format!("\"{}\"", command.as_str()));
        }
        assert_eq!(CommandName::parse("campaign.unknown"), None);
    }

    #[test]
    fn envelope_validate_rejects_bad_version_and_empty_request_id() {
        let mut envelope =
            CommandEnvelope::new("req-1", CommandName::HostPing, serde_json::json!({}));
        assert!(envelope.validate().is_ok());

        envelope.v = 99;
        let err = envelope.validate().expect_err("bad version");
        assert_eq!(err.kind, ContractErrorKind::UnsupportedVersion);

        envelope.v = EVENT_VERSION;
        envelope.request_id = "  ".to_owned();
        let err = envelope.validate().expect_err("empty request id");
        assert_eq!(err.kind, ContractErrorKind::InvalidEnvelope);
    }

    #[test]
    fn session_result_payload_maps_to_report() {
        let payload: SessionResultPayload = serde_json::from_str(
            "{\"keyword\":\"cats\",\"success\":true,\"watch_secs\":12.5,\"videos_watched\":2}",
        )
        .expect("deserialize");
        assert_eq!(payload.session_id, None);

        let report: SessionReport = payload.into();
        assert!(report.success);
        assert_eq!(report.keyword, "cats");
        assert_eq!(report.watch_secs, 12.5);
        assert_eq!(report.videos_watched, Some(2));
    }

    #[test]
    fn response_envelope_roundtrip_json() {
        let resp = ResponseEnvelope::ok("req-1", serde_json::json!({"pong": true}));
        let json = serde_json::to_string(&resp).expect("serialize");
        let parsed: ResponseEnvelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, resp);
    }
}
