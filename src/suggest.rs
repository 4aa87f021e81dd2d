//! Keyword suggestion service adapter.
//!
//! A single blocking call from the orchestrator's point of view: one
//! request per user action, the result surfaced unmodified apart from the
//! uniqueness cap. Retry and backoff are a frontend concern.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Cap on returned suggestions.
pub const MAX_SUGGESTIONS: usize = 12;

/// Typed suggestion failure, surfaced to the caller unmodified.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SuggestError {
    /// No credential is configured.
    #[error("no credential configured for keyword suggestions")]
    MissingCredential,
    /// The upstream call failed.
    #[error("suggestion API error: {0}")]
    Api(String),
}

/// Keyword suggestion seam.
#[async_trait]
pub trait KeywordSuggester: Send + Sync {
    /// Fetch suggestions for `topic` using `credential`.
    async fn suggest(
        &self,
        topic: &str,
        credential: &str,
    ) -> std::result::Result<Vec<String>, SuggestError>;
}

/// Dedupe (preserving order) and cap a suggestion list.
#[must_use]
pub fn cap_unique(keywords: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .take(MAX_SUGGESTIONS)
        .collect()
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    keywords: Vec<String>,
}

/// HTTP suggestion client: POSTs `{"topic": ...}` with a bearer credential
/// and expects `{"keywords": [...]}` back.
pub struct HttpSuggestClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSuggestClient {
    /// Create a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SuggestError::Api`] when the endpoint is empty or the
    /// HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> std::result::Result<Self, SuggestError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(SuggestError::Api(
                "suggestion endpoint is not configured".to_owned(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SuggestError::Api(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_owned(),
            client,
        })
    }
}

#[async_trait]
impl KeywordSuggester for HttpSuggestClient {
    async fn suggest(
        &self,
        topic: &str,
        credential: &str,
    ) -> std::result::Result<Vec<String>, SuggestError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&serde_json::json!({ "topic": topic }))
            .send()
            .await
            .map_err(|e| SuggestError::Api(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SuggestError::Api(format!(
                "suggestion request failed ({status}): {body}"
            )));
        }

        let parsed: SuggestResponse = response
            .json()
            .await
            .map_err(|e| SuggestError::Api(format!("malformed suggestion response: {e}")))?;
        Ok(cap_unique(parsed.keywords))
    }
}
