//! Configuration types for the campaign orchestrator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Multi-day schedule generation policy.
    pub schedule: SchedulePolicy,
    /// Session dispatch settings (both modes).
    pub dispatch: DispatchConfig,
    /// Outcome journal settings.
    pub journal: JournalConfig,
    /// Keyword suggestion service settings.
    pub suggest: SuggestConfig,
}

/// Policy parameters for randomized multi-day schedule generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePolicy {
    /// Campaign length in days.
    pub days: u32,
    /// Minimum sessions drawn per day.
    pub min_sessions_per_day: u32,
    /// Maximum sessions drawn per day.
    pub max_sessions_per_day: u32,
    /// Minimum gap between a day's sessions, in hours.
    pub min_gap_hours: f64,
    /// Maximum gap between a day's sessions, in hours.
    pub max_gap_hours: f64,
    /// Extra time past the last day before the terminal timer fires, in hours.
    pub end_buffer_hours: f64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            days: 7,
            min_sessions_per_day: 3,
            max_sessions_per_day: 5,
            min_gap_hours: 2.0,
            max_gap_hours: 5.0,
            end_buffer_hours: 1.0,
        }
    }
}

impl SchedulePolicy {
    /// Check the policy for internally consistent bounds.
    pub fn validate(&self) -> crate::Result<()> {
        if self.days == 0 {
            return Err(crate::CampaignError::Config(
                "schedule days must be at least 1".to_owned(),
            ));
        }
        if self.min_sessions_per_day == 0 {
            return Err(crate::CampaignError::Config(
                "min_sessions_per_day must be at least 1".to_owned(),
            ));
        }
        if self.min_sessions_per_day > self.max_sessions_per_day {
            return Err(crate::CampaignError::Config(format!(
                "min_sessions_per_day ({}) exceeds max_sessions_per_day ({})",
                self.min_sessions_per_day, self.max_sessions_per_day
            )));
        }
        if self.min_gap_hours < 0.0 || self.min_gap_hours > self.max_gap_hours {
            return Err(crate::CampaignError::Config(format!(
                "gap hours range [{}, {}] is invalid",
                self.min_gap_hours, self.max_gap_hours
            )));
        }
        if self.end_buffer_hours < 0.0 {
            return Err(crate::CampaignError::Config(
                "end_buffer_hours must not be negative".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Session dispatch configuration shared by both run modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on a single session's watch time, passed to the worker.
    pub max_watch_secs: u32,
    /// Immediate mode: minimum delay between sessions, in seconds.
    pub min_session_delay_secs: u64,
    /// Immediate mode: maximum delay between sessions, in seconds.
    pub max_session_delay_secs: u64,
    /// Immediate mode: fixed delay before retrying after a launch failure.
    pub launch_retry_delay_secs: u64,
    /// Extra time past `max_watch_secs` before a silent worker is written
    /// off as unresponsive.
    pub result_grace_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_watch_secs: 300,
            min_session_delay_secs: 30,
            max_session_delay_secs: 120,
            launch_retry_delay_secs: 15,
            result_grace_secs: 120,
        }
    }
}

impl DispatchConfig {
    /// Total host-side wait for a session result, in seconds.
    #[must_use]
    pub fn result_timeout_secs(&self) -> u64 {
        u64::from(self.max_watch_secs) + self.result_grace_secs
    }
}

/// Outcome journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Maximum number of retained log entries.
    pub max_entries: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { max_entries: 50 }
    }
}

/// Keyword suggestion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestConfig {
    /// Suggestion API endpoint. Empty means not configured.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::CampaignError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::CampaignError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/cadence/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("cadence").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("cadence")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/cadence-config/config.toml")
        }
    }
}
