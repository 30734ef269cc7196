//! Configuration parsing and management.
//!
//! The monitor is configured from a TOML file with three sections:
//!
//! ```toml
//! [api]
//! base_url = "https://hiring.example.com"
//! session_cookie_env = "EXAMGUARD_SESSION_COOKIE"
//!
//! [monitor]
//! max_warnings = 3
//! snapshot_interval_secs = 30
//!
//! [finalize]
//! step_timeout_secs = 15
//! exit_route = "/dashboard/candidate"
//! ```
//!
//! Every field has a default matching the reference deployment, so an empty
//! file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::DEFAULT_MAX_WARNINGS;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML is malformed or has unknown keys.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProctorConfig {
    /// Backend endpoints.
    #[serde(default)]
    pub api: ApiConfig,

    /// Monitoring policy.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Final submission.
    #[serde(default)]
    pub finalize: FinalizeConfig,
}

impl ProctorConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "api.base_url must be an http(s) URL, got '{base}'"
            )));
        }
        for (field, path) in [
            ("api.proctor_log_path", &self.api.proctor_log_path),
            ("api.execute_path", &self.api.execute_path),
            ("api.analyze_path", &self.api.analyze_path),
            ("api.report_path", &self.api.report_path),
            ("api.identity_path", &self.api.identity_path),
            ("finalize.exit_route", &self.finalize.exit_route),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "{field} must start with '/', got '{path}'"
                )));
            }
        }
        if self.api.telemetry_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "api.telemetry_timeout_ms must be positive".to_string(),
            ));
        }
        if self.monitor.max_warnings == 0 {
            return Err(ConfigError::Validation(
                "monitor.max_warnings must be a positive integer".to_string(),
            ));
        }
        if self.monitor.snapshot_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "monitor.snapshot_interval_secs must be positive".to_string(),
            ));
        }
        if self.finalize.step_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "finalize.step_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Scheme, host and port of the backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Proctor collector endpoint.
    #[serde(default = "default_proctor_log_path")]
    pub proctor_log_path: String,

    /// Code execution endpoint.
    #[serde(default = "default_execute_path")]
    pub execute_path: String,

    /// Code analysis endpoint.
    #[serde(default = "default_analyze_path")]
    pub analyze_path: String,

    /// Report generation endpoint.
    #[serde(default = "default_report_path")]
    pub report_path: String,

    /// Current-user endpoint.
    #[serde(default = "default_identity_path")]
    pub identity_path: String,

    /// Environment variable holding the session cookie sent with every
    /// request. Unset means requests go out without credentials.
    #[serde(default)]
    pub session_cookie_env: Option<String>,

    /// Upper bound for one telemetry delivery, in milliseconds.
    #[serde(default = "default_telemetry_timeout_ms")]
    pub telemetry_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            proctor_log_path: default_proctor_log_path(),
            execute_path: default_execute_path(),
            analyze_path: default_analyze_path(),
            report_path: default_report_path(),
            identity_path: default_identity_path(),
            session_cookie_env: None,
            telemetry_timeout_ms: default_telemetry_timeout_ms(),
        }
    }
}

impl ApiConfig {
    /// Telemetry delivery timeout.
    #[must_use]
    pub const fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    /// Resolves the session cookie from the environment, if configured.
    #[must_use]
    pub fn session_cookie(&self) -> Option<String> {
        self.session_cookie_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.is_empty())
    }
}

/// Monitoring policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Violations tolerated before auto-submit.
    #[serde(default = "default_max_warnings")]
    pub max_warnings: u32,

    /// Webcam snapshot period in seconds.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Whether the session asks for fullscreen as soon as it starts.
    #[serde(default = "default_true")]
    pub request_fullscreen_on_start: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_warnings: default_max_warnings(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            request_fullscreen_on_start: true,
        }
    }
}

impl MonitorConfig {
    /// Snapshot period.
    #[must_use]
    pub const fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

/// Final submission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalizeConfig {
    /// Upper bound for each collaborator call made while finalizing.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Route the candidate is sent to once the assessment is over.
    #[serde(default = "default_exit_route")]
    pub exit_route: String,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            exit_route: default_exit_route(),
        }
    }
}

impl FinalizeConfig {
    /// Per-step timeout.
    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_proctor_log_path() -> String {
    "/proctor/log".to_string()
}

fn default_execute_path() -> String {
    "/code/execute".to_string()
}

fn default_analyze_path() -> String {
    "/code/analyze".to_string()
}

fn default_report_path() -> String {
    "/api/v1/generate-report".to_string()
}

fn default_identity_path() -> String {
    "/api/user/me".to_string()
}

const fn default_telemetry_timeout_ms() -> u64 {
    10_000
}

const fn default_max_warnings() -> u32 {
    DEFAULT_MAX_WARNINGS
}

const fn default_snapshot_interval_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_step_timeout_secs() -> u64 {
    15
}

fn default_exit_route() -> String {
    "/dashboard/candidate".to_string()
}
