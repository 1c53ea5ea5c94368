//! Client configuration.

use std::path::Path;
use std::time::Duration;

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use crate::channel::Backoff;

/// Reconnect backoff settings, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first reconnect.
    #[serde(default = "default_base_ms")]
    base_ms: u64,

    /// Ceiling on the reconnect delay.
    #[serde(default = "default_max_ms")]
    max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
        }
    }
}

/// Configuration for the chess client.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket root; live games live under `<ws_base>/game/live/{id}`.
    #[serde(default = "default_ws_base")]
    ws_base: String,

    /// REST API root.
    #[serde(default = "default_api_base")]
    api_base: String,

    /// Authenticated user, used when no access token is supplied.
    #[serde(default)]
    user_id: Option<String>,

    /// Reconnect backoff.
    #[serde(default)]
    backoff: BackoffConfig,
}

fn default_ws_base() -> String {
    "ws://localhost:8080".to_string()
}

fn default_api_base() -> String {
    "http://localhost:8080".to_string()
}

fn default_base_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_base: default_ws_base(),
            api_base: default_api_base(),
            user_id: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {e}")))?;
        config.validate()?;

        info!(ws_base = %config.ws_base, api_base = %config.api_base, "Config loaded successfully");
        Ok(config)
    }

    /// Overrides the authenticated user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// WebSocket root as a URL.
    pub fn ws_base_url(&self) -> Result<Url, ConfigError> {
        let url = parse_url("ws_base", &self.ws_base)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::new(format!(
                "ws_base must use ws or wss, not {other}"
            ))),
        }
    }

    /// REST API root as a URL.
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        let url = parse_url("api_base", &self.api_base)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::new(format!(
                "api_base must use http or https, not {other}"
            ))),
        }
    }

    /// Reconnect backoff policy.
    pub fn backoff_policy(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.base_ms),
            Duration::from_millis(self.backoff.max_ms),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.ws_base_url()?;
        self.api_base_url()?;
        if self.backoff.base_ms == 0 || self.backoff.base_ms > self.backoff.max_ms {
            return Err(ConfigError::new(format!(
                "backoff.base_ms ({}) must be positive and at most backoff.max_ms ({})",
                self.backoff.base_ms, self.backoff.max_ms
            )));
        }
        Ok(())
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::new(format!("Invalid {field} {value:?}: {e}")))
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}
