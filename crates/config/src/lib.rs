//! Configuration loading and validation for opshound.
//!
//! Loads configuration from `~/.opshound/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.opshound/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model to use for every exchange.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Orchestration loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Metrics settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-5".into()
}

/// Model endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the Anthropic-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Max tokens per model response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum model-call/tool-execution cycles per exchange.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Serialized byte budget per tool result.
    #[serde(default = "default_result_byte_budget")]
    pub result_byte_budget: usize,

    /// How many recent transcript turns to send to the model.
    #[serde(default = "default_window_turns")]
    pub window_turns: usize,
}

fn default_max_iterations() -> u32 {
    8
}
fn default_result_byte_budget() -> usize {
    8_000
}
fn default_window_turns() -> usize {
    40
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            result_byte_budget: default_result_byte_budget(),
            window_turns: default_window_turns(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// How many recent exchange latency samples to keep.
    #[serde(default = "default_latency_samples")]
    pub latency_samples: usize,
}

fn default_latency_samples() -> usize {
    256
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            latency_samples: default_latency_samples(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("orchestrator", &self.orchestrator)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("OPSHOUND_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("OPSHOUND_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from an explicit path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".opshound")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }

        if self.orchestrator.result_byte_budget < 512 {
            return Err(ConfigError::ValidationError(
                "orchestrator.result_byte_budget must be at least 512".into(),
            ));
        }

        if self.endpoint.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "endpoint.max_tokens must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: EndpointConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
