//! Model endpoint implementations for opshound.
//!
//! The orchestrator only knows the `ModelEndpoint` trait from core;
//! this crate supplies the one concrete backend a deployment ships —
//! the Anthropic Messages API, blocking and streaming.

pub mod anthropic;

pub use anthropic::AnthropicEndpoint;

use opshound_config::AppConfig;
use opshound_core::error::Error;

/// Build the configured endpoint, failing early when no API key is set.
pub fn from_config(config: &AppConfig) -> Result<AnthropicEndpoint, Error> {
    let api_key = config.api_key.as_deref().ok_or_else(|| Error::Config {
        message: "no API key configured (set OPSHOUND_API_KEY or ANTHROPIC_API_KEY)".into(),
    })?;

    Ok(AnthropicEndpoint::new(api_key, &config.model)
        .with_base_url(&config.endpoint.base_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_api_key() {
        let config = AppConfig::default();
        let err = from_config(&config).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn from_config_uses_configured_base_url() {
        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..AppConfig::default()
        };
        let endpoint = from_config(&config).unwrap();
        assert_eq!(endpoint.base_url(), "https://api.anthropic.com");
    }
}
