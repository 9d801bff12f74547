//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the webhook server binds to.
    pub bind_addr: String,
    /// Path to the local database file.
    pub db_path: String,
    /// Anthropic API key. Absent means the booking conversation degrades to
    /// its apology reply on every turn (flows still work).
    pub api_key: Option<SecretString>,
    /// Model identifier for the booking conversation.
    pub model: String,
    /// Maximum tool-call rounds per inbound message.
    pub max_tool_rounds: usize,
    /// Timeout for a single model call.
    pub model_timeout: Duration,
    /// Timeout for a single collaborator call (calendar, store).
    pub collaborator_timeout: Duration,
    /// Maximum number of per-phone chat sessions kept in memory.
    pub chat_cache_capacity: usize,
    /// Chat sessions idle beyond this are evicted.
    pub chat_idle_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            db_path: "./data/kaelo.db".to_string(),
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tool_rounds: 5,
            model_timeout: Duration::from_secs(30),
            collaborator_timeout: Duration::from_secs(10),
            chat_cache_capacity: 256,
            chat_idle_timeout: Duration::from_secs(1800),
        }
    }
}

impl AppConfig {
    /// Build a config from `KAELO_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("KAELO_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(path) = std::env::var("KAELO_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            config.api_key = Some(SecretString::from(key));
        }
        if let Ok(model) = std::env::var("KAELO_MODEL") {
            config.model = model;
        }
        if let Ok(rounds) = std::env::var("KAELO_MAX_TOOL_ROUNDS") {
            config.max_tool_rounds =
                rounds.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "KAELO_MAX_TOOL_ROUNDS".to_string(),
                    message: format!("not a number: {rounds}"),
                })?;
        }
        if let Ok(secs) = std::env::var("KAELO_MODEL_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "KAELO_MODEL_TIMEOUT_SECS".to_string(),
                message: format!("not a number: {secs}"),
            })?;
            config.model_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.max_tool_rounds, 5);
        assert!(config.api_key.is_none());
        assert!(config.chat_cache_capacity > 0);
        assert!(config.model_timeout > config.collaborator_timeout);
    }
}
