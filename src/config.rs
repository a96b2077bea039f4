//! Ingestor Configuration
//!
//! Settings are read from `TXSTREAM_`-prefixed environment variables, optionally
//! seeded from a `.env` file.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::publisher::DEFAULT_CHANNEL;
use crate::source::{SourceConfig, SourceError, SubscriptionFilter, DEFAULT_ENDPOINT};

/// Prefix of every environment variable read by [`IngestorConfig`]
pub const ENV_PREFIX: &str = "TXSTREAM_";

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Failed to read env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("Invalid target account '{0}': expected a base-58 encoded 32-byte key")]
    InvalidTargetAccount(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// Top-level settings of the ingestor
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IngestorConfig {
    /// Streaming service URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Account whose transactions are subscribed to
    pub target_account: String,
    /// Access token for the streaming service
    #[serde(default)]
    pub x_token: Option<String>,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Redis pub/sub channel for decoded records
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub include_failed: bool,
    #[serde(default)]
    pub include_votes: bool,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

impl IngestorConfig {
    /// Load from the process environment, after reading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from explicit `KEY=value` pairs (keys carry the prefix)
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.env` style file without touching the process environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let pairs = dotenvy::from_path_iter(path)?.collect::<Result<Vec<_>, _>>()?;
        Self::from_pairs(pairs)
    }

    /// Check the target account and endpoint
    pub fn validate(&self) -> Result<(), ConfigError> {
        let decoded = bs58::decode(&self.target_account)
            .into_vec()
            .map_err(|_| ConfigError::InvalidTargetAccount(self.target_account.clone()))?;
        if decoded.len() != 32 {
            return Err(ConfigError::InvalidTargetAccount(self.target_account.clone()));
        }

        self.source_config().endpoint()?;
        Ok(())
    }

    /// Connection settings for the update source
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            x_token: self.x_token.clone(),
            ..SourceConfig::with_endpoint(self.endpoint.clone())
        }
    }

    /// Subscription filter for the target account
    pub fn subscription_filter(&self) -> SubscriptionFilter {
        SubscriptionFilter::for_account(self.target_account.clone())
            .with_failed(self.include_failed)
            .with_votes(self.include_votes)
    }
}
