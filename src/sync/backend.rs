//! Remote destination contract and typed destination configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::telegram::TelegramBackend;
use crate::error::{Error, Result};

/// Failure reported by a remote destination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network failure, rate limit, server hiccup: worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// Rejected content or configuration: retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// A remote mirror target. Calls block; the engine runs them on the
/// blocking thread pool.
pub trait RemoteBackend: Send + Sync {
    /// Check the configuration is usable without changing anything remotely.
    fn validate(&self) -> bool;

    /// Upload one file, returning the reference needed to delete it later.
    fn upload(&self, content_type: &str, path: &Path) -> std::result::Result<String, BackendError>;

    /// Remove a previously uploaded item. An item that is already gone is
    /// not an error.
    fn delete(&self, remote_ref: &str) -> std::result::Result<(), BackendError>;

    fn is_retryable(&self, err: &BackendError) -> bool {
        matches!(err, BackendError::Transient(_))
    }
}

pub const TELEGRAM: &str = "telegram";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    pub channel: String,
    /// Override of `https://api.telegram.org`, for self-hosted Bot API servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// Configuration of one destination, by type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationConfig {
    Telegram(TelegramConfig),
}

impl DestinationConfig {
    /// Parse the stored JSON config for a destination of type `kind`.
    pub fn parse(kind: &str, config: &Value) -> Result<Self> {
        match kind {
            TELEGRAM => {
                let parsed: TelegramConfig = serde_json::from_value(config.clone())
                    .map_err(|e| Error::InvalidConfig(e.to_string()))?;
                if parsed.token.trim().is_empty() {
                    return Err(Error::InvalidConfig("token is empty".into()));
                }
                if parsed.channel.trim().is_empty() {
                    return Err(Error::InvalidConfig("channel is empty".into()));
                }
                Ok(DestinationConfig::Telegram(parsed))
            }
            other => Err(Error::InvalidType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DestinationConfig::Telegram(_) => TELEGRAM,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        match self {
            DestinationConfig::Telegram(cfg) => Ok(serde_json::to_value(cfg)?),
        }
    }
}

/// Turns a destination config into a live backend.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, config: &DestinationConfig) -> Result<Arc<dyn RemoteBackend>>;
}

/// Builds the real network backends.
#[derive(Debug, Clone)]
pub struct DefaultResolver {
    request_timeout: Duration,
}

impl DefaultResolver {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl BackendResolver for DefaultResolver {
    fn resolve(&self, config: &DestinationConfig) -> Result<Arc<dyn RemoteBackend>> {
        match config {
            DestinationConfig::Telegram(cfg) => {
                Ok(Arc::new(TelegramBackend::new(cfg.clone(), self.request_timeout)))
            }
        }
    }
}
