// Error types shared by the cache, the provider adapters and the orchestrator

use serde::Serialize;
use thiserror::Error;

use crate::model::ProviderKind;

// Errors a single search can end with
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error from {provider}: {message}")]
    Upstream {
        provider: ProviderKind,
        message: String,
    },

    #[error("Request to {provider} timed out after {after_ms}ms")]
    Timeout { provider: ProviderKind, after_ms: u64 },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl SearchError {
    pub fn validation(message: impl Into<String>) -> Self {
        SearchError::Validation(message.into())
    }

    pub fn upstream(provider: ProviderKind, message: impl Into<String>) -> Self {
        SearchError::Upstream {
            provider,
            message: message.into(),
        }
    }

    // Message without the variant prefix, as reported to callers
    pub fn message(&self) -> String {
        match self {
            SearchError::Validation(message) => message.clone(),
            SearchError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

// Error descriptor returned to callers: `{ "error": "..." }`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&SearchError> for ErrorBody {
    fn from(err: &SearchError) -> Self {
        Self {
            error: err.message(),
        }
    }
}
