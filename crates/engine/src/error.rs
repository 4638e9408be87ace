//! Engine error types.
//!
//! Cache and tool failures never leave the engine; prompt assembly and
//! provider failures are wrapped in [`QueryError`], the only error type the
//! orchestrator returns.

use repolens_core::error::ProviderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cache fingerprinting or storage failure. Always treated as a miss.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Failed to fingerprint request: {0}")]
    Fingerprint(String),
}

/// The system prompt could not be assembled; fatal for the request.
#[derive(Debug, Clone, Error)]
pub enum PromptAssemblyError {
    #[error("Invalid repository context: {0}")]
    InvalidRepositoryContext(String),
}

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("Prompt assembly failed: {0}")]
    PromptAssembly(#[from] PromptAssemblyError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl QueryError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PromptAssembly(_) => "prompt_assembly",
            Self::Provider(_) => "provider",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured error payload for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&QueryError> for ErrorBody {
    fn from(err: &QueryError) -> Self {
        err.body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = QueryError::from(ProviderError::AuthenticationFailed("bad key".into()));
        assert_eq!(err.kind(), "provider");
        assert_eq!(QueryError::Cancelled.kind(), "cancelled");

        let err = QueryError::from(PromptAssemblyError::InvalidRepositoryContext("empty".into()));
        assert_eq!(err.kind(), "prompt_assembly");
    }

    #[test]
    fn body_carries_message() {
        let body = QueryError::InvalidRequest("prompt is empty".into()).body();
        assert_eq!(body.kind, "invalid_request");
        assert!(body.message.contains("prompt is empty"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "invalid_request");
    }
}
