//! Error types for the RepoLens domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (model providers, tools, document fetching) has its
//! own error enum; the engine converts them into a structured query error
//! before anything reaches a caller.

use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Malformed request: {0}")]
    InvalidRequest(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Timeouts, rate limits, network failures, interrupted streams and
    /// server-side (5xx) errors are transient. Authentication, unknown models,
    /// malformed requests and other 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::Network(_)
            | Self::StreamInterrupted(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::InvalidRequest(_)
            | Self::NotConfigured(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("Document not found: {owner}/{repo}/{path}")]
    NotFound {
        owner: String,
        repo: String,
        path: String,
    },

    #[error("Access denied to {owner}/{repo}: {reason}")]
    AccessDenied {
        owner: String,
        repo: String,
        reason: String,
    },

    #[error("Git service error: {0}")]
    Service(String),

    #[error("Network error: {0}")]
    Network(String),
}
