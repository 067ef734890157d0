//! Error types for the agentloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, folded into [`Error`].

use thiserror::Error;

/// The top-level error type for all agentloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Caller errors ---
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // --- Repository / archive tiers ---
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    // --- Knowledge retrieval ---
    #[error("Retrieval unavailable: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Model calls ---
    #[error("Model call failed: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification surfaced at the HTTP and CLI boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    StorageUnavailable,
    RetrievalUnavailable,
    ModelCallFailure,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Storage(_) => ErrorKind::StorageUnavailable,
            Error::Retrieval(_) => ErrorKind::RetrievalUnavailable,
            Error::Provider(_) => ErrorKind::ModelCallFailure,
            Error::Tool(_)
            | Error::Config { .. }
            | Error::Serialization(_)
            | Error::Unsupported(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for rejecting caller input before any I/O happens.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

// --- Bounded context errors ---

/// Provider errors are `Clone` so a single upstream failure can be
/// delivered to every consumer of a multicast chunk stream.
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

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("repository tier: {0}")]
    Repository(String),

    #[error("archive tier: {0}")]
    Archive(String),

    #[error("corrupt archived turn: {0}")]
    Codec(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector store backend: {0}")]
    Backend(String),

    #[error("embedding generation failed: {0}")]
    Embedding(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
