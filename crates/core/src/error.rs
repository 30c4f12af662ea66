//! Error types for the Seedkeeper domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Seedkeeper operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend model errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Broker (queue / kv / pubsub) errors ---
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Chat platform errors ---
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    // --- Command handler errors ---
    #[error("Handler '{command}' failed: {reason}")]
    Handler { command: String, reason: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for handler failures.
    pub fn handler(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Handler {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

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

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected credentials")]
    Unauthorized,

    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error("Broker payload could not be encoded or decoded: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Transport failures are the only class retried automatically.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Platform not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel_id}: {reason}")]
    DeliveryFailed { channel_id: String, reason: String },

    #[error("Platform connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}
