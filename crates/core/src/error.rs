//! Error types for the Deckhand domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Deckhand operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Reasoning service errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Chat transport errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Knowledge store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Operation errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

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

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Unauthorized sender: {sender_id} on {channel}")]
    Unauthorized { channel: String, sender_id: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Download failed for {file}: {reason}")]
    DownloadFailed { file: String, reason: String },

    #[error("Invalid update payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection unavailable: {0}")]
    Unavailable(String),

    #[error("Collection in the {0} store is in use by another operation")]
    Busy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown note type: {0}")]
    UnknownNoteType(String),

    #[error("Note {0} not found")]
    NoteNotFound(i64),

    #[error("Sync failed: {0}")]
    SyncFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown operation: {0}")]
    NotFound(String),

    #[error("Operation failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Store(#[from] StoreError),
}
