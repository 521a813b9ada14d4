//! Error taxonomy for the Vida Plena server.
//!
//! Every storage or model failure is caught at the request boundary and
//! converted to one of these variants; none of them crash the process.

use thiserror::Error;

/// Result type alias using the Vida Plena error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the server.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (startup-only, never mapped to a response)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or request shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Bad credentials or missing authentication
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Referenced account missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate email
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Durable backend unreachable
    #[error("Storage unavailable: {0}")]
    Storage(String),

    /// Conversation context not initialized yet
    #[error("Chat not ready: {0}")]
    ChatNotReady(String),

    /// Remote model failure (network, quota, safety block)
    #[error("Model error: {0}")]
    Model(String),
}

impl Error {
    /// Get the HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Auth(_) => 401,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Storage(_) | Self::ChatNotReady(_) | Self::Model(_) | Self::Config(_) => 500,
        }
    }

    /// Stable machine-readable code carried in error payloads.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Auth(_) => "AUTH_INVALID_CREDENTIALS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "DUPLICATE_EMAIL",
            Self::Storage(_) => "STORAGE_UNAVAILABLE",
            Self::ChatNotReady(_) => "CHAT_NOT_READY",
            Self::Model(_) => "MODEL_ERROR",
        }
    }
}
