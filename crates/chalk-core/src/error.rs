//! Error types for chalk-core

use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias using chalk-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chalk-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error talking to the remote store
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store rejected the request
    #[error("Remote error: {0}")]
    Remote(String),

    /// No authenticated identity is available
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Cloud sync is disabled by configuration
    #[error("Cloud sync is disabled")]
    SyncDisabled,

    /// Stroke encode/decode failure
    #[error("Stroke codec error: {0}")]
    Codec(#[from] CodecError),

    /// Collaboration state machine or pairing failure
    #[error("Collaboration error: {0}")]
    Collaboration(String),

    /// Realtime channel failure
    #[error("Realtime channel error: {0}")]
    Realtime(String),
}
