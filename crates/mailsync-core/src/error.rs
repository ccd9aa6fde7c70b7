//! Error types for the core library.

use thiserror::Error;

use crate::account::AccountId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] mailsync_imap::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend refused a write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// The account is already being synced by another task.
    #[error("Account {0} is already syncing")]
    SyncInProgress(AccountId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
