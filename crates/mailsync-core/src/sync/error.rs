//! What can go wrong during a sync cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A recorded sync failure.
///
/// Values are plain data so a [`SyncResult`](super::SyncResult) can carry
/// them across tasks and serialize them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncError {
    /// Network or authentication failure.
    #[error("connection error: {message}")]
    Connection {
        /// Underlying cause.
        message: String,
    },

    /// Neither discovery strategy produced a UID list.
    #[error("discovery failed in {folder}: {message}")]
    Discovery {
        /// Folder being synced.
        folder: String,
        /// Underlying cause.
        message: String,
    },

    /// One message could not be parsed and was skipped.
    #[error("message {uid} in {folder} skipped: {message}")]
    Parse {
        /// Folder being synced.
        folder: String,
        /// UID of the skipped message.
        uid: u32,
        /// Underlying cause.
        message: String,
    },

    /// One attachment was oversized or could not be written.
    #[error("attachment {filename:?} of {message_id} skipped: {message}")]
    Attachment {
        /// Owning message.
        message_id: String,
        /// Attachment name as sent.
        filename: String,
        /// Underlying cause.
        message: String,
    },

    /// A batch could not be committed.
    #[error("persistence failed in {folder}: {message}")]
    Persistence {
        /// Folder being synced.
        folder: String,
        /// Underlying cause.
        message: String,
    },
}

impl SyncError {
    /// Builds a [`SyncError::Connection`] from any displayable cause.
    pub fn connection(cause: impl std::fmt::Display) -> Self {
        Self::Connection {
            message: cause.to_string(),
        }
    }

    /// True for failures that call for a reconnect.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// True for problems that are recorded but do not fail the cycle.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        matches!(self, Self::Attachment { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SyncError::Parse {
            folder: "INBOX".to_string(),
            uid: 5,
            message: "no headers".to_string(),
        };
        assert_eq!(err.to_string(), "message 5 in INBOX skipped: no headers");
        assert!(!err.is_connection());
        assert!(SyncError::connection("reset by peer").is_connection());
    }

    #[test]
    fn test_only_attachment_errors_are_warnings() {
        let skipped = SyncError::Attachment {
            message_id: "<a@x>".to_string(),
            filename: "big.bin".to_string(),
            message: "too large".to_string(),
        };
        assert!(skipped.is_warning());
        assert!(!SyncError::connection("eof").is_warning());
        let parse = SyncError::Parse {
            folder: "INBOX".to_string(),
            uid: 1,
            message: "bad".to_string(),
        };
        assert!(!parse.is_warning());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(SyncError::connection("timed out")).unwrap();
        assert_eq!(json["kind"], "connection");
        assert_eq!(json["message"], "timed out");
    }
}
