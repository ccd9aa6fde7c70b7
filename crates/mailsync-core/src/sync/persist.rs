//! Committing batches.

use chrono::Utc;
use tracing::{debug, error};

use super::error::SyncError;
use crate::store::{MailStore, StoredMessage, SyncCursor, UpsertOutcome};

/// Writes one folder's batches and moves its cursor with them.
#[derive(Debug)]
pub struct Persister<'a, M> {
    store: &'a M,
    folder: &'a str,
    uid_validity: u32,
}

impl<'a, M: MailStore> Persister<'a, M> {
    /// Persister for `folder` in generation `uid_validity`.
    pub const fn new(store: &'a M, folder: &'a str, uid_validity: u32) -> Self {
        Self {
            store,
            folder,
            uid_validity,
        }
    }

    /// Upserts `messages` and advances the cursor to `highest_uid` in one
    /// transaction. `messages` may be empty when every message in the batch
    /// failed; the cursor still moves past them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the transaction failed. Nothing
    /// was written in that case.
    pub async fn commit(
        &self,
        messages: &[StoredMessage],
        highest_uid: u32,
    ) -> Result<UpsertOutcome, SyncError> {
        let cursor = SyncCursor {
            uid_validity: self.uid_validity,
            highest_uid,
            last_sync_at: Some(Utc::now()),
        };

        match self
            .store
            .upsert_messages_and_advance_cursor(self.folder, messages, cursor)
            .await
        {
            Ok(outcome) => {
                debug!(
                    folder = self.folder,
                    inserted = outcome.inserted,
                    updated = outcome.updated,
                    highest_uid,
                    "batch committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(folder = self.folder, error = %e, "batch rolled back");
                Err(SyncError::Persistence {
                    folder: self.folder.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
