//! In-memory store used by tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use super::{MailStore, StoreProvider, StoredMessage, SyncCursor, UpsertOutcome};
use crate::account::AccountId;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<String, StoredMessage>,
    cursors: HashMap<String, SyncCursor>,
}

/// A [`MailStore`] kept in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with [`Error::Storage`], to
    /// exercise rollback paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl MailStore for MemoryStore {
    async fn upsert_messages_and_advance_cursor(
        &self,
        folder: &str,
        messages: &[StoredMessage],
        cursor: SyncCursor,
    ) -> Result<UpsertOutcome> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        let mut outcome = UpsertOutcome::default();
        for message in messages {
            if inner
                .messages
                .insert(message.message_id.clone(), message.clone())
                .is_some()
            {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        let stored = inner.cursors.get(folder).copied();
        inner
            .cursors
            .insert(folder.to_string(), SyncCursor::advance(stored, cursor));
        Ok(outcome)
    }

    async fn existing_message_ids(&self, folder: &str) -> Result<HashSet<String>> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .values()
            .filter(|m| m.folder == folder)
            .map(|m| m.message_id.clone())
            .collect())
    }

    async fn get_cursor(&self, folder: &str) -> Result<Option<SyncCursor>> {
        Ok(self.inner.lock().await.cursors.get(folder).copied())
    }

    async fn put_cursor(&self, folder: &str, cursor: SyncCursor) -> Result<()> {
        self.check_writable()?;
        self.inner
            .lock()
            .await
            .cursors
            .insert(folder.to_string(), cursor);
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        Ok(self.inner.lock().await.messages.get(message_id).cloned())
    }

    async fn message_count(&self) -> Result<u64> {
        Ok(self.inner.lock().await.messages.len() as u64)
    }
}

/// Hands out one shared [`MemoryStore`] per account.
#[derive(Debug, Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<AccountId, MemoryStore>>,
}

impl MemoryStoreProvider {
    /// Creates a provider with no stores yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `account`'s store, creating it if needed.
    pub async fn store(&self, account: AccountId) -> MemoryStore {
        self.stores.lock().await.entry(account).or_default().clone()
    }
}

impl StoreProvider for MemoryStoreProvider {
    type Store = MemoryStore;

    async fn open(&self, account: AccountId) -> Result<MemoryStore> {
        Ok(self.store(account).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::ContentKind;

    fn message(id: &str, folder: &str, uid: u32) -> StoredMessage {
        StoredMessage {
            message_id: id.to_string(),
            uid: Some(uid),
            folder: folder.to_string(),
            subject: Some("hello".to_string()),
            from: None,
            to: None,
            cc: None,
            date: None,
            body_text: Some("body".to_string()),
            body_html: None,
            content_type: ContentKind::Plain,
            flags: Vec::new(),
            size: Some(4),
            has_attachments: false,
            attachments_path: None,
            attachments: Vec::new(),
            synced_at: Utc::now(),
        }
    }

    fn cursor(highest_uid: u32) -> SyncCursor {
        SyncCursor {
            uid_validity: 1,
            highest_uid,
            last_sync_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_upsert_dedups_by_identifier() {
        let store = MemoryStore::new();
        let first = store
            .upsert_messages_and_advance_cursor("INBOX", &[message("<a@x>", "INBOX", 1)], cursor(1))
            .await
            .unwrap();
        assert_eq!(first, UpsertOutcome { inserted: 1, updated: 0 });

        let second = store
            .upsert_messages_and_advance_cursor("INBOX", &[message("<a@x>", "INBOX", 1)], cursor(1))
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome { inserted: 0, updated: 1 });
        assert_eq!(store.message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store
            .upsert_messages_and_advance_cursor("INBOX", &[message("<a@x>", "INBOX", 1)], cursor(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.message_count().await.unwrap(), 0);
        assert!(store.get_cursor("INBOX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provider_shares_store_per_account() {
        let provider = MemoryStoreProvider::new();
        let a = provider.open(AccountId::new(1)).await.unwrap();
        a.put_cursor("INBOX", cursor(9)).await.unwrap();

        let again = provider.open(AccountId::new(1)).await.unwrap();
        assert_eq!(again.get_cursor("INBOX").await.unwrap().unwrap().highest_uid, 9);

        let other = provider.open(AccountId::new(2)).await.unwrap();
        assert!(other.get_cursor("INBOX").await.unwrap().is_none());
    }
}
