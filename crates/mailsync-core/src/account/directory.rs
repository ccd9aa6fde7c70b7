//! The account directory seen by the scheduler.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::model::{Account, AccountId};
use crate::{Error, Result};

/// Source of accounts plus the bookkeeping writes the scheduler makes.
///
/// Writes are limited to `last_sync_at`, `error_message`, `error_count` and
/// `sync_enabled`.
pub trait AccountDirectory: Send + Sync {
    /// Returns every account, active or not.
    fn list(&self) -> impl Future<Output = Result<Vec<Account>>> + Send;

    /// Looks up one account.
    fn get(&self, id: AccountId) -> impl Future<Output = Result<Option<Account>>> + Send;

    /// Clears the error state and stamps `last_sync_at`.
    fn record_success(
        &self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Increments `error_count`, stores `message`, and clears
    /// `sync_enabled` once the count reaches `max_errors`. Returns the
    /// account as updated.
    fn record_failure(
        &self,
        id: AccountId,
        message: &str,
        max_errors: u32,
    ) -> impl Future<Output = Result<Account>> + Send;

    /// Turns sync back on and resets the error state.
    fn enable(&self, id: AccountId) -> impl Future<Output = Result<()>> + Send;
}

/// Directory kept in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    next_id: RwLock<i64>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account, assigning an id if it has none.
    pub async fn insert(&self, mut account: Account) -> AccountId {
        let mut next_id = self.next_id.write().await;
        let id = match account.id {
            Some(id) => id,
            None => {
                *next_id += 1;
                AccountId::new(*next_id)
            }
        };
        *next_id = (*next_id).max(id.0);
        account.id = Some(id);
        self.accounts.write().await.insert(id, account);
        id
    }
}

impl AccountDirectory for MemoryDirectory {
    async fn list(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn record_success(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(Error::AccountNotFound(id))?;
        account.error_count = 0;
        account.error_message = None;
        account.last_sync_at = Some(at);
        Ok(())
    }

    async fn record_failure(&self, id: AccountId, message: &str, max_errors: u32) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(Error::AccountNotFound(id))?;
        account.error_count = account.error_count.saturating_add(1);
        account.error_message = Some(message.to_string());
        if account.error_count >= max_errors {
            account.sync_enabled = false;
        }
        Ok(account.clone())
    }

    async fn enable(&self, id: AccountId) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(Error::AccountNotFound(id))?;
        account.sync_enabled = true;
        account.error_count = 0;
        account.error_message = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let directory = MemoryDirectory::new();
        let a = directory.insert(Account::with_email("a@example.com")).await;
        let b = directory.insert(Account::with_email("b@example.com")).await;
        assert_ne!(a, b);
        assert_eq!(directory.list().await.unwrap().len(), 2);
        assert_eq!(
            directory.get(b).await.unwrap().unwrap().email,
            "b@example.com"
        );
    }

    #[tokio::test]
    async fn test_failure_disables_at_threshold() {
        let directory = MemoryDirectory::new();
        let id = directory.insert(Account::with_email("a@example.com")).await;

        let account = directory.record_failure(id, "boom", 2).await.unwrap();
        assert_eq!(account.error_count, 1);
        assert!(account.sync_enabled);

        let account = directory.record_failure(id, "boom again", 2).await.unwrap();
        assert_eq!(account.error_count, 2);
        assert!(!account.sync_enabled);
        assert_eq!(account.error_message.as_deref(), Some("boom again"));

        directory.enable(id).await.unwrap();
        let account = directory.get(id).await.unwrap().unwrap();
        assert!(account.sync_enabled);
        assert_eq!(account.error_count, 0);
        assert!(account.error_message.is_none());
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let directory = MemoryDirectory::new();
        let err = directory
            .record_success(AccountId::new(9), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(id) if id == AccountId::new(9)));
    }
}
