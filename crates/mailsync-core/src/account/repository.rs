//! Account storage repository.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::directory::AccountDirectory;
use super::model::{Account, AccountId, ImapConfig, Security};
use crate::{Error, Result};

const ACCOUNT_COLUMNS: &str = r"
    id, name, email,
    imap_host, imap_port, imap_security, imap_username, imap_password,
    is_active, sync_enabled, error_count, error_message, last_sync_at
";

/// `SQLite`-backed account directory (`accounts.db`).
///
/// Credentials live in the same file; keep the data directory private.
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Opens (creating if needed) the database at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("sqlite:{}?mode=rwc", database_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                imap_security TEXT NOT NULL,
                imap_username TEXT NOT NULL,
                imap_password TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                sync_enabled INTEGER NOT NULL DEFAULT 1,
                error_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                last_sync_at TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all accounts, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    /// Get account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_account))
    }

    /// Save an account (insert or update).
    ///
    /// Connection settings and flags are written; the error bookkeeping is
    /// only changed through [`AccountDirectory`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn save(&self, account: &mut Account) -> Result<()> {
        if let Some(id) = account.id {
            sqlx::query(
                r"
                UPDATE accounts SET
                    name = ?, email = ?,
                    imap_host = ?, imap_port = ?, imap_security = ?,
                    imap_username = ?, imap_password = ?,
                    is_active = ?, sync_enabled = ?,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                ",
            )
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.imap.host)
            .bind(i64::from(account.imap.port))
            .bind(account.imap.security.as_str())
            .bind(&account.imap.username)
            .bind(&account.imap.password)
            .bind(account.is_active)
            .bind(account.sync_enabled)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        } else {
            let result = sqlx::query(
                r"
                INSERT INTO accounts (
                    name, email,
                    imap_host, imap_port, imap_security, imap_username, imap_password,
                    is_active, sync_enabled
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.imap.host)
            .bind(i64::from(account.imap.port))
            .bind(account.imap.security.as_str())
            .bind(&account.imap.username)
            .bind(&account.imap.password)
            .bind(account.is_active)
            .bind(account.sync_enabled)
            .execute(&self.pool)
            .await?;

            account.id = Some(AccountId::new(result.last_insert_rowid()));
        }

        debug!(account = ?account.id, email = %account.email, "account saved");
        Ok(())
    }

    /// Delete an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl AccountDirectory for AccountRepository {
    async fn list(&self) -> Result<Vec<Account>> {
        Self::list(self).await
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        Self::get(self, id).await
    }

    async fn record_success(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                error_count = 0, error_message = NULL, last_sync_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(at.to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::AccountNotFound(id));
        }
        Ok(())
    }

    async fn record_failure(&self, id: AccountId, message: &str, max_errors: u32) -> Result<Account> {
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                error_count = error_count + 1,
                error_message = ?,
                sync_enabled = CASE WHEN error_count + 1 >= ? THEN 0 ELSE sync_enabled END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(message)
        .bind(i64::from(max_errors))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::AccountNotFound(id));
        }
        Self::get(self, id).await?.ok_or(Error::AccountNotFound(id))
    }

    async fn enable(&self, id: AccountId) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                sync_enabled = 1, error_count = 0, error_message = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::AccountNotFound(id));
        }
        Ok(())
    }
}

/// Convert a database row to an Account.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Account {
    let last_sync_at: Option<String> = row.get("last_sync_at");

    Account {
        id: Some(AccountId::new(row.get("id"))),
        name: row.get("name"),
        email: row.get("email"),
        imap: ImapConfig {
            host: row.get("imap_host"),
            port: row.get::<i64, _>("imap_port") as u16,
            security: row
                .get::<&str, _>("imap_security")
                .parse()
                .unwrap_or(Security::Tls),
            username: row.get("imap_username"),
            password: row.get("imap_password"),
        },
        is_active: row.get::<i64, _>("is_active") != 0,
        sync_enabled: row.get::<i64, _>("sync_enabled") != 0,
        error_count: row.get::<i64, _>("error_count").max(0) as u32,
        error_message: row.get("error_message"),
        last_sync_at: last_sync_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn account(email: &str) -> Account {
        let mut account = Account::with_email(email);
        account.imap.password = "secret".to_string();
        account
    }

    #[tokio::test]
    async fn test_create_and_retrieve_account() {
        let repo = AccountRepository::in_memory().await.unwrap();

        let mut account = account("test@example.com");
        account.imap.security = Security::StartTls;
        account.imap.port = 143;
        repo.save(&mut account).await.unwrap();
        assert!(account.id.is_some());

        let retrieved = repo.get(account.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(retrieved.email, "test@example.com");
        assert_eq!(retrieved.imap.security, Security::StartTls);
        assert_eq!(retrieved.imap.port, 143);
        assert_eq!(retrieved.imap.password, "secret");
        assert!(retrieved.sync_enabled);
        assert_eq!(retrieved.error_count, 0);
        assert!(retrieved.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_list_accounts() {
        let repo = AccountRepository::in_memory().await.unwrap();
        repo.save(&mut account("user1@example.com")).await.unwrap();
        repo.save(&mut account("user2@example.com")).await.unwrap();

        let accounts = repo.list().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].email, "user1@example.com");
    }

    #[tokio::test]
    async fn test_failure_bookkeeping_disables_sync() {
        let repo = AccountRepository::in_memory().await.unwrap();
        let mut account = account("user@example.com");
        repo.save(&mut account).await.unwrap();
        let id = account.id.unwrap();

        for expected in 1..=2 {
            let updated = repo.record_failure(id, "connection refused", 3).await.unwrap();
            assert_eq!(updated.error_count, expected);
            assert!(updated.sync_enabled);
        }
        let updated = repo.record_failure(id, "connection refused", 3).await.unwrap();
        assert_eq!(updated.error_count, 3);
        assert!(!updated.sync_enabled);
        assert_eq!(updated.error_message.as_deref(), Some("connection refused"));

        repo.enable(id).await.unwrap();
        let account = repo.get(id).await.unwrap().unwrap();
        assert!(account.sync_enabled);
        assert_eq!(account.error_count, 0);
        assert!(account.error_message.is_none());
    }

    #[tokio::test]
    async fn test_success_resets_errors() {
        let repo = AccountRepository::in_memory().await.unwrap();
        let mut account = account("user@example.com");
        repo.save(&mut account).await.unwrap();
        let id = account.id.unwrap();

        repo.record_failure(id, "timeout", 5).await.unwrap();
        let at = Utc::now();
        repo.record_success(id, at).await.unwrap();

        let account = repo.get(id).await.unwrap().unwrap();
        assert_eq!(account.error_count, 0);
        assert!(account.error_message.is_none());
        assert_eq!(account.last_sync_at.unwrap().timestamp(), at.timestamp());
    }

    #[tokio::test]
    async fn test_bookkeeping_on_missing_account() {
        let repo = AccountRepository::in_memory().await.unwrap();
        let err = repo.enable(AccountId::new(99)).await.unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_file_database_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.db");
        let repo = AccountRepository::new(&path).await.unwrap();
        repo.save(&mut account("user@example.com")).await.unwrap();
        assert!(path.exists());

        let reopened = AccountRepository::new(&path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
