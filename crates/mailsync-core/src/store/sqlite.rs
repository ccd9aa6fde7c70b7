//! `SQLite` store, one database file per account.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use super::{
    AttachmentMetadata, ContentKind, MailStore, StoreProvider, StoredMessage, SyncCursor,
    UpsertOutcome,
};
use crate::Result;
use crate::account::AccountId;

/// Message store backed by a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                uid INTEGER,
                folder TEXT NOT NULL,
                subject TEXT,
                from_addr TEXT,
                to_addrs TEXT,
                cc_addrs TEXT,
                date TEXT,
                body_text TEXT,
                body_html TEXT,
                content_type TEXT NOT NULL,
                flags TEXT NOT NULL,
                size INTEGER,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                attachments_path TEXT,
                attachments TEXT NOT NULL,
                synced_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_folder ON messages(folder)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_cursors (
                folder TEXT PRIMARY KEY,
                uid_validity INTEGER NOT NULL,
                highest_uid INTEGER NOT NULL,
                last_sync_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_cursor(
        tx: &mut Transaction<'_, Sqlite>,
        folder: &str,
    ) -> Result<Option<SyncCursor>> {
        let row = sqlx::query(
            "SELECT uid_validity, highest_uid, last_sync_at FROM sync_cursors WHERE folder = ?",
        )
        .bind(folder)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.as_ref().map(row_to_cursor))
    }

    async fn write_cursor(
        tx: &mut Transaction<'_, Sqlite>,
        folder: &str,
        cursor: SyncCursor,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sync_cursors (folder, uid_validity, highest_uid, last_sync_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(folder) DO UPDATE SET
                uid_validity = excluded.uid_validity,
                highest_uid = excluded.highest_uid,
                last_sync_at = excluded.last_sync_at
            ",
        )
        .bind(folder)
        .bind(i64::from(cursor.uid_validity))
        .bind(i64::from(cursor.highest_uid))
        .bind(cursor.last_sync_at.map(|t| t.to_rfc3339()))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_message(
        tx: &mut Transaction<'_, Sqlite>,
        message: &StoredMessage,
    ) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM messages WHERE message_id = ?")
            .bind(&message.message_id)
            .fetch_optional(&mut **tx)
            .await?
            .is_some();

        sqlx::query(
            r"
            INSERT INTO messages (
                message_id, uid, folder, subject, from_addr, to_addrs, cc_addrs, date,
                body_text, body_html, content_type, flags, size,
                has_attachments, attachments_path, attachments, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id) DO UPDATE SET
                uid = excluded.uid,
                folder = excluded.folder,
                subject = excluded.subject,
                from_addr = excluded.from_addr,
                to_addrs = excluded.to_addrs,
                cc_addrs = excluded.cc_addrs,
                date = excluded.date,
                body_text = excluded.body_text,
                body_html = excluded.body_html,
                content_type = excluded.content_type,
                flags = excluded.flags,
                size = excluded.size,
                has_attachments = excluded.has_attachments,
                attachments_path = excluded.attachments_path,
                attachments = excluded.attachments,
                synced_at = excluded.synced_at
            ",
        )
        .bind(&message.message_id)
        .bind(message.uid.map(i64::from))
        .bind(&message.folder)
        .bind(&message.subject)
        .bind(&message.from)
        .bind(&message.to)
        .bind(&message.cc)
        .bind(message.date.map(|d| d.to_rfc3339()))
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(message.content_type.as_str())
        .bind(serde_json::to_string(&message.flags)?)
        .bind(message.size.map(i64::from))
        .bind(message.has_attachments)
        .bind(
            message
                .attachments_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(serde_json::to_string(&message.attachments)?)
        .bind(message.synced_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(!exists)
    }
}

impl MailStore for SqliteStore {
    async fn upsert_messages_and_advance_cursor(
        &self,
        folder: &str,
        messages: &[StoredMessage],
        cursor: SyncCursor,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut outcome = UpsertOutcome::default();
        for message in messages {
            if Self::upsert_message(&mut tx, message).await? {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
        }

        let stored = Self::read_cursor(&mut tx, folder).await?;
        let advanced = SyncCursor::advance(stored, cursor);
        Self::write_cursor(&mut tx, folder, advanced).await?;

        tx.commit().await?;

        debug!(
            folder,
            inserted = outcome.inserted,
            updated = outcome.updated,
            highest_uid = advanced.highest_uid,
            "batch committed"
        );
        Ok(outcome)
    }

    async fn existing_message_ids(&self, folder: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT message_id FROM messages WHERE folder = ?")
            .bind(folder)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("message_id")).collect())
    }

    async fn get_cursor(&self, folder: &str) -> Result<Option<SyncCursor>> {
        let row = sqlx::query(
            "SELECT uid_validity, highest_uid, last_sync_at FROM sync_cursors WHERE folder = ?",
        )
        .bind(folder)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_cursor))
    }

    async fn put_cursor(&self, folder: &str, cursor: SyncCursor) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_cursor(&mut tx, folder, cursor).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            r"
            SELECT message_id, uid, folder, subject, from_addr, to_addrs, cc_addrs, date,
                   body_text, body_html, content_type, flags, size,
                   has_attachments, attachments_path, attachments, synced_at
            FROM messages
            WHERE message_id = ?
            ",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    #[allow(clippy::cast_sign_loss)]
    async fn message_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_cursor(row: &SqliteRow) -> SyncCursor {
    let last_sync_at: Option<String> = row.get("last_sync_at");
    SyncCursor {
        uid_validity: row.get::<i64, _>("uid_validity") as u32,
        highest_uid: row.get::<i64, _>("highest_uid") as u32,
        last_sync_at: last_sync_at.as_deref().and_then(parse_timestamp),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_message(row: &SqliteRow) -> Result<StoredMessage> {
    let flags: String = row.get("flags");
    let attachments: String = row.get("attachments");
    let date: Option<String> = row.get("date");
    let synced_at: String = row.get("synced_at");
    let attachments_path: Option<String> = row.get("attachments_path");

    Ok(StoredMessage {
        message_id: row.get("message_id"),
        uid: row.get::<Option<i64>, _>("uid").map(|u| u as u32),
        folder: row.get("folder"),
        subject: row.get("subject"),
        from: row.get("from_addr"),
        to: row.get("to_addrs"),
        cc: row.get("cc_addrs"),
        date: date.as_deref().and_then(parse_timestamp),
        body_text: row.get("body_text"),
        body_html: row.get("body_html"),
        content_type: ContentKind::from_stored(row.get("content_type")),
        flags: serde_json::from_str(&flags)?,
        size: row.get::<Option<i64>, _>("size").map(|s| s as u32),
        has_attachments: row.get::<i64, _>("has_attachments") != 0,
        attachments_path: attachments_path.map(PathBuf::from),
        attachments: serde_json::from_str::<Vec<AttachmentMetadata>>(&attachments)?,
        synced_at: parse_timestamp(&synced_at).unwrap_or_else(Utc::now),
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Opens `{dir}/{account_id}.db` for each account.
#[derive(Debug, Clone)]
pub struct SqliteStoreProvider {
    dir: PathBuf,
}

impl SqliteStoreProvider {
    /// Creates a provider rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Database path for `account`.
    #[must_use]
    pub fn path_for(&self, account: AccountId) -> PathBuf {
        self.dir.join(format!("{account}.db"))
    }
}

impl StoreProvider for SqliteStoreProvider {
    type Store = SqliteStore;

    async fn open(&self, account: AccountId) -> Result<SqliteStore> {
        SqliteStore::open(&self.path_for(account)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(id: &str, folder: &str, uid: u32) -> StoredMessage {
        StoredMessage {
            message_id: id.to_string(),
            uid: Some(uid),
            folder: folder.to_string(),
            subject: Some("Quarterly report".to_string()),
            from: Some("Alice <alice@example.com>".to_string()),
            to: Some("bob@example.com".to_string()),
            cc: None,
            date: Some(Utc::now()),
            body_text: Some("see attached".to_string()),
            body_html: Some("<p>see attached</p>".to_string()),
            content_type: ContentKind::Html,
            flags: vec!["\\Seen".to_string()],
            size: Some(2048),
            has_attachments: true,
            attachments_path: Some(PathBuf::from("/tmp/att/1/a_x")),
            attachments: vec![AttachmentMetadata {
                original_filename: Some("report q1.pdf".to_string()),
                stored_filename: "report_q1.pdf".to_string(),
                size: 1024,
                content_type: "application/pdf".to_string(),
                inline: false,
            }],
            synced_at: Utc::now(),
        }
    }

    fn cursor(uid_validity: u32, highest_uid: u32) -> SyncCursor {
        SyncCursor {
            uid_validity,
            highest_uid,
            last_sync_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let original = message("<abc@x>", "INBOX", 101);

        let outcome = store
            .upsert_messages_and_advance_cursor("INBOX", std::slice::from_ref(&original), cursor(7, 101))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome { inserted: 1, updated: 0 });

        let stored = store.get_message("<abc@x>").await.unwrap().unwrap();
        assert_eq!(stored.uid, Some(101));
        assert_eq!(stored.content_type, ContentKind::Html);
        assert_eq!(stored.flags, vec!["\\Seen"]);
        assert_eq!(stored.attachments, original.attachments);
        assert_eq!(stored.attachments_path, original.attachments_path);
        assert!(stored.has_attachments);

        let cursor = store.get_cursor("INBOX").await.unwrap().unwrap();
        assert_eq!(cursor.uid_validity, 7);
        assert_eq!(cursor.highest_uid, 101);
    }

    #[tokio::test]
    async fn test_same_identifier_leaves_one_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .upsert_messages_and_advance_cursor("INBOX", &[message("<a@x>", "INBOX", 1)], cursor(1, 1))
            .await
            .unwrap();
        let outcome = store
            .upsert_messages_and_advance_cursor("Archive", &[message("<a@x>", "Archive", 40)], cursor(1, 40))
            .await
            .unwrap();

        assert_eq!(outcome, UpsertOutcome { inserted: 0, updated: 1 });
        assert_eq!(store.message_count().await.unwrap(), 1);
        assert!(store.existing_message_ids("INBOX").await.unwrap().is_empty());
        assert!(store.existing_message_ids("Archive").await.unwrap().contains("<a@x>"));
    }

    #[tokio::test]
    async fn test_cursor_never_decreases() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .upsert_messages_and_advance_cursor("INBOX", &[], cursor(3, 50))
            .await
            .unwrap();
        store
            .upsert_messages_and_advance_cursor("INBOX", &[], cursor(3, 20))
            .await
            .unwrap();
        assert_eq!(store.get_cursor("INBOX").await.unwrap().unwrap().highest_uid, 50);

        store
            .upsert_messages_and_advance_cursor("INBOX", &[], cursor(4, 2))
            .await
            .unwrap();
        let reset = store.get_cursor("INBOX").await.unwrap().unwrap();
        assert_eq!((reset.uid_validity, reset.highest_uid), (4, 2));
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        sqlx::query("DROP TABLE sync_cursors")
            .execute(&store.pool)
            .await
            .unwrap();

        let result = store
            .upsert_messages_and_advance_cursor("INBOX", &[message("<a@x>", "INBOX", 1)], cursor(1, 1))
            .await;
        assert!(result.is_err());
        assert_eq!(store.message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_one_file_per_account() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SqliteStoreProvider::new(dir.path().join("store"));

        let store = provider.open(AccountId::new(3)).await.unwrap();
        store.put_cursor("INBOX", cursor(1, 9)).await.unwrap();
        assert!(dir.path().join("store").join("3.db").exists());

        let reopened = provider.open(AccountId::new(3)).await.unwrap();
        assert_eq!(reopened.get_cursor("INBOX").await.unwrap().unwrap().highest_uid, 9);
    }
}
