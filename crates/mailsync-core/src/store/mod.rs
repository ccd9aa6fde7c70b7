//! Local message store.
//!
//! Each account gets its own store. A store holds message rows keyed by
//! the message identifier and one [`SyncCursor`] per folder. The sync
//! engine only talks to the [`MailStore`] trait, so tests run against
//! [`MemoryStore`] and the daemon against [`SqliteStore`].

mod memory;
mod sqlite;

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{MemoryStore, MemoryStoreProvider};
pub use sqlite::{SqliteStore, SqliteStoreProvider};

use crate::Result;
use crate::account::AccountId;

/// Whether a message is rendered from HTML or plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentKind {
    /// A non-empty HTML part exists.
    Html,
    /// Plain text only.
    #[default]
    Plain,
}

impl ContentKind {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::Plain => "PLAIN",
        }
    }

    /// Parses the stored representation; anything unknown is plain.
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        if s.eq_ignore_ascii_case("html") {
            Self::Html
        } else {
            Self::Plain
        }
    }
}

/// One attachment written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    /// Filename as sent, if the part had one.
    pub original_filename: Option<String>,
    /// Name of the file under the message's attachment directory.
    pub stored_filename: String,
    /// Decoded size in bytes.
    pub size: u64,
    /// Declared MIME type.
    pub content_type: String,
    /// Whether the part was marked inline (e.g. an embedded image).
    pub inline: bool,
}

/// A message as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Global dedup key: the Message-ID header, or a synthetic identifier.
    pub message_id: String,
    /// UID in `folder` at the time of the sync.
    pub uid: Option<u32>,
    /// Folder the message was last seen in.
    pub folder: String,
    /// Decoded subject.
    pub subject: Option<String>,
    /// Decoded From header.
    pub from: Option<String>,
    /// Decoded To header.
    pub to: Option<String>,
    /// Decoded Cc header.
    pub cc: Option<String>,
    /// Date header.
    pub date: Option<DateTime<Utc>>,
    /// Plain text body.
    pub body_text: Option<String>,
    /// HTML body.
    pub body_html: Option<String>,
    /// Derived content kind.
    pub content_type: ContentKind,
    /// IMAP flags.
    pub flags: Vec<String>,
    /// RFC822.SIZE.
    pub size: Option<u32>,
    /// True iff `attachments` is non-empty.
    pub has_attachments: bool,
    /// Directory holding the attachment files.
    pub attachments_path: Option<PathBuf>,
    /// Files written for this message.
    pub attachments: Vec<AttachmentMetadata>,
    /// When this row was written.
    pub synced_at: DateTime<Utc>,
}

/// Per-folder sync watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Folder generation the UIDs belong to.
    pub uid_validity: u32,
    /// Highest UID known to be handled.
    pub highest_uid: u32,
    /// End of the last batch that advanced this cursor.
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncCursor {
    /// Combines a stored cursor with the one produced by a batch.
    ///
    /// Within one `uid_validity` the watermark never goes down. A different
    /// `uid_validity` means a new folder generation, so `next` replaces
    /// the stored cursor outright.
    #[must_use]
    pub fn advance(stored: Option<Self>, next: Self) -> Self {
        match stored {
            Some(stored) if stored.uid_validity == next.uid_validity => Self {
                uid_validity: next.uid_validity,
                highest_uid: stored.highest_uid.max(next.highest_uid),
                last_sync_at: next.last_sync_at.max(stored.last_sync_at),
            },
            _ => next,
        }
    }
}

/// Rows written by one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Identifiers seen for the first time.
    pub inserted: usize,
    /// Identifiers that overwrote an existing row.
    pub updated: usize,
}

/// Storage boundary of the sync engine.
pub trait MailStore: Send + Sync {
    /// Upserts `messages` by identifier and advances `folder`'s cursor with
    /// [`SyncCursor::advance`], all in one transaction. On error nothing is
    /// written.
    fn upsert_messages_and_advance_cursor(
        &self,
        folder: &str,
        messages: &[StoredMessage],
        cursor: SyncCursor,
    ) -> impl Future<Output = Result<UpsertOutcome>> + Send;

    /// Identifiers of the messages stored for `folder`.
    fn existing_message_ids(&self, folder: &str) -> impl Future<Output = Result<HashSet<String>>> + Send;

    /// Reads `folder`'s cursor.
    fn get_cursor(&self, folder: &str) -> impl Future<Output = Result<Option<SyncCursor>>> + Send;

    /// Overwrites `folder`'s cursor.
    fn put_cursor(&self, folder: &str, cursor: SyncCursor) -> impl Future<Output = Result<()>> + Send;

    /// Looks up one message.
    fn get_message(&self, message_id: &str) -> impl Future<Output = Result<Option<StoredMessage>>> + Send;

    /// Total number of stored messages.
    fn message_count(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// Opens the store that belongs to an account.
pub trait StoreProvider: Send + Sync {
    /// The store type handed out.
    type Store: MailStore;

    /// Opens `account`'s store, creating it if needed.
    fn open(&self, account: AccountId) -> impl Future<Output = Result<Self::Store>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cursor(uid_validity: u32, highest_uid: u32) -> SyncCursor {
        SyncCursor {
            uid_validity,
            highest_uid,
            last_sync_at: None,
        }
    }

    #[test]
    fn test_advance_is_monotonic() {
        assert_eq!(SyncCursor::advance(Some(cursor(7, 100)), cursor(7, 40)).highest_uid, 100);
        assert_eq!(SyncCursor::advance(Some(cursor(7, 100)), cursor(7, 101)).highest_uid, 101);
        assert_eq!(SyncCursor::advance(None, cursor(7, 3)).highest_uid, 3);
    }

    #[test]
    fn test_advance_resets_on_new_generation() {
        let advanced = SyncCursor::advance(Some(cursor(7, 100)), cursor(8, 2));
        assert_eq!(advanced, cursor(8, 2));
    }

    #[test]
    fn test_advance_keeps_latest_timestamp() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let mut stored = cursor(1, 5);
        stored.last_sync_at = Some(Utc::now());
        let mut next = cursor(1, 6);
        next.last_sync_at = Some(earlier);
        assert_eq!(
            SyncCursor::advance(Some(stored), next).last_sync_at,
            stored.last_sync_at
        );
    }

    #[test]
    fn test_content_kind_stored_form() {
        assert_eq!(ContentKind::from_stored(ContentKind::Html.as_str()), ContentKind::Html);
        assert_eq!(ContentKind::from_stored("PLAIN"), ContentKind::Plain);
        assert_eq!(ContentKind::from_stored("weird"), ContentKind::Plain);
        assert_eq!(serde_json::to_string(&ContentKind::Html).unwrap(), "\"HTML\"");
    }
}
