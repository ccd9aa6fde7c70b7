//! Finding the messages a folder still needs.
//!
//! With a usable cursor the server is asked for every UID above the
//! watermark or dated since the last sync, and anything at or below the
//! watermark is dropped; UIDs decide. Without one, every Message-ID in the
//! folder is fetched and compared against the store.

use std::fmt::Write;

use chrono::{Duration, Utc};
use mailsync_imap::MailboxStatus;
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::session::MailSession;
use crate::account::AccountId;
use crate::store::{MailStore, SyncCursor};

/// How the UID list was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `UID SEARCH` above the cursor, filtered by the cursor.
    Cursor,
    /// Full Message-ID scan compared against the store.
    HeaderScan,
}

/// Outcome of discovery for one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// UIDs to fetch, ascending.
    pub uids: Vec<u32>,
    /// UIDVALIDITY the UIDs belong to (0 if the server sent none).
    pub uid_validity: u32,
    /// Which strategy ran.
    pub strategy: Strategy,
}

/// Identifier for messages without a Message-ID header.
///
/// Stable for a given account, folder, UIDVALIDITY and UID, so re-syncing
/// such a message overwrites its row.
#[must_use]
pub fn synthetic_message_id(account: AccountId, folder: &str, uid_validity: u32, uid: u32) -> String {
    let mut folder_hex = String::with_capacity(folder.len() * 2);
    for b in folder.bytes() {
        let _ = write!(folder_hex, "{b:02x}");
    }
    format!("<{uid}.{uid_validity}.{folder_hex}.{account}@mailsync.invalid>")
}

/// Determines which UIDs in the selected `folder` are not yet stored.
///
/// # Errors
///
/// [`SyncError::Connection`] if the session broke, [`SyncError::Discovery`]
/// if both strategies failed, [`SyncError::Persistence`] if the store could
/// not be read.
pub async fn discover<S, M>(
    session: &mut S,
    store: &M,
    account: AccountId,
    folder: &str,
    status: &MailboxStatus,
) -> Result<Discovered, SyncError>
where
    S: MailSession,
    M: MailStore,
{
    let uid_validity = status.uid_validity.map_or(0, mailsync_imap::UidValidity::get);
    let cursor = store
        .get_cursor(folder)
        .await
        .map_err(|e| persistence(folder, &e))?;

    let mut needs_cursor = cursor.is_none();
    match cursor {
        Some(cursor) if cursor.uid_validity == uid_validity => {
            if let Some(uids) = search_after_cursor(session, folder, cursor, status).await? {
                return Ok(Discovered {
                    uids,
                    uid_validity,
                    strategy: Strategy::Cursor,
                });
            }
        }
        Some(cursor) => {
            warn!(
                %account,
                folder,
                old = cursor.uid_validity,
                new = uid_validity,
                "UIDVALIDITY changed, resetting cursor"
            );
            let reset = SyncCursor {
                uid_validity,
                highest_uid: 0,
                last_sync_at: None,
            };
            store
                .put_cursor(folder, reset)
                .await
                .map_err(|e| persistence(folder, &e))?;
            needs_cursor = true;
        }
        None => debug!(%account, folder, "no cursor yet"),
    }

    let (uids, highest_seen) = header_scan(session, store, account, folder, uid_validity).await?;

    if uids.is_empty() && needs_cursor {
        let cursor = SyncCursor {
            uid_validity,
            highest_uid: highest_seen,
            last_sync_at: Some(Utc::now()),
        };
        store
            .put_cursor(folder, cursor)
            .await
            .map_err(|e| persistence(folder, &e))?;
    }

    Ok(Discovered {
        uids,
        uid_validity,
        strategy: Strategy::HeaderScan,
    })
}

/// Runs the cursor strategy. `Ok(None)` means fall back to a header scan.
async fn search_after_cursor<S: MailSession>(
    session: &mut S,
    folder: &str,
    cursor: SyncCursor,
    status: &MailboxStatus,
) -> Result<Option<Vec<u32>>, SyncError> {
    let Some(last_sync_at) = cursor.last_sync_at else {
        return Ok(None);
    };

    if status.exists == 0
        || status
            .uid_next
            .is_some_and(|next| next.get() <= cursor.highest_uid.saturating_add(1))
    {
        debug!(folder, highest_uid = cursor.highest_uid, "nothing above the cursor");
        return Ok(Some(Vec::new()));
    }

    // SINCE has day granularity and ignores time zones; search from the
    // day before. Mail moved in keeps its old date, so the UID range is
    // searched as well.
    let since = (last_sync_at - Duration::days(1)).date_naive();
    match session.search_new(cursor.highest_uid, since).await {
        Ok(found) => {
            let mut uids: Vec<u32> = found
                .into_iter()
                .filter(|&uid| uid > cursor.highest_uid)
                .collect();
            uids.sort_unstable();
            uids.dedup();
            debug!(folder, %since, new = uids.len(), "cursor search");
            Ok(Some(uids))
        }
        Err(e) if e.is_connection_fault() => Err(SyncError::connection(e)),
        Err(e) => {
            let err = SyncError::Discovery {
                folder: folder.to_string(),
                message: format!("UID SEARCH failed: {e}"),
            };
            warn!(folder, error = %err, "falling back to header scan");
            Ok(None)
        }
    }
}

/// Returns the UIDs whose identifiers are not stored, and the highest UID
/// seen.
async fn header_scan<S, M>(
    session: &mut S,
    store: &M,
    account: AccountId,
    folder: &str,
    uid_validity: u32,
) -> Result<(Vec<u32>, u32), SyncError>
where
    S: MailSession,
    M: MailStore,
{
    let identities = session.fetch_message_ids().await.map_err(|e| {
        if e.is_connection_fault() {
            SyncError::connection(e)
        } else {
            SyncError::Discovery {
                folder: folder.to_string(),
                message: format!("header scan failed: {e}"),
            }
        }
    })?;

    let existing = store
        .existing_message_ids(folder)
        .await
        .map_err(|e| persistence(folder, &e))?;

    let highest_seen = identities.iter().map(|(uid, _)| *uid).max().unwrap_or(0);
    let mut uids: Vec<u32> = identities
        .into_iter()
        .filter(|(uid, message_id)| {
            let id = message_id
                .clone()
                .unwrap_or_else(|| synthetic_message_id(account, folder, uid_validity, *uid));
            !existing.contains(&id)
        })
        .map(|(uid, _)| uid)
        .collect();
    uids.sort_unstable();
    uids.dedup();

    info!(%account, folder, stored = existing.len(), new = uids.len(), "header scan");
    Ok((uids, highest_seen))
}

fn persistence(folder: &str, err: &crate::Error) -> SyncError {
    SyncError::Persistence {
        folder: folder.to_string(),
        message: err.to_string(),
    }
}
