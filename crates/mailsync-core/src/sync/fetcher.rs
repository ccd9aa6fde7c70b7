//! Fetching, parsing and persisting discovered messages in batches.

use std::time::Duration;

use chrono::Utc;
use mailsync_mime::Message;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::attachments::AttachmentStore;
use super::classify::classify;
use super::discovery::{Discovered, synthetic_message_id};
use super::error::SyncError;
use super::persist::Persister;
use super::session::{FetchedMessage, MailSession};
use crate::account::AccountId;
use crate::store::{MailStore, StoredMessage};

/// Batch knobs, taken from [`SyncConfig`](crate::SyncConfig).
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    /// Messages per `UID FETCH`.
    pub size: usize,
    /// Pause between batches.
    pub delay: Duration,
    /// Upper bound on one batch's FETCH.
    pub timeout: Duration,
}

/// What happened to one folder's discovered UIDs.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Rows inserted for identifiers not seen before.
    pub new_messages: usize,
    /// Per-message and per-attachment failures.
    pub errors: Vec<SyncError>,
    /// Fault that stopped the folder early, if any.
    pub fatal: Option<SyncError>,
    /// Stopped early because shutdown was requested.
    pub cancelled: bool,
}

/// Runs the batches of one account.
#[derive(Debug)]
pub struct BatchFetcher<'a> {
    account: AccountId,
    settings: BatchSettings,
    attachments: &'a AttachmentStore,
    shutdown: &'a watch::Receiver<bool>,
}

impl<'a> BatchFetcher<'a> {
    /// Creates a fetcher for `account`.
    pub const fn new(
        account: AccountId,
        settings: BatchSettings,
        attachments: &'a AttachmentStore,
        shutdown: &'a watch::Receiver<bool>,
    ) -> Self {
        Self {
            account,
            settings,
            attachments,
            shutdown,
        }
    }

    /// Fetches and persists `discovered` for the selected `folder`.
    ///
    /// Each batch is committed before the next starts. A batch-level fault
    /// or a failed commit ends the folder with [`FetchReport::fatal`] set;
    /// batches already committed stay committed.
    pub async fn fetch_folder<S, M>(
        &self,
        session: &mut S,
        store: &M,
        folder: &str,
        discovered: &Discovered,
    ) -> FetchReport
    where
        S: MailSession,
        M: MailStore,
    {
        let mut report = FetchReport::default();
        let persister = Persister::new(store, folder, discovered.uid_validity);

        for (index, chunk) in discovered.uids.chunks(self.settings.size.max(1)).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.delay).await;
            }
            if *self.shutdown.borrow() {
                info!(account = %self.account, folder, "shutdown requested, stopping folder");
                report.cancelled = true;
                break;
            }

            let messages = match self.fetch_batch(session, folder, chunk).await {
                Ok(fetched) => {
                    self.build_batch(folder, discovered.uid_validity, chunk, fetched, &mut report.errors)
                        .await
                }
                Err(BatchFailure::Fatal(e)) => {
                    report.fatal = Some(e);
                    break;
                }
                Err(BatchFailure::Rejected(message)) => {
                    warn!(account = %self.account, folder, error = %message, "batch rejected by server");
                    report.errors.extend(chunk.iter().map(|&uid| parse_error(folder, uid, &message)));
                    Vec::new()
                }
            };

            let highest_uid = chunk.iter().copied().max().unwrap_or(0);
            match persister.commit(&messages, highest_uid).await {
                Ok(outcome) => report.new_messages += outcome.inserted,
                Err(e) => {
                    report.fatal = Some(e);
                    break;
                }
            }
        }

        report
    }

    async fn fetch_batch<S: MailSession>(
        &self,
        session: &mut S,
        folder: &str,
        chunk: &[u32],
    ) -> Result<Vec<FetchedMessage>, BatchFailure> {
        debug!(account = %self.account, folder, count = chunk.len(), first = ?chunk.first(), "fetching batch");
        match tokio::time::timeout(self.settings.timeout, session.fetch_messages(chunk)).await {
            Ok(Ok(fetched)) => Ok(fetched),
            Ok(Err(e)) if e.is_connection_fault() => Err(BatchFailure::Fatal(SyncError::connection(e))),
            Ok(Err(e)) => Err(BatchFailure::Rejected(e.to_string())),
            Err(_) => Err(BatchFailure::Fatal(SyncError::connection(format!(
                "batch fetch in {folder} timed out after {:?}",
                self.settings.timeout
            )))),
        }
    }

    /// Turns one batch into rows, recording failures per message.
    async fn build_batch(
        &self,
        folder: &str,
        uid_validity: u32,
        chunk: &[u32],
        mut fetched: Vec<FetchedMessage>,
        errors: &mut Vec<SyncError>,
    ) -> Vec<StoredMessage> {
        let mut rows = Vec::with_capacity(chunk.len());
        for &uid in chunk {
            let Some(position) = fetched.iter().position(|m| m.uid == uid) else {
                warn!(account = %self.account, folder, uid, "message not returned by server");
                errors.push(parse_error(folder, uid, "message not returned by server"));
                continue;
            };
            let message = fetched.swap_remove(position);

            match self.build_message(folder, uid_validity, message, errors).await {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(account = %self.account, folder, uid, error = %e, "skipping message");
                    errors.push(e);
                }
            }
        }
        rows
    }

    async fn build_message(
        &self,
        folder: &str,
        uid_validity: u32,
        fetched: FetchedMessage,
        errors: &mut Vec<SyncError>,
    ) -> Result<StoredMessage, SyncError> {
        let uid = fetched.uid;
        let raw = fetched.body.ok_or_else(|| match fetched.size {
            Some(size) => parse_error(
                folder,
                uid,
                &format!("no body received for a {size} byte message"),
            ),
            None => parse_error(folder, uid, "server returned no body"),
        })?;
        let mut message = Message::parse(&raw).map_err(|e| parse_error(folder, uid, &e.to_string()))?;

        let message_id = message.message_id().map_or_else(
            || synthetic_message_id(self.account, folder, uid_validity, uid),
            str::to_string,
        );
        let classification = classify(&message);

        let (attachments_path, attachments) = if classification.has_attachments {
            let stored = self
                .attachments
                .store(self.account, &message_id, &message.take_attachments())
                .await;
            errors.extend(stored.errors);
            (stored.dir, stored.files)
        } else {
            (None, Vec::new())
        };

        Ok(StoredMessage {
            uid: Some(uid),
            folder: folder.to_string(),
            subject: message.subject(),
            from: message.from(),
            to: message.to(),
            cc: message.cc(),
            date: message.date().map(|d| d.with_timezone(&Utc)),
            body_text: message.text_body().map(str::to_string),
            body_html: message.html_body().map(str::to_string),
            content_type: classification.content_type,
            flags: fetched.flags,
            size: fetched.size,
            has_attachments: !attachments.is_empty(),
            attachments_path,
            attachments,
            synced_at: Utc::now(),
            message_id,
        })
    }
}

enum BatchFailure {
    /// The session is unusable.
    Fatal(SyncError),
    /// The server refused the FETCH but the session is fine.
    Rejected(String),
}

fn parse_error(folder: &str, uid: u32, message: &str) -> SyncError {
    SyncError::Parse {
        folder: folder.to_string(),
        uid,
        message: message.to_string(),
    }
}
