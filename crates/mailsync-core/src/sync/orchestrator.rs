//! One account's sync cycle.
//!
//! Connect, enumerate folders, then SELECT, discover, fetch and persist
//! each folder in priority order over the account's single session.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::attachments::AttachmentStore;
use super::connection::ConnectionManager;
use super::discovery::discover;
use super::error::SyncError;
use super::fetcher::{BatchFetcher, BatchSettings, FetchReport};
use super::folders::{Folder, list_folders};
use super::session::{Connector, MailSession};
use crate::account::Account;
use crate::config::SyncConfig;
use crate::store::MailStore;

/// Outcome of one account's cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Rows inserted for identifiers not seen before.
    pub total_new_messages: usize,
    /// Everything that went wrong, in order.
    pub errors: Vec<SyncError>,
    /// Wall-clock duration of the cycle.
    pub elapsed_seconds: f64,
}

impl SyncResult {
    /// A cycle succeeded if every recorded error is a warning.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.iter().all(SyncError::is_warning)
    }

    /// Errors that count against the account. Warnings are excluded.
    pub fn failures(&self) -> impl Iterator<Item = &SyncError> {
        self.errors.iter().filter(|e| !e.is_warning())
    }

    /// One-line description for the account's `error_message`, or `None`
    /// when only warnings were recorded.
    #[must_use]
    pub fn error_summary(&self) -> Option<String> {
        let mut failures = self.failures();
        let first = failures.next()?;
        match failures.count() {
            0 => Some(first.to_string()),
            more => Some(format!("{first} (and {more} more)")),
        }
    }
}

/// Orders folders INBOX first, then `priority` in order, then the rest as
/// enumerated.
///
/// Priority names match case-insensitively against either the full name
/// or the last path segment. Within one priority slot a full-name match
/// sorts ahead of a leaf match.
#[must_use]
pub fn prioritize(mut folders: Vec<Folder>, priority: &[String]) -> Vec<Folder> {
    let rank = |folder: &Folder| -> usize {
        if folder.name.eq_ignore_ascii_case("INBOX") {
            return 0;
        }
        priority
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let slot = (i + 1) * 2;
                if folder.name.eq_ignore_ascii_case(p) {
                    Some(slot)
                } else if folder.leaf_name().eq_ignore_ascii_case(p) {
                    Some(slot + 1)
                } else {
                    None
                }
            })
            .min()
            .unwrap_or(usize::MAX)
    };
    folders.sort_by_key(rank);
    folders
}

/// Runs sync cycles for accounts over a shared [`Connector`].
#[derive(Debug)]
pub struct SyncOrchestrator<C> {
    connector: C,
    config: SyncConfig,
    attachments: AttachmentStore,
}

impl<C: Connector> SyncOrchestrator<C> {
    /// Creates an orchestrator.
    pub fn new(connector: C, config: SyncConfig) -> Self {
        let attachments =
            AttachmentStore::new(config.attachment_root(), config.max_attachment_bytes);
        Self {
            connector,
            config,
            attachments,
        }
    }

    /// The configuration in use.
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Syncs every selectable folder of `account` into `store`.
    ///
    /// Never fails as a whole: problems are collected in
    /// [`SyncResult::errors`]. The session is logged out and the store
    /// released before returning.
    pub async fn sync_account<M: MailStore>(
        &self,
        account: &Account,
        store: M,
        shutdown: &watch::Receiver<bool>,
    ) -> SyncResult {
        let started = Instant::now();
        let id = account.id.unwrap_or_default();
        let mut result = SyncResult::default();

        info!(account = %id, "sync started");
        let mut conn = ConnectionManager::new(
            &self.connector,
            account,
            store,
            self.config.reconnect_policy(),
            self.config.connect_timeout(),
        );

        if let Err(e) = self.run(&mut conn, shutdown, &mut result).await {
            warn!(account = %id, error = %e, "sync aborted");
            result.errors.push(e);
        }
        conn.disconnect().await;

        result.elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            account = %id,
            new_messages = result.total_new_messages,
            errors = result.errors.len(),
            elapsed_seconds = result.elapsed_seconds,
            "sync finished"
        );
        result
    }

    /// The folder loop. An `Err` is a connection failure that survived
    /// every reconnect attempt.
    async fn run<M: MailStore>(
        &self,
        conn: &mut ConnectionManager<'_, C, M>,
        shutdown: &watch::Receiver<bool>,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let id = conn.account().id.unwrap_or_default();

        if let Err(e) = conn.connect().await {
            warn!(account = %id, error = %e, "connect failed");
            conn.reconnect().await?;
        }

        let folders = match self.enumerate(conn).await {
            Ok(folders) => folders,
            Err(e) if e.is_connection() => {
                warn!(account = %id, error = %e, "folder listing lost the connection");
                conn.reconnect().await?;
                self.enumerate(conn).await?
            }
            Err(e) => return Err(e),
        };
        let folders = prioritize(folders, &self.config.priority_folders);
        debug!(account = %id, folders = folders.len(), "folders enumerated");

        let settings = BatchSettings {
            size: self.config.batch_size,
            delay: self.config.batch_delay(),
            timeout: self.config.batch_timeout(),
        };
        let fetcher = BatchFetcher::new(id, settings, &self.attachments, shutdown);
        let max_errors = usize::try_from(self.config.max_errors).unwrap_or(usize::MAX);

        for folder in &folders {
            if *shutdown.borrow() {
                info!(account = %id, "shutdown requested");
                break;
            }
            let failures = result.failures().count();
            if failures >= max_errors {
                warn!(account = %id, errors = failures, "error limit reached, skipping remaining folders");
                break;
            }

            let mut retried = false;
            loop {
                let report = sync_folder(conn, &fetcher, &folder.name).await;
                result.total_new_messages += report.new_messages;
                result.errors.extend(report.errors);
                if report.cancelled {
                    return Ok(());
                }

                match report.fatal {
                    None => break,
                    Some(e) if e.is_connection() => {
                        warn!(account = %id, folder = %folder.name, error = %e, retried, "connection lost");
                        if retried {
                            result.errors.push(e);
                        }
                        conn.reconnect().await?;
                        if retried {
                            break;
                        }
                        retried = true;
                    }
                    Some(e) => {
                        result.errors.push(e);
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn enumerate<M: MailStore>(
        &self,
        conn: &mut ConnectionManager<'_, C, M>,
    ) -> Result<Vec<Folder>, SyncError> {
        let session = conn
            .session()
            .ok_or_else(|| SyncError::connection("not connected"))?;
        list_folders(session).await
    }
}

/// SELECT, discovery and fetch for one folder.
async fn sync_folder<C, M>(
    conn: &mut ConnectionManager<'_, C, M>,
    fetcher: &BatchFetcher<'_>,
    folder: &str,
) -> FetchReport
where
    C: Connector,
    M: MailStore,
{
    let account = conn.account().id.unwrap_or_default();
    let Some((session, store)) = conn.parts() else {
        return FetchReport {
            fatal: Some(SyncError::connection("not connected")),
            ..FetchReport::default()
        };
    };

    let status = match session.select(folder).await {
        Ok(status) => status,
        Err(e) if e.is_connection_fault() => {
            return FetchReport {
                fatal: Some(SyncError::connection(e)),
                ..FetchReport::default()
            };
        }
        Err(e) => {
            warn!(%account, folder, error = %e, "cannot open folder");
            return FetchReport {
                errors: vec![SyncError::Discovery {
                    folder: folder.to_string(),
                    message: format!("EXAMINE failed: {e}"),
                }],
                ..FetchReport::default()
            };
        }
    };

    let discovered = match discover(session, store, account, folder, &status).await {
        Ok(discovered) => discovered,
        Err(e) if e.is_connection() => {
            return FetchReport {
                fatal: Some(e),
                ..FetchReport::default()
            };
        }
        Err(e) => {
            warn!(%account, folder, error = %e, "discovery failed");
            return FetchReport {
                errors: vec![e],
                ..FetchReport::default()
            };
        }
    };

    if discovered.uids.is_empty() {
        debug!(%account, folder, "up to date");
        return FetchReport::default();
    }
    info!(
        %account,
        folder,
        count = discovered.uids.len(),
        strategy = ?discovered.strategy,
        "fetching new messages"
    );
    fetcher.fetch_folder(session, store, folder, &discovered).await
}
