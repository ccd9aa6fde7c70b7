//! Periodic multi-account sync.
//!
//! A cycle lists the directory, picks the eligible accounts and syncs them
//! in fixed-size groups, the accounts of a group concurrently. An account
//! is claimed in the active set for the whole of its sync, so a manual
//! trigger and a scheduled cycle never run the same account twice.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::SyncError;
use super::orchestrator::{SyncOrchestrator, SyncResult};
use super::session::Connector;
use crate::account::{Account, AccountDirectory, AccountId};
use crate::store::StoreProvider;
use crate::{Error, Result};

/// Drives [`SyncOrchestrator`] over every eligible account.
///
/// Cheap to clone; clones share state.
pub struct Scheduler<D, P, C> {
    inner: Arc<Inner<D, P, C>>,
}

struct Inner<D, P, C> {
    directory: D,
    stores: P,
    orchestrator: SyncOrchestrator<C>,
    active: Arc<Mutex<HashSet<AccountId>>>,
    cycle_running: AtomicBool,
    shutdown: watch::Receiver<bool>,
}

impl<D, P, C> Clone for Scheduler<D, P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, P, C> std::fmt::Debug for Scheduler<D, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cycle_running", &self.inner.cycle_running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Marks a cycle as running until dropped.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Holds one account in the active set until dropped.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<AccountId>>>,
    id: AccountId,
}

impl ActiveGuard {
    async fn claim(active: &Arc<Mutex<HashSet<AccountId>>>, id: AccountId) -> Option<Self> {
        if !active.lock().await.insert(id) {
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
            id,
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let id = self.id;
        if let Ok(mut active) = self.active.try_lock() {
            active.remove(&id);
            return;
        }
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            active.lock().await.remove(&id);
        });
    }
}

impl<D, P, C> Scheduler<D, P, C>
where
    D: AccountDirectory + 'static,
    P: StoreProvider + 'static,
    C: Connector + 'static,
{
    /// Creates a scheduler that stops once `shutdown` turns `true`.
    pub fn new(
        directory: D,
        stores: P,
        orchestrator: SyncOrchestrator<C>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory,
                stores,
                orchestrator,
                active: Arc::new(Mutex::new(HashSet::new())),
                cycle_running: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// The account directory.
    pub fn directory(&self) -> &D {
        &self.inner.directory
    }

    /// Runs a cycle now and then every interval until shutdown, then waits
    /// for in-flight cycles to wind down.
    ///
    /// A tick that arrives while the previous cycle is still running is
    /// skipped.
    pub async fn run(&self) {
        let config = self.inner.orchestrator.config();
        let mut shutdown = self.inner.shutdown.clone();
        let mut ticker = tokio::time::interval(config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: Vec<JoinHandle<()>> = Vec::new();

        info!(interval_secs = config.interval_secs, "scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    cycles.retain(|handle| !handle.is_finished());
                    let scheduler = self.clone();
                    cycles.push(tokio::spawn(async move {
                        scheduler.run_cycle().await;
                    }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = cycles.len(), "scheduler stopping");
        for result in join_all(cycles).await {
            if let Err(e) = result {
                error!(error = %e, "sync cycle task failed");
            }
        }
    }

    /// Runs one cycle over every eligible account.
    ///
    /// Returns `None` without doing anything if another cycle is still
    /// running.
    pub async fn run_cycle(&self) -> Option<Vec<(AccountId, SyncResult)>> {
        let inner = &self.inner;
        if inner
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("previous cycle still running, skipping");
            return None;
        }
        let _cycle = CycleGuard(&inner.cycle_running);

        let config = inner.orchestrator.config();
        let accounts = match inner.directory.list().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "cannot list accounts");
                return Some(Vec::new());
            }
        };
        let eligible: Vec<Account> = accounts
            .into_iter()
            .filter(|a| a.id.is_some() && a.is_eligible(config.max_errors))
            .collect();
        info!(eligible = eligible.len(), "sync cycle started");

        let mut results = Vec::with_capacity(eligible.len());
        for group in eligible.chunks(config.group_size.max(1)) {
            if *inner.shutdown.borrow() {
                info!("shutdown requested, ending cycle");
                break;
            }
            let outcomes = join_all(group.iter().map(|account| self.sync_claimed(account))).await;
            results.extend(outcomes.into_iter().flatten());
        }

        info!(synced = results.len(), "sync cycle finished");
        Some(results)
    }

    /// Syncs one account now, whatever its eligibility.
    ///
    /// # Errors
    ///
    /// [`Error::AccountNotFound`] for an unknown id,
    /// [`Error::SyncInProgress`] if the account is already syncing, or a
    /// directory error.
    pub async fn sync_account(&self, id: AccountId) -> Result<SyncResult> {
        let account = self
            .inner
            .directory
            .get(id)
            .await?
            .ok_or(Error::AccountNotFound(id))?;
        let _active = ActiveGuard::claim(&self.inner.active, id)
            .await
            .ok_or(Error::SyncInProgress(id))?;
        Ok(self.sync_and_record(id, &account).await)
    }

    /// Claims `account` and syncs it; `None` if it is already syncing.
    async fn sync_claimed(&self, account: &Account) -> Option<(AccountId, SyncResult)> {
        let id = account.id?;
        let Some(_active) = ActiveGuard::claim(&self.inner.active, id).await else {
            debug!(account = %id, "already syncing, skipped");
            return None;
        };
        Some((id, self.sync_and_record(id, account).await))
    }

    async fn sync_and_record(&self, id: AccountId, account: &Account) -> SyncResult {
        let inner = &self.inner;
        let result = match inner.stores.open(id).await {
            Ok(store) => {
                inner
                    .orchestrator
                    .sync_account(account, store, &inner.shutdown)
                    .await
            }
            Err(e) => {
                error!(account = %id, error = %e, "cannot open message store");
                SyncResult {
                    errors: vec![SyncError::Persistence {
                        folder: "*".to_string(),
                        message: format!("cannot open message store: {e}"),
                    }],
                    ..SyncResult::default()
                }
            }
        };
        self.record(id, &result).await;
        result
    }

    async fn record(&self, id: AccountId, result: &SyncResult) {
        let directory = &self.inner.directory;
        let max_errors = self.inner.orchestrator.config().max_errors;

        let Some(summary) = result.error_summary() else {
            if let Err(e) = directory.record_success(id, Utc::now()).await {
                error!(account = %id, error = %e, "cannot record sync success");
            }
            return;
        };

        match directory.record_failure(id, &summary, max_errors).await {
            Ok(account) if !account.sync_enabled => warn!(
                account = %id,
                error_count = account.error_count,
                "sync disabled after repeated failures; run `mailsync enable {id}` to resume"
            ),
            Ok(account) => debug!(account = %id, error_count = account.error_count, "sync failure recorded"),
            Err(e) => error!(account = %id, error = %e, "cannot record sync failure"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::account::MemoryDirectory;
    use crate::config::SyncConfig;
    use crate::store::{MailStore, MemoryStoreProvider};
    use crate::sync::testing::{FakeConnector, account, message_with_attachment, plain_message};

    struct Fixture {
        connector: FakeConnector,
        scheduler: Scheduler<MemoryDirectory, MemoryStoreProvider, FakeConnector>,
        shutdown: watch::Sender<bool>,
        _root: tempfile::TempDir,
    }

    fn fixture(connector: FakeConnector, tweak: impl FnOnce(&mut SyncConfig)) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = SyncConfig {
            attachment_root: root.path().to_path_buf(),
            data_dir: root.path().to_path_buf(),
            ..SyncConfig::default()
        };
        tweak(&mut config);
        let (shutdown, rx) = watch::channel(false);
        let orchestrator = SyncOrchestrator::new(connector.clone(), config);
        Fixture {
            scheduler: Scheduler::new(MemoryDirectory::new(), MemoryStoreProvider::new(), orchestrator, rx),
            connector,
            shutdown,
            _root: root,
        }
    }

    fn inbox_with_mail() -> FakeConnector {
        let connector = FakeConnector::new().with_folder("INBOX", 7);
        connector.add_message("INBOX", 1, plain_message("<1@x>", "hi"));
        connector
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skips_disabled_accounts() {
        let f = fixture(inbox_with_mail(), |_| {});
        let enabled = f.scheduler.directory().insert(account(1)).await;
        let mut off = account(2);
        off.sync_enabled = false;
        f.scheduler.directory().insert(off).await;

        let results = f.scheduler.run_cycle().await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, enabled);
        assert_eq!(f.connector.state().connects, 1);
        let stored = f.scheduler.inner.stores.store(enabled).await;
        assert_eq!(stored.message_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_error_state() {
        let f = fixture(inbox_with_mail(), |_| {});
        let mut failing = account(1);
        failing.error_count = 2;
        failing.error_message = Some("old".to_string());
        let id = f.scheduler.directory().insert(failing).await;

        f.scheduler.run_cycle().await.unwrap();

        let account = f.scheduler.directory().get(id).await.unwrap().unwrap();
        assert_eq!(account.error_count, 0);
        assert!(account.error_message.is_none());
        assert!(account.last_sync_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_disable_account() {
        let connector = inbox_with_mail();
        connector.state().connect_failures = u32::MAX;
        let f = fixture(connector, |c| {
            c.max_errors = 2;
            c.reconnect_attempts = 1;
        });
        let id = f.scheduler.directory().insert(account(1)).await;

        let first = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(first.len(), 1);
        let account = f.scheduler.directory().get(id).await.unwrap().unwrap();
        assert_eq!(account.error_count, 1);
        assert!(account.sync_enabled);
        assert!(account.error_message.unwrap().contains("connection"));

        f.scheduler.run_cycle().await.unwrap();
        let account = f.scheduler.directory().get(id).await.unwrap().unwrap();
        assert_eq!(account.error_count, 2);
        assert!(!account.sync_enabled);

        let connects = f.connector.state().connects;
        let third = f.scheduler.run_cycle().await.unwrap();
        assert!(third.is_empty());
        assert_eq!(f.connector.state().connects, connects);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_attachment_is_not_a_failure() {
        let connector = FakeConnector::new().with_folder("INBOX", 7);
        connector.add_message("INBOX", 1, message_with_attachment("<big@x>", "big.bin", "aGVsbG8gd29ybGQ="));
        let f = fixture(connector, |c| {
            c.max_attachment_bytes = 4;
            c.max_errors = 1;
        });
        let id = f.scheduler.directory().insert(account(1)).await;

        for _ in 0..2 {
            let results = f.scheduler.run_cycle().await.unwrap();
            assert_eq!(results.len(), 1);
            assert!(results[0].1.is_success());
        }

        let account = f.scheduler.directory().get(id).await.unwrap().unwrap();
        assert_eq!(account.error_count, 0);
        assert!(account.error_message.is_none());
        assert!(account.sync_enabled);
        let stored = f.scheduler.inner.stores.store(id).await;
        assert_eq!(stored.message_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_cycle_is_skipped() {
        let connector = inbox_with_mail();
        connector.state().hang_connect = true;
        let f = fixture(connector, |_| {});
        f.scheduler.directory().insert(account(1)).await;

        let running = {
            let scheduler = f.scheduler.clone();
            tokio::spawn(async move { scheduler.run_cycle().await })
        };
        while f.connector.state().connects == 0 {
            tokio::task::yield_now().await;
        }

        assert!(f.scheduler.run_cycle().await.is_none());
        running.abort();
        let _ = running.await;
        tokio::task::yield_now().await;

        f.connector.state().hang_connect = false;
        assert!(f.scheduler.run_cycle().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sync_goes_through_active_guard() {
        let connector = inbox_with_mail();
        connector.state().hang_connect = true;
        let f = fixture(connector, |_| {});
        let id = f.scheduler.directory().insert(account(1)).await;

        assert!(matches!(
            f.scheduler.sync_account(AccountId::new(99)).await,
            Err(Error::AccountNotFound(_))
        ));

        let running = {
            let scheduler = f.scheduler.clone();
            tokio::spawn(async move { scheduler.sync_account(id).await })
        };
        while f.connector.state().connects == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            f.scheduler.sync_account(id).await,
            Err(Error::SyncInProgress(busy)) if busy == id
        ));
        let cycle = f.scheduler.run_cycle().await.unwrap();
        assert!(cycle.is_empty());

        running.abort();
        let _ = running.await;
        tokio::task::yield_now().await;
        assert!(f.scheduler.inner.active.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_cover_every_account() {
        let f = fixture(inbox_with_mail(), |c| c.group_size = 2);
        for id in 1..=5 {
            f.scheduler.directory().insert(account(id)).await;
        }

        let results = f.scheduler.run_cycle().await.unwrap();

        let mut ids: Vec<i64> = results.iter().map(|(id, _)| id.0).collect();
        ids.sort_unstable();
        assert_eq!(ids, [1, 2, 3, 4, 5]);
        assert!(results.iter().all(|(_, r)| r.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let f = fixture(inbox_with_mail(), |c| c.interval_secs = 60);
        f.scheduler.directory().insert(account(1)).await;

        let handle = {
            let scheduler = f.scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.connector.state().connects, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.connector.state().connects, 2);

        f.shutdown.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(f.connector.state().logouts, 2);
    }
}
