//! Per-account connection lifecycle.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::SyncError;
use super::retry::RetryPolicy;
use super::session::{Connector, MailSession};
use crate::account::Account;

/// Where a [`ConnectionManager`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session yet.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// A logged-in session is available.
    Authenticated,
    /// The last connect attempt failed.
    Error,
    /// Shut down for good.
    Closed,
}

/// Owns one account's IMAP session and its store handle for the length of
/// a sync cycle.
pub struct ConnectionManager<'a, C: Connector, M> {
    connector: &'a C,
    account: &'a Account,
    policy: RetryPolicy,
    connect_timeout: Duration,
    state: ConnectionState,
    session: Option<C::Session>,
    store: Option<M>,
}

impl<C: Connector, M> std::fmt::Debug for ConnectionManager<'_, C, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("account", &self.account.id)
            .field("state", &self.state)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a, C: Connector, M> ConnectionManager<'a, C, M> {
    /// Creates a manager in the `Disconnected` state.
    pub const fn new(
        connector: &'a C,
        account: &'a Account,
        store: M,
        policy: RetryPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            account,
            policy,
            connect_timeout,
            state: ConnectionState::Disconnected,
            session: None,
            store: Some(store),
        }
    }

    /// Current state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connects and logs in, bounded by the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connection`] on timeout, network or
    /// authentication failure, or if the manager was closed.
    pub async fn connect(&mut self) -> Result<(), SyncError> {
        if self.state == ConnectionState::Closed {
            return Err(SyncError::connection("connection manager is closed"));
        }

        self.session = None;
        self.state = ConnectionState::Connecting;

        let attempt = tokio::time::timeout(self.connect_timeout, self.connector.connect(self.account));
        match attempt.await {
            Ok(Ok(session)) => {
                self.session = Some(session);
                self.state = ConnectionState::Authenticated;
                debug!(account = ?self.account.id, "session established");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Error;
                Err(SyncError::connection(e))
            }
            Err(_) => {
                self.state = ConnectionState::Error;
                Err(SyncError::connection(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }
    }

    /// Drops the current session and connects again, pausing before each
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connection`] once every attempt has failed.
    pub async fn reconnect(&mut self) -> Result<(), SyncError> {
        if self.state == ConnectionState::Closed {
            return Err(SyncError::connection("connection manager is closed"));
        }

        // The old socket is presumed dead; no LOGOUT.
        self.session = None;
        self.state = ConnectionState::Disconnected;

        let mut last_error = None;
        for attempt in self.policy.attempts() {
            self.policy.pause().await;
            warn!(
                account = ?self.account.id,
                attempt,
                max_attempts = self.policy.max_attempts(),
                "reconnecting"
            );
            match self.connect().await {
                Ok(()) => {
                    info!(account = ?self.account.id, attempt, "reconnected");
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        let cause = last_error.map_or_else(String::new, |e| e.to_string());
        Err(SyncError::connection(format!(
            "giving up after {} reconnect attempts: {cause}",
            self.policy.max_attempts()
        )))
    }

    /// Logs out if connected and releases the store. Safe to call in any
    /// state, any number of times.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.logout().await;
        }
        self.store = None;
        if self.state != ConnectionState::Closed {
            debug!(account = ?self.account.id, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    /// The live session, only while `Authenticated`.
    pub fn session(&mut self) -> Option<&mut C::Session> {
        match self.state {
            ConnectionState::Authenticated => self.session.as_mut(),
            _ => None,
        }
    }

    /// The account's store, until [`disconnect`](Self::disconnect).
    pub const fn store(&self) -> Option<&M> {
        self.store.as_ref()
    }

    /// Session and store together, for the duration of one folder.
    pub fn parts(&mut self) -> Option<(&mut C::Session, &M)> {
        if self.state != ConnectionState::Authenticated {
            return None;
        }
        Some((self.session.as_mut()?, self.store.as_ref()?))
    }

    /// The account this manager connects.
    pub const fn account(&self) -> &Account {
        self.account
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::sync::testing::{FakeConnector, account};

    fn manager<'a>(
        connector: &'a FakeConnector,
        account: &'a Account,
    ) -> ConnectionManager<'a, FakeConnector, MemoryStore> {
        ConnectionManager::new(
            connector,
            account,
            MemoryStore::new(),
            RetryPolicy::new(3, Duration::from_secs(5)),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_connect_and_session() {
        let connector = FakeConnector::new();
        let account = account(1);
        let mut manager = manager(&connector, &account);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.session().is_none());

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert!(manager.session().is_some());
        assert!(manager.parts().is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_state() {
        let connector = FakeConnector::new();
        connector.state().connect_failures = 1;
        let account = account(1);
        let mut manager = manager(&connector, &account);

        let err = manager.connect().await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let connector = FakeConnector::new();
        connector.state().hang_connect = true;
        let account = account(1);
        let mut manager = manager(&connector, &account);

        let err = manager.connect().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(manager.state(), ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_succeeds_on_last_attempt() {
        let connector = FakeConnector::new();
        let account = account(1);
        let mut manager = manager(&connector, &account);
        manager.connect().await.unwrap();

        connector.state().connect_failures = 2;
        let start = tokio::time::Instant::now();
        manager.reconnect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(connector.state().connects, 4);
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhausted() {
        let connector = FakeConnector::new();
        connector.state().connect_failures = 10;
        let account = account(1);
        let mut manager = manager(&connector, &account);

        let err = manager.reconnect().await.unwrap_err();
        assert!(err.to_string().contains("3 reconnect attempts"));
        assert_eq!(connector.state().connects, 3);
        assert_eq!(manager.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let connector = FakeConnector::new();
        let account = account(1);
        let mut manager = manager(&connector, &account);
        manager.connect().await.unwrap();

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.store().is_none());
        assert_eq!(connector.state().logouts, 1);

        let err = manager.connect().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
        assert!(manager.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_releases_store() {
        let connector = FakeConnector::new();
        let account = account(1);
        let mut manager = manager(&connector, &account);
        assert!(manager.store().is_some());
        manager.disconnect().await;
        assert!(manager.store().is_none());
        assert_eq!(connector.state().logouts, 0);
    }
}
