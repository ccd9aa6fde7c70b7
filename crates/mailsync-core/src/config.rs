//! Engine configuration.
//!
//! Every knob has a default and can be overridden with a `MAILSYNC_*`
//! environment variable. Durations are kept as plain integers so the
//! struct serializes the same way it is configured.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::RetryPolicy;
use crate::{Error, Result};

/// Tunables for the scheduler and sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduler cycles.
    pub interval_secs: u64,
    /// Error count at which a cycle stops and an account is disabled.
    pub max_errors: u32,
    /// Messages per UID FETCH.
    pub batch_size: usize,
    /// Pause between batches, in milliseconds.
    pub batch_delay_ms: u64,
    /// Upper bound for one batch round trip.
    pub batch_timeout_secs: u64,
    /// Pause before each reconnect attempt.
    pub reconnect_delay_secs: u64,
    /// Reconnect attempts before giving up on an account's cycle.
    pub reconnect_attempts: u32,
    /// Upper bound for connect plus login.
    pub connect_timeout_secs: u64,
    /// Upper bound for any other single IMAP command.
    pub command_timeout_secs: u64,
    /// Attachments larger than this are skipped.
    pub max_attachment_bytes: u64,
    /// Messages larger than this are not downloaded.
    pub max_message_bytes: usize,
    /// Where attachment payloads are written.
    pub attachment_root: PathBuf,
    /// Holds `accounts.db` and the per-account stores.
    pub data_dir: PathBuf,
    /// Accounts synced concurrently.
    pub group_size: usize,
    /// Folders synced right after INBOX, in order.
    pub priority_folders: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            interval_secs: 30 * 60,
            max_errors: 5,
            batch_size: 10,
            batch_delay_ms: 1000,
            batch_timeout_secs: 120,
            reconnect_delay_secs: 5,
            reconnect_attempts: 3,
            connect_timeout_secs: 30,
            command_timeout_secs: 60,
            max_attachment_bytes: 50 * 1024 * 1024,
            max_message_bytes: 100 * 1024 * 1024,
            attachment_root: data_dir.join("attachments"),
            data_dir,
            group_size: 3,
            priority_folders: vec!["Sent".to_string(), "Drafts".to_string()],
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailsync")
}

impl SyncConfig {
    /// Loads the configuration from `MAILSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is malformed or out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let data_dir = lookup("MAILSYNC_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or(defaults.data_dir, PathBuf::from);
        let attachment_root = lookup("MAILSYNC_ATTACHMENT_ROOT")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| data_dir.join("attachments"), PathBuf::from);
        let priority_folders = lookup("MAILSYNC_PRIORITY_FOLDERS").map_or(
            defaults.priority_folders,
            |raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect()
            },
        );

        let config = Self {
            interval_secs: parse(&lookup, "MAILSYNC_INTERVAL_SECS", defaults.interval_secs)?,
            max_errors: parse(&lookup, "MAILSYNC_MAX_ERRORS", defaults.max_errors)?,
            batch_size: parse(&lookup, "MAILSYNC_BATCH_SIZE", defaults.batch_size)?,
            batch_delay_ms: parse(&lookup, "MAILSYNC_BATCH_DELAY_MS", defaults.batch_delay_ms)?,
            batch_timeout_secs: parse(
                &lookup,
                "MAILSYNC_BATCH_TIMEOUT_SECS",
                defaults.batch_timeout_secs,
            )?,
            reconnect_delay_secs: parse(
                &lookup,
                "MAILSYNC_RECONNECT_DELAY_SECS",
                defaults.reconnect_delay_secs,
            )?,
            reconnect_attempts: parse(
                &lookup,
                "MAILSYNC_RECONNECT_ATTEMPTS",
                defaults.reconnect_attempts,
            )?,
            connect_timeout_secs: parse(
                &lookup,
                "MAILSYNC_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            )?,
            command_timeout_secs: parse(
                &lookup,
                "MAILSYNC_COMMAND_TIMEOUT_SECS",
                defaults.command_timeout_secs,
            )?,
            max_attachment_bytes: parse(
                &lookup,
                "MAILSYNC_MAX_ATTACHMENT_BYTES",
                defaults.max_attachment_bytes,
            )?,
            max_message_bytes: parse(
                &lookup,
                "MAILSYNC_MAX_MESSAGE_BYTES",
                defaults.max_message_bytes,
            )?,
            attachment_root,
            data_dir,
            group_size: parse(&lookup, "MAILSYNC_GROUP_SIZE", defaults.group_size)?,
            priority_folders,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("MAILSYNC_BATCH_SIZE must be at least 1".into()));
        }
        if self.group_size == 0 {
            return Err(Error::Config("MAILSYNC_GROUP_SIZE must be at least 1".into()));
        }
        if self.max_errors == 0 {
            return Err(Error::Config("MAILSYNC_MAX_ERRORS must be at least 1".into()));
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("MAILSYNC_INTERVAL_SECS must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of the account directory database.
    #[must_use]
    pub fn accounts_db(&self) -> PathBuf {
        self.data_dir.join("accounts.db")
    }

    /// Directory holding one message store per account.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Root of the attachment tree.
    #[must_use]
    pub fn attachment_root(&self) -> &Path {
        &self.attachment_root
    }

    /// Scheduler period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Pause between batches.
    #[must_use]
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Per-batch timeout.
    #[must_use]
    pub const fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// Connect-plus-login timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Timeout for a single IMAP command.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Reconnect policy built from the attempt count and delay.
    #[must_use]
    pub const fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reconnect_attempts,
            Duration::from_secs(self.reconnect_delay_secs),
        )
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}: invalid value {raw:?}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreadable_literal)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(1800));
        assert_eq!(config.max_errors, 5);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_delay(), Duration::from_secs(1));
        assert_eq!(config.batch_timeout(), Duration::from_secs(120));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_attachment_bytes, 52428800);
        assert_eq!(config.max_message_bytes, 104857600);
        assert_eq!(config.group_size, 3);
        assert_eq!(config.priority_folders, vec!["Sent", "Drafts"]);

        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("MAILSYNC_BATCH_SIZE", " 25 "),
            ("MAILSYNC_MAX_MESSAGE_BYTES", "1048576"),
            ("MAILSYNC_DATA_DIR", "/var/lib/mailsync"),
            ("MAILSYNC_PRIORITY_FOLDERS", "Archive, Sent Items,,"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_message_bytes, 1048576);
        assert_eq!(config.accounts_db(), PathBuf::from("/var/lib/mailsync/accounts.db"));
        assert_eq!(config.store_dir(), PathBuf::from("/var/lib/mailsync/store"));
        assert_eq!(
            config.attachment_root(),
            Path::new("/var/lib/mailsync/attachments")
        );
        assert_eq!(config.priority_folders, vec!["Archive", "Sent Items"]);
    }

    #[test]
    fn test_explicit_attachment_root() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("MAILSYNC_DATA_DIR", "/data"),
            ("MAILSYNC_ATTACHMENT_ROOT", "/srv/files"),
        ]))
        .unwrap();
        assert_eq!(config.attachment_root(), Path::new("/srv/files"));
    }

    #[test]
    fn test_malformed_value() {
        let err = SyncConfig::from_lookup(lookup(&[("MAILSYNC_MAX_ERRORS", "five")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("MAILSYNC_MAX_ERRORS")));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("MAILSYNC_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_serde_roundtrip_with_partial_input() {
        let config: SyncConfig = serde_json::from_str(r#"{"batch_size": 4}"#).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.group_size, 3);
    }
}
