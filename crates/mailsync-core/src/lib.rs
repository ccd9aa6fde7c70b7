//! # mailsync-core
//!
//! Everything between the IMAP client and the daemon binary:
//!
//! - **Accounts**: the account model, validation and the `SQLite` account
//!   directory with its sync bookkeeping
//! - **Store**: the per-account message store behind the [`MailStore`]
//!   trait, backed by `SQLite` or memory
//! - **Sync**: folder enumeration, cursor-based discovery, throttled batch
//!   fetching, attachment extraction, the per-account orchestrator and the
//!   multi-account scheduler

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
mod error;
pub mod store;
pub mod sync;

pub use account::{
    Account, AccountDirectory, AccountId, AccountRepository, ImapConfig, MemoryDirectory,
    Security, ValidationError, ValidationResult, validate_account,
};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use store::{
    AttachmentMetadata, ContentKind, MailStore, MemoryStore, MemoryStoreProvider, SqliteStore,
    SqliteStoreProvider, StoreProvider, StoredMessage, SyncCursor, UpsertOutcome,
};
pub use sync::{
    AttachmentStore, Connector, ImapConnector, MailSession, Scheduler, SyncError, SyncOrchestrator,
    SyncResult,
};
