//! The sync engine.
//!
//! [`Scheduler`] decides when and which accounts sync.
//! [`SyncOrchestrator`] runs one account's cycle: connect through a
//! [`Connector`], enumerate folders, then discover, fetch and persist each
//! folder's new messages over the one [`MailSession`]. Cursors only move
//! after the batch they cover has been committed.

mod attachments;
mod classify;
mod connection;
mod discovery;
mod error;
mod fetcher;
mod folders;
mod orchestrator;
mod persist;
mod retry;
mod scheduler;
mod session;

#[cfg(test)]
mod testing;

pub use attachments::{AttachmentStore, StoredAttachments, sanitize_filename};
pub use classify::{Classification, classify};
pub use connection::{ConnectionManager, ConnectionState};
pub use discovery::{Discovered, Strategy, discover, synthetic_message_id};
pub use error::SyncError;
pub use fetcher::{BatchFetcher, BatchSettings, FetchReport};
pub use folders::{Folder, FolderNode, build_hierarchy, flatten, list_folders};
pub use orchestrator::{SyncOrchestrator, SyncResult, prioritize};
pub use persist::Persister;
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use session::{Connector, FetchedMessage, ImapConnector, ImapSession, MailSession};
