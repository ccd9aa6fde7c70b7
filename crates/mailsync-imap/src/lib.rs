//! # mailsync-imap
//!
//! The IMAP client underneath the mailsync engine. It implements the subset
//! of RFC 3501 / RFC 9051 a one-way mirror needs:
//!
//! - **Type-state connection**: `NotAuthenticated` → `Authenticated` →
//!   `Selected`, enforced at compile time
//! - **Commands**: LOGIN, STARTTLS, LIST, EXAMINE, UID SEARCH, UID FETCH
//!   and LOGOUT
//! - **TLS via rustls**: implicit TLS and STARTTLS without OpenSSL
//! - **Sans-I/O parser**: responses are parsed from complete frames, so
//!   literals (message bodies) never straddle a read boundary
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsync_imap::{FetchAttribute, SearchKey, Security, UidSet};
//!
//! #[tokio::main]
//! async fn main() -> mailsync_imap::Result<()> {
//!     let client = mailsync_imap::connect("imap.example.com", 993, Security::Implicit).await?;
//!     let client = client.login("user@example.com", "password").await?;
//!
//!     let (mut client, status) = client.examine("INBOX").await?;
//!     println!("uidvalidity = {:?}", status.uid_validity);
//!
//!     let uids = client.uid_search(&SearchKey::All).await?;
//!     if let Some(set) = UidSet::from_uids(uids.iter().map(|u| u.get())) {
//!         let messages = client
//!             .uid_fetch(&set, &[FetchAttribute::Uid, FetchAttribute::Flags])
//!             .await?;
//!         println!("{} messages", messages.len());
//!     }
//!
//!     client.logout().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
pub mod error;
pub mod parser;
pub mod types;

pub use command::{Command, FetchAttribute, SearchKey, TagGenerator};
pub use connection::{
    Authenticated, Client, FramedStream, ImapStream, NotAuthenticated, Security, SelectError,
    SelectResult, Selected, connect, connect_plain, connect_tls,
};
pub use error::{Error, Result};
pub use parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
pub use types::{
    Flag, Flags, ListEntry, MailboxAttribute, MailboxStatus, ResponseCode, SeqNum, Status, Tag,
    Uid, UidSet, UidValidity,
};
