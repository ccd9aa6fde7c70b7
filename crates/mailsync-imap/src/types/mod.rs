//! Core IMAP types.

#![allow(clippy::missing_const_for_fn)]

mod flags;
mod identifiers;
mod mailbox;
mod response_code;
mod uid_set;

pub use flags::{Flag, Flags};
pub use identifiers::{SeqNum, Tag, Uid, UidValidity};
pub use mailbox::{ListEntry, MailboxAttribute, MailboxStatus};
pub use response_code::{ResponseCode, Status};
pub use uid_set::UidSet;
