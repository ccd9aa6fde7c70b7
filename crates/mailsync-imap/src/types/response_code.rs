//! Response status and response codes.

use super::{Uid, UidValidity};

/// Status of a tagged or untagged condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting (pre-authenticated).
    PreAuth,
    /// Server is closing connection.
    Bye,
}

/// Bracketed response code (`[UIDVALIDITY 42]` etc.).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// Human-readable alert.
    Alert,
    /// Capability list piggy-backed on a greeting or OK.
    Capability(Vec<String>),
    /// Mailbox selected as read-only.
    ReadOnly,
    /// Mailbox selected as read-write.
    ReadWrite,
    /// Next UID to be assigned.
    UidNext(Uid),
    /// Unique identifier validity value.
    UidValidity(UidValidity),
    /// Any other code, keyed by its atom.
    Other(String),
}
