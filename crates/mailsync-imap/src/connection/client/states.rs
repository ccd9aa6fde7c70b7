//! Type-state markers for the client.

use crate::types::MailboxStatus;

/// Before LOGIN: only authentication and STARTTLS are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// After LOGIN: mailbox-level commands (LIST, EXAMINE) are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// A mailbox is open. Carries what EXAMINE reported.
#[derive(Debug, Clone)]
pub struct Selected {
    pub(crate) mailbox: String,
    pub(crate) status: MailboxStatus,
}

impl Selected {
    /// Name of the open mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Status snapshot taken when the mailbox was opened.
    #[must_use]
    pub const fn status(&self) -> &MailboxStatus {
        &self.status
    }
}
