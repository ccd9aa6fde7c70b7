//! Mailbox types.

use super::{Flags, Uid, UidValidity};

/// Mailbox status reported by SELECT/EXAMINE.
#[derive(Debug, Clone, Default)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// Next UID to be assigned.
    pub uid_next: Option<Uid>,
    /// UIDVALIDITY value.
    pub uid_validity: Option<UidValidity>,
    /// Flags defined for this mailbox.
    pub flags: Flags,
    /// Whether the mailbox was opened read-only.
    pub read_only: bool,
}

/// One line of a LIST response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Mailbox attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter, `None` when the server sends NIL (flat namespace).
    pub delimiter: Option<char>,
    /// Full mailbox name as sent by the server.
    pub name: String,
}

impl ListEntry {
    /// Returns true if the mailbox can be selected.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, MailboxAttribute::NoSelect | MailboxAttribute::NonExistent))
    }

    /// Returns the SPECIAL-USE attribute, if any.
    #[must_use]
    pub fn special_use(&self) -> Option<&MailboxAttribute> {
        self.attributes.iter().find(|a| a.is_special_use())
    }
}

/// Mailbox attributes from LIST (RFC 3501, RFC 6154).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// Mailbox cannot be selected.
    NoSelect,
    /// Mailbox does not exist (only its children do).
    NonExistent,
    /// Mailbox has no children.
    HasNoChildren,
    /// Mailbox has children.
    HasChildren,
    /// Virtual mailbox holding all messages.
    All,
    /// Archive folder.
    Archive,
    /// Drafts folder.
    Drafts,
    /// Virtual mailbox holding flagged messages.
    Flagged,
    /// Junk/spam folder.
    Junk,
    /// Sent folder.
    Sent,
    /// Trash folder.
    Trash,
    /// Anything else.
    Unknown(String),
}

impl MailboxAttribute {
    /// Parses an attribute string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\NONEXISTENT" => Self::NonExistent,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\ALL" => Self::All,
            "\\ARCHIVE" => Self::Archive,
            "\\DRAFTS" => Self::Drafts,
            "\\FLAGGED" => Self::Flagged,
            "\\JUNK" | "\\SPAM" => Self::Junk,
            "\\SENT" => Self::Sent,
            "\\TRASH" => Self::Trash,
            _ => Self::Unknown(s.to_string()),
        }
    }

    /// Returns true for RFC 6154 SPECIAL-USE attributes.
    #[must_use]
    pub const fn is_special_use(&self) -> bool {
        matches!(
            self,
            Self::All
                | Self::Archive
                | Self::Drafts
                | Self::Flagged
                | Self::Junk
                | Self::Sent
                | Self::Trash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_parse() {
        assert_eq!(MailboxAttribute::parse("\\Noselect"), MailboxAttribute::NoSelect);
        assert_eq!(MailboxAttribute::parse("\\SPAM"), MailboxAttribute::Junk);
        assert_eq!(
            MailboxAttribute::parse("\\Custom"),
            MailboxAttribute::Unknown("\\Custom".into())
        );
    }

    #[test]
    fn test_selectable() {
        let entry = ListEntry {
            attributes: vec![MailboxAttribute::NoSelect, MailboxAttribute::HasChildren],
            delimiter: Some('/'),
            name: "[Gmail]".into(),
        };
        assert!(!entry.is_selectable());

        let entry = ListEntry {
            attributes: vec![MailboxAttribute::Sent],
            delimiter: Some('/'),
            name: "[Gmail]/Sent Mail".into(),
        };
        assert!(entry.is_selectable());
        assert_eq!(entry.special_use(), Some(&MailboxAttribute::Sent));
    }
}
