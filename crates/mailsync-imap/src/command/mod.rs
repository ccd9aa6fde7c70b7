//! IMAP command serialization.

mod tag_generator;

use chrono::NaiveDate;

use crate::types::UidSet;

pub use tag_generator::TagGenerator;

/// An IMAP command the client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY.
    Capability,
    /// LOGOUT.
    Logout,
    /// STARTTLS.
    StartTls,
    /// LOGIN with plaintext credentials.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// LIST reference pattern.
    List {
        /// Reference name (usually empty).
        reference: String,
        /// Mailbox pattern with `*`/`%` wildcards.
        pattern: String,
    },
    /// EXAMINE (read-only).
    Examine {
        /// Mailbox name.
        mailbox: String,
    },
    /// UID SEARCH.
    UidSearch {
        /// Search key.
        key: SearchKey,
    },
    /// UID FETCH.
    UidFetch {
        /// UIDs to fetch.
        set: UidSet,
        /// Data items to request.
        attributes: Vec<FetchAttribute>,
    },
}

/// Search keys used by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// Every message.
    All,
    /// Messages whose internal date is on or after the given day.
    Since(NaiveDate),
    /// Messages whose UID falls in the set.
    Uid(UidSet),
    /// All keys must match.
    And(Vec<Self>),
    /// Either key matches.
    Or(Box<Self>, Box<Self>),
}

/// FETCH data items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// UID.
    Uid,
    /// FLAGS.
    Flags,
    /// RFC822.SIZE.
    Rfc822Size,
    /// INTERNALDATE.
    InternalDate,
    /// `BODY[section]` or `BODY.PEEK[section]`.
    Body {
        /// Section spec, empty for the whole message.
        section: String,
        /// Use `BODY.PEEK` so `\Seen` is not set.
        peek: bool,
    },
}

impl FetchAttribute {
    /// `BODY.PEEK[]`: the full RFC 822 message without setting `\Seen`.
    #[must_use]
    pub fn full_message() -> Self {
        Self::Body {
            section: String::new(),
            peek: true,
        }
    }

    /// `BODY.PEEK[HEADER.FIELDS (...)]` for the given header names.
    #[must_use]
    pub fn header_fields(names: &[&str]) -> Self {
        Self::Body {
            section: format!("HEADER.FIELDS ({})", names.join(" ")),
            peek: true,
        }
    }
}

impl Command {
    /// Serializes the command with the given tag, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::StartTls => buf.extend_from_slice(b"STARTTLS"),
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_quoted(&mut buf, reference);
                buf.push(b' ');
                write_quoted(&mut buf, pattern);
            }
            Self::Examine { mailbox } => {
                buf.extend_from_slice(b"EXAMINE ");
                write_astring(&mut buf, mailbox);
            }
            Self::UidSearch { key } => {
                buf.extend_from_slice(b"UID SEARCH ");
                write_search_key(&mut buf, key);
            }
            Self::UidFetch { set, attributes } => {
                buf.extend_from_slice(b"UID FETCH ");
                buf.extend_from_slice(set.to_string().as_bytes());
                buf.push(b' ');
                write_fetch_attributes(&mut buf, attributes);
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Writes an astring: bare atom when safe, quoted string otherwise.
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        write_quoted(buf, s);
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

fn write_quoted(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b >= 0x7F
}

fn write_search_key(buf: &mut Vec<u8>, key: &SearchKey) {
    match key {
        SearchKey::All => buf.extend_from_slice(b"ALL"),
        SearchKey::Since(date) => {
            buf.extend_from_slice(b"SINCE ");
            buf.extend_from_slice(date.format("%-d-%b-%Y").to_string().as_bytes());
        }
        SearchKey::Uid(set) => {
            buf.extend_from_slice(b"UID ");
            buf.extend_from_slice(set.to_string().as_bytes());
        }
        SearchKey::And(keys) => {
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                write_search_key(buf, key);
            }
        }
        SearchKey::Or(left, right) => {
            buf.extend_from_slice(b"OR ");
            write_or_operand(buf, left);
            buf.push(b' ');
            write_or_operand(buf, right);
        }
    }
}

// OR takes exactly two keys; a conjunction must be parenthesized.
fn write_or_operand(buf: &mut Vec<u8>, key: &SearchKey) {
    if matches!(key, SearchKey::And(keys) if keys.len() > 1) {
        buf.push(b'(');
        write_search_key(buf, key);
        buf.push(b')');
    } else {
        write_search_key(buf, key);
    }
}

fn write_fetch_attributes(buf: &mut Vec<u8>, attributes: &[FetchAttribute]) {
    buf.push(b'(');
    for (i, attr) in attributes.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        match attr {
            FetchAttribute::Uid => buf.extend_from_slice(b"UID"),
            FetchAttribute::Flags => buf.extend_from_slice(b"FLAGS"),
            FetchAttribute::Rfc822Size => buf.extend_from_slice(b"RFC822.SIZE"),
            FetchAttribute::InternalDate => buf.extend_from_slice(b"INTERNALDATE"),
            FetchAttribute::Body { section, peek } => {
                let prefix: &[u8] = if *peek { b"BODY.PEEK[" } else { b"BODY[" };
                buf.extend_from_slice(prefix);
                buf.extend_from_slice(section.as_bytes());
                buf.push(b']');
            }
        }
    }
    buf.push(b')');
}
