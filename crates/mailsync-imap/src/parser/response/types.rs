//! Parsed response types.

use crate::types::{Flags, ListEntry, ResponseCode, SeqNum, Uid};

/// Data item inside a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// Message flags.
    Flags(Flags),
    /// Message UID.
    Uid(Uid),
    /// RFC822.SIZE.
    Rfc822Size(u32),
    /// INTERNALDATE, unparsed.
    InternalDate(String),
    /// `BODY[section]<origin>` payload.
    Body {
        /// Section spec between the brackets (empty for the whole message).
        section: String,
        /// Partial-fetch origin octet.
        origin: Option<u32>,
        /// Raw payload, `None` for NIL.
        data: Option<Vec<u8>>,
    },
}

/// Untagged server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK [code] text`
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* NO [code] text`
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* BAD [code] text`
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* PREAUTH [code] text`
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* BYE [code] text`
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* CAPABILITY ...`
    Capability(Vec<String>),
    /// `* FLAGS (...)`
    Flags(Flags),
    /// `* LIST (...) "/" name`
    List(ListEntry),
    /// `* SEARCH n n n`, UIDs when answering UID SEARCH.
    Search(Vec<u32>),
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n EXPUNGE`
    Expunge(SeqNum),
    /// `* n FETCH (...)`
    Fetch {
        /// Sequence number of the message.
        seq: SeqNum,
        /// Data items.
        items: Vec<FetchItem>,
    },
}
