//! Content classification of parsed messages.

use mailsync_mime::Message;

use crate::store::ContentKind;

/// What the store needs to know about a message's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// HTML iff the message has a non-empty HTML part.
    pub content_type: ContentKind,
    /// Whether the message carries any attachment part, inline or not.
    pub has_attachments: bool,
}

/// Classifies `message`. Whitespace-only HTML counts as empty.
#[must_use]
pub fn classify(message: &Message) -> Classification {
    let content_type = if message.html_body().is_some_and(|html| !html.trim().is_empty()) {
        ContentKind::Html
    } else {
        ContentKind::Plain
    };
    Classification {
        content_type,
        has_attachments: !message.attachments().is_empty(),
    }
}
