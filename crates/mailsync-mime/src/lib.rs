//! # mailsync-mime
//!
//! MIME parsing for mirrored mail: turns the raw RFC 5322 bytes returned by
//! `UID FETCH ... BODY.PEEK[]` into headers, text/HTML bodies and decoded
//! attachments.
//!
//! - **Headers**: unfolding, case-insensitive lookup, RFC 2047 decoding
//! - **Content types**: parameters with quoting, RFC 2231 filenames
//! - **Transfer decoding**: Base64, Quoted-Printable, charsets via `encoding_rs`
//! - **Multipart**: recursive walk of mixed, alternative, related and digest
//!
//! ```
//! use mailsync_mime::Message;
//!
//! let raw = b"Message-ID: <1@example.com>\r\n\
//!             Subject: =?utf-8?Q?Caf=C3=A9?=\r\n\
//!             Content-Type: text/html; charset=utf-8\r\n\
//!             \r\n\
//!             <p>Hello</p>";
//!
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.message_id(), Some("<1@example.com>"));
//! assert_eq!(message.subject().as_deref(), Some("Café"));
//! assert_eq!(message.html_body(), Some("<p>Hello</p>"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::{ContentDisposition, ContentType, DispositionKind};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Attachment, Message, Part, TransferEncoding};
