//! MIME message structure and parsing.

use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::content_type::{ContentDisposition, ContentType, DispositionKind};
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;

/// Deepest multipart nesting followed before giving up.
const MAX_DEPTH: usize = 32;

/// Content-Transfer-Encoding of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64.
    Base64,
    /// Quoted-Printable.
    QuotedPrintable,
    /// Raw binary.
    Binary,
}

impl TransferEncoding {
    /// Parses a Content-Transfer-Encoding value. Unknown values are 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// One entity: a header block and its raw (still transfer-encoded) body.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl Part {
    /// Splits raw bytes at the first empty line.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (header_bytes, body) = split_header_body(raw);
        Self {
            headers: Headers::parse(&String::from_utf8_lossy(header_bytes)),
            body: body.to_vec(),
        }
    }

    /// Content type, falling back to `text/plain` when the header is
    /// missing or unparseable (RFC 2045 §5.2).
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type_or(ContentType::text_plain)
    }

    fn content_type_or(&self, default: impl FnOnce() -> ContentType) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok())
            .unwrap_or_else(default)
    }

    /// Parsed Content-Disposition, if present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Content-Transfer-Encoding, 7bit when absent.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Undoes the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if a Base64 body is malformed.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body),
            TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(&self.body)),
            _ => Ok(self.body.clone()),
        }
    }
}

/// An extracted attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename as the sender declared it, decoded. Not safe for use as a path.
    pub filename: Option<String>,
    /// Declared `main/sub` type.
    pub content_type: String,
    /// Content-ID, for parts referenced from HTML.
    pub content_id: Option<String>,
    /// Whether the part was marked inline.
    pub inline: bool,
    /// Decoded payload.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A parsed message: top-level headers, the text and HTML bodies, and
/// every attachment in document order.
///
/// Several inline parts of the same text type (as in `multipart/mixed`)
/// are joined with a newline.
#[derive(Debug, Clone)]
pub struct Message {
    headers: Headers,
    text_body: Option<String>,
    html_body: Option<String>,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Parses a full RFC 5322 message.
    ///
    /// # Errors
    ///
    /// Fails on empty input, a header block with no fields, a multipart
    /// without boundary or parts, or a malformed Base64 body.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Empty);
        }

        let root = Part::parse(raw);
        if root.headers.is_empty() {
            return Err(Error::InvalidHeader("no header fields".to_string()));
        }

        let mut message = Self {
            headers: root.headers.clone(),
            text_body: None,
            html_body: None,
            attachments: Vec::new(),
        };
        message.walk(&root, root.content_type(), 0)?;
        Ok(message)
    }

    fn walk(&mut self, part: &Part, content_type: ContentType, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidMultipart("nesting too deep".to_string()));
        }

        if content_type.is_multipart() {
            let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
            let digest = content_type.sub_type == "digest";
            for raw in split_multipart(&part.body, boundary)? {
                let child = Part::parse(raw);
                let child_type = if digest {
                    child.content_type_or(ContentType::message_rfc822)
                } else {
                    child.content_type()
                };
                self.walk(&child, child_type, depth + 1)?;
            }
            return Ok(());
        }

        let disposition = part.disposition();
        let is_attachment = disposition
            .as_ref()
            .is_some_and(|d| d.kind == DispositionKind::Attachment);
        let filename = disposition
            .as_ref()
            .and_then(|d| d.filename.clone())
            .or_else(|| content_type.name().map(str::to_string));

        let is_text = content_type.is("text", "plain") || content_type.is("text", "html");
        if is_text && !is_attachment && filename.is_none() {
            let text = decode_charset(content_type.charset(), &part.decode_body()?);
            let slot = if content_type.sub_type == "html" {
                &mut self.html_body
            } else {
                &mut self.text_body
            };
            *slot = Some(match slot.take() {
                Some(existing) => format!("{existing}\n{text}"),
                None => text,
            });
            return Ok(());
        }

        self.attachments.push(Attachment {
            filename,
            content_type: content_type.mime_type(),
            content_id: part
                .headers
                .get("content-id")
                .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string()),
            inline: !is_attachment && disposition.is_some(),
            data: part.decode_body()?,
        });
        Ok(())
    }

    /// Top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The `Message-ID` header, whitespace-trimmed, angle brackets kept.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers
            .get("message-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Decoded subject.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.headers.get_decoded("subject")
    }

    /// Decoded `From` header.
    #[must_use]
    pub fn from(&self) -> Option<String> {
        self.headers.get_decoded("from")
    }

    /// Decoded `To` header.
    #[must_use]
    pub fn to(&self) -> Option<String> {
        self.headers.get_decoded("to")
    }

    /// Decoded `Cc` header.
    #[must_use]
    pub fn cc(&self) -> Option<String> {
        self.headers.get_decoded("cc")
    }

    /// The `Date` header, if it parses as RFC 2822.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.headers.get("date")?;
        // Drop trailing comments like "(UTC)".
        let raw = raw.split_once('(').map_or(raw, |(date, _)| date).trim();
        DateTime::parse_from_rfc2822(raw).ok()
    }

    /// Plain-text body.
    #[must_use]
    pub fn text_body(&self) -> Option<&str> {
        self.text_body.as_deref()
    }

    /// HTML body.
    #[must_use]
    pub fn html_body(&self) -> Option<&str> {
        self.html_body.as_deref()
    }

    /// Attachments in document order.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Takes the attachments out, leaving an empty list.
    pub fn take_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.attachments)
    }
}

/// Splits at the first empty line. Input without one is all header.
fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(rest) = raw.strip_prefix(b"\r\n").or_else(|| raw.strip_prefix(b"\n")) {
        return (&[], rest);
    }

    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((i, len)) => (&raw[..i], &raw[i + len..]),
        None => (raw, &[]),
    }
}

/// Splits a multipart body into its parts (RFC 2046 §5.1.1).
///
/// The preamble and epilogue are dropped. A missing close delimiter is
/// tolerated: the last part runs to the end of the body.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = &body[pos..end];

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(u8::is_ascii_whitespace) {
                if let Some(s) = start {
                    parts.push(strip_line_ending(&body[s..pos]));
                }
                if closing {
                    return Ok(parts);
                }
                start = Some(end);
            }
        }
        pos = end;
    }

    if let Some(s) = start {
        parts.push(&body[s..]);
    }
    if parts.is_empty() {
        return Err(Error::InvalidMultipart(format!(
            "no parts delimited by {delimiter}"
        )));
    }
    Ok(parts)
}

/// The line break before a delimiter belongs to the delimiter.
fn strip_line_ending(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn crlf(s: &str) -> Vec<u8> {
        s.replace('\n', "\r\n").into_bytes()
    }

    #[test]
    fn test_simple_plain() {
        let raw = crlf(
            "Message-ID: <abc@x>\n\
             Subject: Hello\n\
             From: Alice <alice@example.com>\n\
             Date: Tue, 6 Feb 2024 10:00:00 +0000 (UTC)\n\
             \n\
             Just text.\n",
        );
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.message_id(), Some("<abc@x>"));
        assert_eq!(msg.subject().as_deref(), Some("Hello"));
        assert_eq!(msg.from().as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(msg.text_body(), Some("Just text.\r\n"));
        assert!(msg.html_body().is_none());
        assert!(msg.attachments().is_empty());
        assert_eq!(msg.date().unwrap().timestamp(), 1_707_213_600);
    }

    #[test]
    fn test_alternative_with_attachment() {
        let raw = crlf(
            "Message-ID: <m1@x>\n\
             Content-Type: multipart/mixed; boundary=\"outer\"\n\
             \n\
             preamble\n\
             --outer\n\
             Content-Type: multipart/alternative; boundary=inner\n\
             \n\
             --inner\n\
             Content-Type: text/plain; charset=utf-8\n\
             Content-Transfer-Encoding: quoted-printable\n\
             \n\
             caf=C3=A9\n\
             --inner\n\
             Content-Type: text/html; charset=utf-8\n\
             \n\
             <p>caf\u{e9}</p>\n\
             --inner--\n\
             --outer\n\
             Content-Type: application/pdf; name=\"q1.pdf\"\n\
             Content-Disposition: attachment; filename=\"report.pdf\"\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             JVBERi0x\n\
             --outer--\n\
             epilogue\n",
        );
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.text_body(), Some("café"));
        assert_eq!(msg.html_body(), Some("<p>café</p>"));

        let attachments = msg.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename.as_deref(), Some("report.pdf"));
        assert_eq!(attachments[0].content_type, "application/pdf");
        assert_eq!(attachments[0].data, b"%PDF-1");
        assert!(!attachments[0].inline);
    }

    #[test]
    fn test_inline_image_is_attachment() {
        let raw = crlf(
            "Message-ID: <m2@x>\n\
             Content-Type: multipart/related; boundary=b\n\
             \n\
             --b\n\
             Content-Type: text/html\n\
             \n\
             <img src=\"cid:logo\">\n\
             --b\n\
             Content-Type: image/png\n\
             Content-ID: <logo>\n\
             Content-Disposition: inline\n\
             \n\
             PNG\n\
             --b--\n",
        );
        let msg = Message::parse(&raw).unwrap();
        let attachments = msg.attachments();
        assert_eq!(attachments.len(), 1);
        assert!(attachments[0].inline);
        assert_eq!(attachments[0].content_id.as_deref(), Some("logo"));
        assert!(attachments[0].filename.is_none());
    }

    #[test]
    fn test_latin1_body() {
        let mut raw = b"Content-Type: text/plain; charset=iso-8859-1\r\n\r\ncaf".to_vec();
        raw.push(0xE9);
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.text_body(), Some("café"));
    }

    #[test]
    fn test_empty_is_error() {
        assert!(matches!(Message::parse(b""), Err(Error::Empty)));
        assert!(matches!(Message::parse(b"\r\n\r\n"), Err(Error::Empty)));
    }

    #[test]
    fn test_no_headers_is_error() {
        let err = Message::parse(b"this is not a message at all").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_multipart_without_boundary() {
        let raw = crlf("Content-Type: multipart/mixed\n\nbody\n");
        assert!(matches!(Message::parse(&raw), Err(Error::MissingBoundary)));
    }

    #[test]
    fn test_bad_base64_attachment() {
        let raw = crlf(
            "Content-Type: application/octet-stream\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             @@@@\n",
        );
        assert!(matches!(Message::parse(&raw), Err(Error::Base64Decode(_))));
    }

    #[test]
    fn test_unterminated_multipart() {
        let raw = crlf(
            "Content-Type: multipart/mixed; boundary=z\n\
             \n\
             --z\n\
             \n\
             only part\n",
        );
        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.text_body(), Some("only part\r\n"));
    }

    #[test]
    fn test_lf_only_message() {
        let msg = Message::parse(b"Subject: lf\n\nbody\n").unwrap();
        assert_eq!(msg.subject().as_deref(), Some("lf"));
        assert_eq!(msg.text_body(), Some("body\n"));
    }
}
