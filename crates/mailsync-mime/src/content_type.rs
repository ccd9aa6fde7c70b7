//! Content-Type and Content-Disposition.

use std::collections::HashMap;
use std::fmt;

use crate::encoding::{decode_rfc2047, decode_rfc2231};
use crate::error::{Error, Result};

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart"), lowercased.
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg"), lowercased.
    pub sub_type: String,
    /// Parameters with lowercased names.
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a content type without parameters.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// RFC 2045 default for parts without a Content-Type.
    #[must_use]
    pub fn text_plain() -> Self {
        let mut ct = Self::new("text", "plain");
        ct.parameters.insert("charset".to_string(), "us-ascii".to_string());
        ct
    }

    /// RFC 2046 default inside `multipart/digest`.
    #[must_use]
    pub fn message_rfc822() -> Self {
        Self::new("message", "rfc822")
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the legacy `name` parameter some clients use for filenames.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks for `multipart/*`.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks for an exact `main/sub` match.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type == main_type && self.sub_type == sub_type
    }

    /// Returns `main/sub` without parameters.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Parses `type/subtype; param=value; ...`.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = s.split_once(';').unwrap_or((s, ""));

        let (main_type, sub_type) = type_str
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.to_string()))?;
        let main_type = main_type.trim().to_ascii_lowercase();
        let sub_type = sub_type.trim().to_ascii_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(s.to_string()));
        }

        Ok(Self {
            main_type,
            sub_type,
            parameters: parse_parameters(params),
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)
    }
}

/// Disposition type of a body part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionKind {
    /// Displayed with the message.
    Inline,
    /// Offered as a separate file.
    Attachment,
}

/// Parsed Content-Disposition header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Inline or attachment.
    pub kind: DispositionKind,
    /// Decoded `filename` parameter.
    pub filename: Option<String>,
}

impl ContentDisposition {
    /// Parses a Content-Disposition value. Unknown kinds are treated as
    /// attachments (RFC 2183 §2.8).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (kind, params) = s.split_once(';').unwrap_or((s, ""));
        let kind = if kind.trim().eq_ignore_ascii_case("inline") {
            DispositionKind::Inline
        } else {
            DispositionKind::Attachment
        };
        let filename = parse_parameters(params).remove("filename");
        Self { kind, filename }
    }
}

/// Parses `; a=b; c="d;e"` parameter lists.
///
/// Names are lowercased. RFC 2231 extended values (`name*=`) and
/// continuations (`name*0=`, `name*1*=`) are reassembled and decoded,
/// and RFC 2047 words inside quoted values are decoded too since many
/// clients put them there.
fn parse_parameters(params: &str) -> HashMap<String, String> {
    let mut plain = HashMap::new();
    let mut continued: HashMap<String, Vec<(u32, bool, String)>> = HashMap::new();

    for param in split_params(params) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = unquote(value.trim());

        let (base, extended) = match name.strip_suffix('*') {
            Some(base) => (base.to_string(), true),
            None => (name.clone(), false),
        };

        if let Some((stem, index)) = base.split_once('*') {
            if let Ok(index) = index.parse::<u32>() {
                continued
                    .entry(stem.to_string())
                    .or_default()
                    .push((index, extended, value));
                continue;
            }
        }

        let value = if extended {
            decode_rfc2231(&value)
        } else {
            decode_rfc2047(&value)
        };
        plain.insert(base, value);
    }

    for (name, mut segments) in continued {
        segments.sort_by_key(|(index, _, _)| *index);
        let extended = segments.first().is_some_and(|(_, ext, _)| *ext);
        let joined: String = segments.into_iter().map(|(_, _, v)| v).collect();
        let value = if extended {
            decode_rfc2231(&joined)
        } else {
            joined
        };
        plain.entry(name).or_insert(value);
    }

    plain
}

/// Splits on `;` outside quoted strings.
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts.retain(|p| !p.trim().is_empty());
    parts
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let ct = ContentType::parse("Text/HTML; charset=UTF-8").unwrap();
        assert!(ct.is("text", "html"));
        assert_eq!(ct.charset(), Some("UTF-8"));
        assert_eq!(ct.mime_type(), "text/html");
    }

    #[test]
    fn test_parse_quoted_boundary() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_1;x\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part_1;x"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn test_disposition() {
        let d = ContentDisposition::parse("attachment; filename=\"report q1.pdf\"");
        assert_eq!(d.kind, DispositionKind::Attachment);
        assert_eq!(d.filename.as_deref(), Some("report q1.pdf"));

        let d = ContentDisposition::parse("INLINE");
        assert_eq!(d.kind, DispositionKind::Inline);
        assert!(d.filename.is_none());
    }

    #[test]
    fn test_rfc2231_filename() {
        let d = ContentDisposition::parse("attachment; filename*=utf-8''r%C3%A9sum%C3%A9.pdf");
        assert_eq!(d.filename.as_deref(), Some("résumé.pdf"));
    }

    #[test]
    fn test_rfc2231_continuation() {
        let d = ContentDisposition::parse(
            "attachment; filename*0=\"very_long_\"; filename*1=\"name.txt\"",
        );
        assert_eq!(d.filename.as_deref(), Some("very_long_name.txt"));
    }

    #[test]
    fn test_encoded_word_in_name() {
        let ct = ContentType::parse("application/pdf; name=\"=?utf-8?B?SMOpbGxvLnBkZg==?=\"").unwrap();
        assert_eq!(ct.name(), Some("Héllo.pdf"));
    }
}
