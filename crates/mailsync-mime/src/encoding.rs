//! Transfer and header decoding.
//!
//! Base64 and Quoted-Printable bodies (RFC 2045), RFC 2047 encoded words in
//! header values, and charset conversion through `encoding_rs`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::Encoding;

use crate::error::Result;

/// Decodes Base64, ignoring line breaks and other whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable (RFC 2045).
///
/// Malformed escapes are passed through literally; mail in the wild is
/// full of stray `=` signs and rejecting them loses the whole body.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        match data.get(i + 1..) {
            // Soft line breaks, with or without CR.
            Some([b'\r', b'\n', ..]) => i += 3,
            Some([b'\n', ..]) => i += 2,
            Some([hi, lo, ..]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push((hex_value(*hi) << 4) | hex_value(*lo));
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

const fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// Converts `data` from the named charset to a `String`.
///
/// Unknown or missing labels are treated as UTF-8; invalid sequences are
/// replaced rather than rejected.
#[must_use]
pub fn decode_charset(charset: Option<&str>, data: &[u8]) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label_no_replacement(label.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    encoding.decode_with_bom_removal(data).0.into_owned()
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between adjacent encoded words is dropped; all other text
/// is left as is. Words that fail to decode are kept verbatim.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    if !text.contains("=?") {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut pending_space = String::new();
    let mut last_was_encoded = false;

    for (is_space, chunk) in split_whitespace_runs(text) {
        if is_space {
            pending_space.push_str(chunk);
            continue;
        }

        if let Some(decoded) = decode_encoded_word(chunk) {
            if !last_was_encoded {
                out.push_str(&pending_space);
            }
            out.push_str(&decoded);
            last_was_encoded = true;
        } else {
            out.push_str(&pending_space);
            out.push_str(chunk);
            last_was_encoded = false;
        }
        pending_space.clear();
    }

    out.push_str(&pending_space);
    out
}

/// Splits into alternating runs of whitespace and non-whitespace.
fn split_whitespace_runs(text: &str) -> impl Iterator<Item = (bool, &str)> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let is_space = first.is_whitespace();
        let end = rest
            .find(|c: char| c.is_whitespace() != is_space)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some((is_space, chunk))
    })
}

/// Decodes one `=?charset?encoding?text?=` word, or returns `None` if
/// `word` is not an encoded word.
fn decode_encoded_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut fields = inner.splitn(3, '?');
    let charset = fields.next()?;
    let encoding = fields.next()?;
    let payload = fields.next()?;

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => decode_base64(payload.as_bytes()).ok()?,
        "Q" | "q" => {
            let spaced: Vec<u8> = payload
                .bytes()
                .map(|b| if b == b'_' { b' ' } else { b })
                .collect();
            decode_quoted_printable(&spaced)
        }
        _ => return None,
    };

    let encoding = Encoding::for_label_no_replacement(charset.as_bytes())?;
    Some(encoding.decode_with_bom_removal(&bytes).0.into_owned())
}

/// Percent-decodes an RFC 2231 extended parameter value
/// (`charset'language'percent-encoded`).
#[must_use]
pub fn decode_rfc2231(value: &str) -> String {
    let mut fields = value.splitn(3, '\'');
    let (charset, encoded) = match (fields.next(), fields.next(), fields.next()) {
        (Some(charset), Some(_lang), Some(encoded)) => (Some(charset), encoded),
        _ => (None, value),
    };

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes.get(i..i + 3) {
            Some([b'%', hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push((hex_value(*hi) << 4) | hex_value(*lo));
                i += 3;
            }
            _ => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }

    decode_charset(charset.filter(|c| !c.is_empty()), &out)
}
