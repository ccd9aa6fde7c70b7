//! RFC 5322 header fields.

use std::collections::HashMap;

use crate::encoding::decode_rfc2047;

/// Header fields of a message or body part, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value for `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_ascii_lowercase();
        self.fields.entry(name).or_default().push(value.into());
    }

    /// Returns the first value for `name`, undecoded.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Returns every value for `name`, in order of appearance.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the first value for `name` with RFC 2047 words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Number of distinct field names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields were parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses a header block, unfolding continuation lines.
    ///
    /// Parsing stops at the first empty line. Lines that are neither a
    /// `name: value` field nor a continuation are ignored, which covers the
    /// mbox `From ` envelope line some servers leave in place.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(' ') {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        headers
    }
}
