//! Writing attachments to disk.
//!
//! Files land in `{root}/{account}/{message}/{name}` where every component
//! below the root is sanitized, so a hostile filename cannot escape the
//! message directory. The message component ends in a digest of the raw
//! Message-ID, so two identifiers that sanitize alike still get separate
//! directories.

use std::collections::HashSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use mailsync_mime::Attachment;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::error::SyncError;
use crate::account::AccountId;
use crate::store::AttachmentMetadata;

/// Longest filename most filesystems accept.
const MAX_NAME_BYTES: usize = 255;

/// Longest suffix kept as an extension when truncating.
const MAX_EXTENSION_BYTES: usize = 16;

/// Longest readable prefix of a message directory name.
const MAX_DIR_PREFIX_BYTES: usize = 200;

/// Digest bytes appended to a message directory name.
const DIR_DIGEST_BYTES: usize = 16;

const FALLBACK_NAME: &str = "attachment";

/// Result of storing one message's attachments.
#[derive(Debug, Default)]
pub struct StoredAttachments {
    /// Message directory, `None` if nothing was written.
    pub dir: Option<PathBuf>,
    /// One entry per written file.
    pub files: Vec<AttachmentMetadata>,
    /// Skipped attachments.
    pub errors: Vec<SyncError>,
}

/// Attachment writer rooted at one directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    max_bytes: u64,
}

impl AttachmentStore {
    /// Creates a store under `root` that skips attachments over `max_bytes`.
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one message's files: the sanitized Message-ID
    /// followed by `_` and a hex SHA-256 prefix of the raw Message-ID.
    #[must_use]
    pub fn message_dir(&self, account: AccountId, message_id: &str) -> PathBuf {
        let digest = Sha256::digest(message_id.as_bytes());
        let mut name = truncate(&sanitize_filename(message_id), MAX_DIR_PREFIX_BYTES);
        name.push('_');
        for b in &digest[..DIR_DIGEST_BYTES] {
            let _ = write!(name, "{b:02x}");
        }
        self.root.join(account.to_string()).join(name)
    }

    /// Writes `attachments` for `message_id`.
    ///
    /// Oversized or unwritable attachments are skipped and reported in
    /// [`StoredAttachments::errors`]; the others are still written. Files
    /// from an earlier sync of the same message are overwritten.
    pub async fn store(
        &self,
        account: AccountId,
        message_id: &str,
        attachments: &[Attachment],
    ) -> StoredAttachments {
        let mut result = StoredAttachments::default();

        let mut accepted = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let size = attachment.data.len() as u64;
            if size > self.max_bytes {
                let filename = display_name(attachment);
                warn!(
                    %account,
                    message_id,
                    filename,
                    size,
                    max = self.max_bytes,
                    "skipping oversized attachment"
                );
                result.errors.push(SyncError::Attachment {
                    message_id: message_id.to_string(),
                    filename: filename.to_string(),
                    message: format!("{size} bytes exceeds the {} byte limit", self.max_bytes),
                });
            } else {
                accepted.push(attachment);
            }
        }
        if accepted.is_empty() {
            return result;
        }

        let dir = self.message_dir(account, message_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(%account, message_id, dir = %dir.display(), error = %e, "cannot create attachment directory");
            result.errors.extend(accepted.into_iter().map(|a| SyncError::Attachment {
                message_id: message_id.to_string(),
                filename: display_name(a).to_string(),
                message: e.to_string(),
            }));
            return result;
        }

        let mut used = HashSet::new();
        for attachment in accepted {
            let stored_filename = unique_name(
                &sanitize_filename(attachment.filename.as_deref().unwrap_or(FALLBACK_NAME)),
                &mut used,
            );
            let path = dir.join(&stored_filename);
            match tokio::fs::write(&path, &attachment.data).await {
                Ok(()) => {
                    debug!(%account, message_id, file = %stored_filename, "attachment written");
                    result.files.push(AttachmentMetadata {
                        original_filename: attachment.filename.clone(),
                        stored_filename,
                        size: attachment.data.len() as u64,
                        content_type: attachment.content_type.clone(),
                        inline: attachment.inline,
                    });
                }
                Err(e) => {
                    warn!(%account, message_id, file = %stored_filename, error = %e, "cannot write attachment");
                    result.errors.push(SyncError::Attachment {
                        message_id: message_id.to_string(),
                        filename: display_name(attachment).to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !result.files.is_empty() {
            result.dir = Some(dir);
        }
        result
    }
}

fn display_name(attachment: &Attachment) -> &str {
    attachment.filename.as_deref().unwrap_or(FALLBACK_NAME)
}

const fn is_separator(c: char) -> bool {
    matches!(c, '_' | '.' | '-')
}

/// Reduces `name` to a safe single path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, each run of separators
/// collapses to one character (`.` if the run had one), separators are
/// trimmed from both ends and the result is cut to 255 bytes keeping the
/// extension. The result never contains `/` or `..` and is never empty.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut run: Option<char> = None;

    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || is_separator(c) {
            c
        } else {
            '_'
        };
        if is_separator(c) {
            run = match run {
                Some(_) if c == '.' => Some('.'),
                Some(kept) => Some(kept),
                None => Some(c),
            };
            continue;
        }
        if let Some(sep) = run.take() {
            out.push(sep);
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(is_separator);
    let truncated = truncate(trimmed, MAX_NAME_BYTES);
    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated
    }
}

/// Splits `name` into stem and extension (with its dot).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => name.split_at(dot),
        _ => (name, ""),
    }
}

/// Cuts an already sanitized (ASCII) name to `max` bytes.
fn truncate(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let room = max.saturating_sub(ext.len());
    let stem = stem[..room.min(stem.len())].trim_end_matches(is_separator);
    if stem.is_empty() {
        return name[..max].trim_end_matches(is_separator).to_string();
    }
    format!("{stem}{ext}")
}

/// Returns `name`, or `stem_N.ext` for the first free N, and marks it used.
fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let mut n = 1u32;
    loop {
        let suffix = format!("_{n}{ext}");
        let room = MAX_NAME_BYTES.saturating_sub(suffix.len());
        let stem = stem[..room.min(stem.len())].trim_end_matches(is_separator);
        let candidate = format!("{stem}{suffix}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
