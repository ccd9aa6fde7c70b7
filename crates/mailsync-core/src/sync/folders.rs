//! Folder enumeration.
//!
//! `LIST "" "*"` returns a flat list of full names. The names are folded
//! into a tree on the hierarchy delimiter, so parents the server did not
//! list still show up, and then walked depth-first to get a stable sync
//! order.

use mailsync_imap::{ListEntry, MailboxAttribute};

use super::error::SyncError;
use super::session::MailSession;

const DEFAULT_DELIMITER: char = '/';

/// A syncable folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Full name, segments joined with `delimiter`.
    pub name: String,
    /// Hierarchy delimiter.
    pub delimiter: char,
    /// LIST attributes.
    pub attributes: Vec<MailboxAttribute>,
}

impl Folder {
    /// Last path segment, e.g. `Sent` for `[Gmail]/Sent`.
    #[must_use]
    pub fn leaf_name(&self) -> &str {
        self.name
            .rsplit(self.delimiter)
            .next()
            .unwrap_or(&self.name)
    }

    /// Whether SELECT is possible.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, MailboxAttribute::NoSelect | MailboxAttribute::NonExistent))
    }
}

/// A folder and the folders below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    /// The folder itself.
    pub folder: Folder,
    /// Subfolders in LIST order.
    pub children: Vec<FolderNode>,
}

/// Builds the folder tree from LIST entries.
///
/// Intermediate folders missing from the listing are added as
/// `\NonExistent` placeholders.
#[must_use]
pub fn build_hierarchy(entries: &[ListEntry]) -> Vec<FolderNode> {
    let mut roots: Vec<FolderNode> = Vec::new();

    for entry in entries {
        let delimiter = entry.delimiter.unwrap_or(DEFAULT_DELIMITER);
        let separator = delimiter.to_string();
        let segments: Vec<&str> = entry.name.split(delimiter).collect();

        let mut level = &mut roots;
        for depth in 0..segments.len() {
            let name = segments[..=depth].join(separator.as_str());
            let is_leaf = depth + 1 == segments.len();

            let index = match level.iter().position(|n| n.folder.name == name) {
                Some(index) => index,
                None => {
                    level.push(FolderNode {
                        folder: Folder {
                            name,
                            delimiter,
                            attributes: vec![MailboxAttribute::NonExistent],
                        },
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };

            if is_leaf {
                level[index].folder.attributes.clone_from(&entry.attributes);
            }
            level = &mut level[index].children;
        }
    }

    roots
}

/// Depth-first walk returning the selectable folders, parents before
/// children.
#[must_use]
pub fn flatten(roots: &[FolderNode]) -> Vec<Folder> {
    fn walk(nodes: &[FolderNode], out: &mut Vec<Folder>) {
        for node in nodes {
            if node.folder.is_selectable() {
                out.push(node.folder.clone());
            }
            walk(&node.children, out);
        }
    }

    let mut out = Vec::new();
    walk(roots, &mut out);
    out
}

/// Lists the account's folders and returns the syncable ones.
///
/// # Errors
///
/// Returns [`SyncError::Connection`] if the session failed and
/// [`SyncError::Discovery`] if the server refused the listing.
pub async fn list_folders<S: MailSession>(session: &mut S) -> Result<Vec<Folder>, SyncError> {
    let entries = session.list_folders().await.map_err(|e| {
        if e.is_connection_fault() {
            SyncError::connection(e)
        } else {
            SyncError::Discovery {
                folder: "*".to_string(),
                message: format!("LIST failed: {e}"),
            }
        }
    })?;

    let folders = flatten(&build_hierarchy(&entries));
    tracing::debug!(listed = entries.len(), syncable = folders.len(), "folders enumerated");
    Ok(folders)
}
