//! Message flags.

/// A system flag or keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for special attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message is recent (first session to see it).
    Recent,
    /// Custom keyword, or `\*` in PERMANENTFLAGS.
    Keyword(String),
}

impl Flag {
    /// Parses a flag string (case-insensitive for system flags).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\SEEN" => Self::Seen,
            "\\ANSWERED" => Self::Answered,
            "\\FLAGGED" => Self::Flagged,
            "\\DELETED" => Self::Deleted,
            "\\DRAFT" => Self::Draft,
            "\\RECENT" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// Returns the flag in wire form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, duplicate-free collection of flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    flags: Vec<Flag>,
}

impl Flags {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a flag unless already present.
    pub fn insert(&mut self, flag: Flag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    /// Returns true if the flag is present.
    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    /// Returns true if the message has been seen.
    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.contains(&Flag::Seen)
    }

    /// Returns an iterator over the flags.
    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter()
    }

    /// Returns the number of flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Returns true if there are no flags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Returns the flags as wire strings, in insertion order.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.as_str().to_string()).collect()
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        let mut flags = Self::new();
        for flag in iter {
            flags.insert(flag);
        }
        flags
    }
}

impl IntoIterator for Flags {
    type Item = Flag;
    type IntoIter = std::vec::IntoIter<Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.into_iter()
    }
}
