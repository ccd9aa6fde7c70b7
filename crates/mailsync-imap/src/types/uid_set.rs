//! UID sets for UID SEARCH/FETCH.

use std::fmt::Write;

/// A set of UIDs in IMAP `sequence-set` syntax, e.g. `1:3,7,10:*`.
///
/// Ranges are kept sorted and non-overlapping; `end == None` stands for `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidSet {
    ranges: Vec<(u32, Option<u32>)>,
}

impl UidSet {
    /// All messages: `1:*`.
    #[must_use]
    pub fn all() -> Self {
        Self {
            ranges: vec![(1, None)],
        }
    }

    /// Everything from `start` upward: `start:*`.
    ///
    /// Returns `None` for 0, which is not a valid UID.
    #[must_use]
    pub fn from_start(start: u32) -> Option<Self> {
        (start > 0).then(|| Self {
            ranges: vec![(start, None)],
        })
    }

    /// Builds a compact set from arbitrary UIDs (unordered, duplicates and
    /// zeros allowed). Returns `None` if no valid UID remains.
    pub fn from_uids(uids: impl IntoIterator<Item = u32>) -> Option<Self> {
        let mut uids: Vec<u32> = uids.into_iter().filter(|&u| u > 0).collect();
        uids.sort_unstable();
        uids.dedup();

        let mut ranges: Vec<(u32, Option<u32>)> = Vec::new();
        for uid in uids {
            match ranges.last_mut() {
                Some((_, Some(end))) if end.checked_add(1) == Some(uid) => *end = uid,
                _ => ranges.push((uid, Some(uid))),
            }
        }

        (!ranges.is_empty()).then_some(Self { ranges })
    }

    /// Returns true if `uid` falls inside the set.
    #[must_use]
    pub fn contains(&self, uid: u32) -> bool {
        self.ranges
            .iter()
            .any(|&(start, end)| uid >= start && end.is_none_or(|end| uid <= end))
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        for (i, &(start, end)) in self.ranges.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            match end {
                Some(end) if end == start => write!(out, "{start}")?,
                Some(end) => write!(out, "{start}:{end}")?,
                None => write!(out, "{start}:*")?,
            }
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_compacts_consecutive_runs() {
        let set = UidSet::from_uids([5, 1, 2, 3, 9, 10, 3]).unwrap();
        assert_eq!(set.to_string(), "1:3,5,9:10");
    }

    #[test]
    fn test_empty_and_zero() {
        assert!(UidSet::from_uids([]).is_none());
        assert!(UidSet::from_uids([0]).is_none());
        assert!(UidSet::from_start(0).is_none());
    }

    #[test]
    fn test_open_ranges() {
        assert_eq!(UidSet::all().to_string(), "1:*");
        assert_eq!(UidSet::from_start(101).unwrap().to_string(), "101:*");
        assert!(UidSet::from_start(101).unwrap().contains(u32::MAX));
    }

    proptest! {
        #[test]
        fn prop_set_covers_exactly_its_input(uids in proptest::collection::vec(1u32..500, 1..60)) {
            let set = UidSet::from_uids(uids.iter().copied()).unwrap();
            for uid in 1..500 {
                prop_assert_eq!(set.contains(uid), uids.contains(&uid));
            }
        }
    }
}
