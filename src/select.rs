//! Global ordering and slicing across all harvested roots.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traverse::{FileRecord, Harvest};

/// How the flattened pool is ordered before slicing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ordering {
    /// By lowercased title across all roots; ties broken by root position,
    /// then by the exact title.
    Title,
    /// Roots in configured order, lowercased titles within each root.
    #[default]
    #[serde(alias = "root_then_title")]
    RootThenTitle,
}

impl std::fmt::Display for Ordering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::RootThenTitle => "root-then-title",
        })
    }
}

/// A 1-based inclusive range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceRange {
    /// First position, 1-based. `None` means 1.
    pub start: Option<usize>,
    /// Last position, inclusive. `None` means the end.
    pub end: Option<usize>,
}

impl SliceRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(start: Option<usize>, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Checks the bounds; `what` names the range in the error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero start or an end before the start.
    pub fn validate(&self, what: &str) -> Result<()> {
        if self.start == Some(0) {
            return Err(Error::Config(format!("{what}: start must be at least 1")));
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && end < start
        {
            return Err(Error::Config(format!(
                "{what}: end ({end}) is before start ({start})"
            )));
        }
        Ok(())
    }

    /// Zero-based index range into a sequence of `len` items.
    #[must_use]
    pub fn indices(&self, len: usize) -> Range<usize> {
        let start = self.start.unwrap_or(1).saturating_sub(1).min(len);
        let end = self.end.unwrap_or(len).min(len).max(start);
        start..end
    }

    /// Applies the range to a slice.
    #[must_use]
    pub fn apply<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.indices(items.len())]
    }

    /// Human form, e.g. `2-5 of 10`.
    #[must_use]
    pub fn describe(&self, len: usize) -> String {
        format!(
            "{}-{} of {len}",
            self.start.unwrap_or(1),
            self.end.unwrap_or(len)
        )
    }
}

/// One position in the flattened pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionEntry<'a> {
    /// Root the record was harvested under.
    pub root: &'a str,
    /// The record itself.
    pub record: &'a FileRecord,
}

/// Records chosen for one root, in selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSelection<'a> {
    /// Root name.
    pub root: &'a str,
    /// Selected records.
    pub records: Vec<&'a FileRecord>,
}

/// Result of [`select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<'a> {
    /// Non-empty groups, in the order roots were supplied.
    pub groups: Vec<RootSelection<'a>>,
    /// Size of the flattened pool before slicing.
    pub pool_size: usize,
}

impl Selection<'_> {
    /// Number of selected records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    /// Returns `true` if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Selected count for `root` (zero when absent).
    #[must_use]
    pub fn count_for(&self, root: &str) -> usize {
        self.groups
            .iter()
            .find(|g| g.root == root)
            .map_or(0, |g| g.records.len())
    }
}

/// Flattens every pool into one deterministic sequence.
#[must_use]
pub fn flatten(harvests: &[Harvest], ordering: Ordering) -> Vec<SelectionEntry<'_>> {
    let mut keyed: Vec<((String, usize, &str), SelectionEntry<'_>)> = harvests
        .iter()
        .enumerate()
        .flat_map(|(position, harvest)| {
            harvest.pool.iter().map(move |record| {
                (
                    (record.title.to_lowercase(), position, record.title.as_str()),
                    SelectionEntry {
                        root: harvest.root.as_str(),
                        record,
                    },
                )
            })
        })
        .collect();

    match ordering {
        Ordering::Title => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
        Ordering::RootThenTitle => keyed.sort_by(|a, b| {
            (a.0.1, &a.0.0, a.0.2).cmp(&(b.0.1, &b.0.0, b.0.2))
        }),
    }
    keyed.into_iter().map(|(_, entry)| entry).collect()
}

/// Orders all pools, keeps `range`, and regroups by root.
#[must_use]
pub fn select(harvests: &[Harvest], ordering: Ordering, range: SliceRange) -> Selection<'_> {
    let flat = flatten(harvests, ordering);
    let pool_size = flat.len();

    let mut groups: Vec<RootSelection<'_>> = harvests
        .iter()
        .map(|h| RootSelection {
            root: h.root.as_str(),
            records: Vec::new(),
        })
        .collect();
    for entry in range.apply(&flat) {
        if let Some(group) = groups.iter_mut().find(|g| g.root == entry.root) {
            group.records.push(entry.record);
        }
    }
    groups.retain(|g| !g.records.is_empty());

    Selection { groups, pool_size }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traverse::{FilePool, Origin};

    fn harvest(root: &str, titles: &[&str]) -> Harvest {
        let mut pool = FilePool::new();
        for title in titles {
            pool.insert(FileRecord::new(*title, Origin::Category(root.into()), vec![]));
        }
        Harvest {
            root: root.into(),
            pool,
            raw_counts: Default::default(),
        }
    }

    fn flat_titles(harvests: &[Harvest], ordering: Ordering) -> Vec<String> {
        flatten(harvests, ordering)
            .iter()
            .map(|e| format!("{}:{}", e.root, e.record.title))
            .collect()
    }

    fn selected(selection: &Selection<'_>) -> Vec<String> {
        selection
            .groups
            .iter()
            .flat_map(|g| g.records.iter().map(move |r| format!("{}:{}", g.root, r.title)))
            .collect()
    }

    #[test]
    fn title_order_is_case_insensitive() {
        let h = [harvest("R", &["Zebra", "apple", "Mango"])];
        assert_eq!(flat_titles(&h, Ordering::Title), ["R:apple", "R:Mango", "R:Zebra"]);
    }

    #[test]
    fn root_then_title_keeps_root_order() {
        let h = [harvest("R1", &["b", "a"]), harvest("R2", &["c"])];
        assert_eq!(flat_titles(&h, Ordering::RootThenTitle), ["R1:a", "R1:b", "R2:c"]);

        let selection = select(&h, Ordering::RootThenTitle, SliceRange::new(Some(2), Some(3)));
        assert_eq!(selected(&selection), ["R1:b", "R2:c"]);
        assert_eq!(selection.pool_size, 3);
        assert_eq!(selection.count_for("R1"), 1);
    }

    #[test]
    fn roots_not_resorted() {
        let h = [harvest("Zeta", &["x"]), harvest("alpha", &["y"])];
        assert_eq!(flat_titles(&h, Ordering::RootThenTitle), ["Zeta:x", "alpha:y"]);
        assert_eq!(flat_titles(&h, Ordering::Title), ["Zeta:x", "alpha:y"]);
    }

    #[test]
    fn identical_titles_break_ties_by_root_position() {
        let h = [harvest("Second", &["File:same.jpg"]), harvest("First", &["File:same.jpg"])];
        assert_eq!(
            flat_titles(&h, Ordering::Title),
            ["Second:File:same.jpg", "First:File:same.jpg"]
        );
        let h = [harvest("R", &["File:a.jpg", "File:A.jpg"])];
        assert_eq!(flat_titles(&h, Ordering::Title), ["R:File:A.jpg", "R:File:a.jpg"]);
    }

    #[test]
    fn slice_boundaries() {
        let h = [harvest("R", &["a", "b", "c", "d"])];
        let p = 4;
        assert_eq!(select(&h, Ordering::Title, SliceRange::default()).len(), p);
        assert_eq!(select(&h, Ordering::Title, SliceRange::new(Some(1), None)).len(), p);
        assert!(select(&h, Ordering::Title, SliceRange::new(Some(p + 1), None)).is_empty());
        assert!(select(&h, Ordering::Title, SliceRange::new(Some(p + 1), Some(p + 9))).is_empty());
        let one = select(&h, Ordering::Title, SliceRange::new(Some(2), Some(2)));
        assert_eq!(selected(&one), ["R:b"]);
        assert_eq!(select(&h, Ordering::Title, SliceRange::new(None, Some(99))).len(), p);
    }

    #[test]
    fn range_validation() {
        assert!(SliceRange::new(Some(3), Some(2)).validate("global range").is_err());
        assert!(SliceRange::new(Some(0), None).validate("global range").is_err());
        assert!(SliceRange::new(Some(2), Some(2)).validate("global range").is_ok());
        assert!(SliceRange::default().validate("global range").is_ok());
        let Err(Error::Config(msg)) = SliceRange::new(Some(5), Some(1)).validate("root range")
        else {
            panic!("expected config error");
        };
        assert!(msg.contains("root range"));
    }

    #[test]
    fn describe_range() {
        assert_eq!(SliceRange::new(Some(2), None).describe(10), "2-10 of 10");
        assert_eq!(SliceRange::default().describe(0), "1-0 of 0");
    }

    #[test]
    fn ordering_deserializes_both_spellings() {
        #[derive(Deserialize)]
        struct Wrap {
            order: Ordering,
        }
        let a: Wrap = toml::from_str("order = \"root-then-title\"").unwrap();
        let b: Wrap = toml::from_str("order = \"root_then_title\"").unwrap();
        let c: Wrap = toml::from_str("order = \"title\"").unwrap();
        assert_eq!(a.order, Ordering::RootThenTitle);
        assert_eq!(b.order, Ordering::RootThenTitle);
        assert_eq!(c.order, Ordering::Title);
        assert!(toml::from_str::<Wrap>("order = \"random\"").is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn selection_is_idempotent(
                a in prop::collection::vec("[a-zA-Z]{1,4}", 0..8),
                b in prop::collection::vec("[a-zA-Z]{1,4}", 0..8),
                title_order in any::<bool>(),
                start in prop::option::of(1usize..12),
                len in prop::option::of(0usize..12),
            ) {
                let a: Vec<&str> = a.iter().map(String::as_str).collect();
                let b: Vec<&str> = b.iter().map(String::as_str).collect();
                let h = [harvest("R1", &a), harvest("R2", &b)];
                let ordering = if title_order { Ordering::Title } else { Ordering::RootThenTitle };
                let end = len.map(|l| start.unwrap_or(1) + l);
                let range = SliceRange::new(start, end);

                let first = select(&h, ordering, range);
                let second = select(&h, ordering, range);
                prop_assert_eq!(selected(&first), selected(&second));
                prop_assert_eq!(first.pool_size, h[0].pool.len() + h[1].pool.len());
                prop_assert_eq!(first.len(), range.indices(first.pool_size).len());
            }
        }
    }
}
