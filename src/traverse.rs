//! Breadth-first category harvesting and the deduplicated file pool.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::catalog::{MemberKind, MemberSource};
use crate::error::Result;
use crate::url::{CATEGORY_PREFIX, FILE_PREFIX};

/// Where a record was first found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A category, by name without prefix.
    Category(String),
    /// A row of a list file, carrying its source label.
    List(String),
}

impl Origin {
    /// Label written to the log's source column.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Category(name) => format!("{CATEGORY_PREFIX}{name}"),
            Self::List(tag) => tag.clone(),
        }
    }
}

/// A file to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Canonical `File:` title; the dedup key.
    pub title: String,
    /// Numeric identifier, when known.
    pub numeric_id: Option<String>,
    /// First node whose listing contained the title.
    pub origin: Origin,
    /// Subcategory chain below the root at first encounter.
    pub path_segments: Vec<String>,
    /// Lowercased extension with its dot, empty when none.
    pub extension: String,
    /// Direct-asset URL, when already resolved.
    pub asset_url: Option<String>,
    /// Insertion position in the owning pool.
    pub discovery: usize,
}

impl FileRecord {
    /// Creates a record; `discovery` is assigned on pool insertion.
    #[must_use]
    pub fn new(title: impl Into<String>, origin: Origin, path_segments: Vec<String>) -> Self {
        let title = title.into();
        let extension = extension_of(&title);
        Self {
            title,
            numeric_id: None,
            origin,
            path_segments,
            extension,
            asset_url: None,
            discovery: 0,
        }
    }

    /// Sets the numeric identifier (ignored when empty).
    #[must_use]
    pub fn with_numeric_id(mut self, id: Option<String>) -> Self {
        self.numeric_id = id.filter(|id| !id.is_empty());
        self
    }

    /// Sets the asset URL (ignored when empty).
    #[must_use]
    pub fn with_asset_url(mut self, url: Option<String>) -> Self {
        self.asset_url = url.filter(|u| !u.is_empty());
        self
    }

    /// File name without the `File:` prefix.
    #[must_use]
    pub fn file_name(&self) -> &str {
        crate::url::file_name_of(&self.title)
    }
}

/// Lowercased extension (with dot) of the last path-free segment of `title`.
#[must_use]
pub fn extension_of(title: &str) -> String {
    let name = crate::url::file_name_of(title);
    name.rfind('.')
        .filter(|&idx| idx > 0)
        .map(|idx| name[idx..].to_lowercase())
        .unwrap_or_default()
}

/// Normalizes an extension allow-list to lowercase, dot-prefixed entries.
#[must_use]
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
        .collect()
}

/// Returns `true` if `title` passes the (normalized) allow-list. An empty
/// list admits everything.
#[must_use]
pub fn passes_filter(title: &str, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let name = crate::url::file_name_of(title).to_lowercase();
    extensions.iter().any(|ext| name.ends_with(ext.as_str()))
}

/// Ordered set of records keyed by title.
///
/// The first insertion of a title wins; later insertions of the same title
/// are no-ops. Iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePool {
    records: Vec<FileRecord>,
    index: HashMap<String, usize>,
}

impl FilePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record` unless its title is already present. Returns whether
    /// it was inserted.
    pub fn insert(&mut self, mut record: FileRecord) -> bool {
        if self.index.contains_key(&record.title) {
            return false;
        }
        record.discovery = self.records.len();
        self.index.insert(record.title.clone(), record.discovery);
        self.records.push(record);
        true
    }

    /// Returns `true` if `title` is in the pool.
    #[must_use]
    pub fn contains(&self, title: &str) -> bool {
        self.index.contains_key(title)
    }

    /// Looks up a record by title.
    #[must_use]
    pub fn get(&self, title: &str) -> Option<&FileRecord> {
        self.index.get(title).map(|&i| &self.records[i])
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the pool holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in discovery order.
    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }

    /// Number of records per stored path.
    #[must_use]
    pub fn counts_by_path(&self) -> BTreeMap<Vec<String>, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.path_segments.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl<'a> IntoIterator for &'a FilePool {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Direct member counts per path, without deduplication.
pub type RawCounts = BTreeMap<Vec<String>, usize>;

/// Output of one root's traversal.
#[derive(Debug, Clone, Default)]
pub struct Harvest {
    /// Root category name.
    pub root: String,
    /// Deduplicated, filtered files.
    pub pool: FilePool,
    /// What the catalog listed at each visited node.
    pub raw_counts: RawCounts,
}

/// Catalog names treat spaces and underscores alike.
fn node_key(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Walks `root` breadth-first down to `max_depth` subcategory levels.
///
/// `extensions` must already be normalized (see [`normalize_extensions`]).
///
/// # Errors
///
/// Propagates the first listing error.
pub fn traverse(
    source: &dyn MemberSource,
    root: &str,
    max_depth: usize,
    extensions: &[String],
) -> Result<Harvest> {
    let mut visited: HashSet<String> = HashSet::from([node_key(root)]);
    let mut queue: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
    queue.push_back((root.to_string(), 0, Vec::new()));

    let mut pool = FilePool::new();
    let mut raw_counts = RawCounts::new();

    while let Some((node, depth, path)) = queue.pop_front() {
        let files = source.list_all(&node, MemberKind::File)?;
        *raw_counts.entry(path.clone()).or_insert(0) += files.len();
        log::debug!("{node} (depth {depth}): {} member(s)", files.len());

        for member in files {
            if !member.title.starts_with(FILE_PREFIX) || !passes_filter(&member.title, extensions)
            {
                continue;
            }
            if pool.contains(&member.title) {
                continue;
            }
            let id = member.numeric_id();
            pool.insert(
                FileRecord::new(member.title, Origin::Category(node.clone()), path.clone())
                    .with_numeric_id(id),
            );
        }

        if depth < max_depth {
            for member in source.list_all(&node, MemberKind::Subcategory)? {
                let Some(name) = member.title.strip_prefix(CATEGORY_PREFIX) else {
                    continue;
                };
                if !visited.insert(node_key(name)) {
                    continue;
                }
                let mut child_path = path.clone();
                child_path.push(name.to_string());
                queue.push_back((name.to_string(), depth + 1, child_path));
            }
        }
    }

    log::info!(
        "Category:{root}: {} unique file(s) across {} node(s)",
        pool.len(),
        raw_counts.len()
    );

    Ok(Harvest {
        root: root.to_string(),
        pool,
        raw_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::FakeCatalog;

    fn titles(pool: &FilePool) -> Vec<&str> {
        pool.iter().map(|r| r.title.as_str()).collect()
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(ToString::to_string).collect()
    }

    fn scenario() -> FakeCatalog {
        FakeCatalog::new()
            .files("Root", &["File:A.jpg", "File:B.jpg"])
            .subcategories("Root", &["Sub"])
            .files("Sub", &["File:B.jpg", "File:C.png"])
    }

    #[test]
    fn root_and_sub_with_extension_filter() {
        let catalog = scenario();
        let harvest = traverse(&catalog, "Root", 1, &[".jpg".to_string()]).unwrap();

        assert_eq!(titles(&harvest.pool), ["File:A.jpg", "File:B.jpg"]);
        for record in &harvest.pool {
            assert_eq!(record.origin, Origin::Category("Root".into()));
            assert!(record.path_segments.is_empty());
        }
        let expected: RawCounts = [(path(&[]), 2), (path(&["Sub"]), 2)].into();
        assert_eq!(harvest.raw_counts, expected);
        assert!(!harvest.pool.counts_by_path().contains_key(&path(&["Sub"])));
    }

    #[test]
    fn depth_zero_lists_only_root_files() {
        let catalog = scenario();
        let harvest = traverse(&catalog, "Root", 0, &[]).unwrap();
        assert_eq!(titles(&harvest.pool), ["File:A.jpg", "File:B.jpg"]);
        assert_eq!(harvest.raw_counts.len(), 1);
        // one file listing, no subcategory listing
        assert_eq!(catalog.list_calls.get(), 1);
    }

    #[test]
    fn empty_filter_admits_all_extensions() {
        let harvest = traverse(&scenario(), "Root", 1, &[]).unwrap();
        assert_eq!(titles(&harvest.pool), ["File:A.jpg", "File:B.jpg", "File:C.png"]);
        assert_eq!(harvest.pool.get("File:C.png").unwrap().path_segments, path(&["Sub"]));
        assert_eq!(
            harvest.pool.get("File:C.png").unwrap().origin,
            Origin::Category("Sub".into())
        );
    }

    #[test]
    fn cross_links_collapse_to_first_discovery() {
        // Root -> X, Root -> Y, X -> Z, Y -> Z
        let catalog = FakeCatalog::new()
            .subcategories("Root", &["X", "Y"])
            .subcategories("X", &["Z"])
            .subcategories("Y", &["Z", "Root"])
            .files("Z", &["File:z.jpg"])
            .files("Y", &["File:z.jpg"]);
        let harvest = traverse(&catalog, "Root", 3, &[]).unwrap();
        assert_eq!(harvest.pool.len(), 1);
        // Y is visited before Z, so the first hit is under Y
        assert_eq!(harvest.pool.get("File:z.jpg").unwrap().path_segments, path(&["Y"]));
        assert!(harvest.raw_counts.contains_key(&path(&["X", "Z"])));
        assert!(!harvest.raw_counts.contains_key(&path(&["Y", "Z"])));
        assert_eq!(harvest.raw_counts[&path(&["X", "Z"])], 1);
    }

    #[test]
    fn cycle_back_to_root_spelled_with_spaces_is_cut() {
        let catalog = FakeCatalog::new()
            .with_page_size(10)
            .files("Foo_Bar", &["File:a.jpg"])
            .subcategories("Foo_Bar", &["Sub"])
            .subcategories("Sub", &["Foo Bar", "Other_Leaf", "Other Leaf"]);
        let harvest = traverse(&catalog, "Foo_Bar", 3, &[]).unwrap();
        assert_eq!(titles(&harvest.pool), ["File:a.jpg"]);
        assert!(!harvest.raw_counts.contains_key(&path(&["Sub", "Foo Bar"])));
        // Foo_Bar, Sub and Other_Leaf: one file and one subcategory listing each
        assert_eq!(catalog.list_calls.get(), 6);
        assert_eq!(harvest.raw_counts.len(), 3);
    }

    #[test]
    fn non_file_members_counted_but_not_pooled() {
        let catalog = FakeCatalog::new().files("Root", &["File:a.jpg", "Gallery:Thing"]);
        let harvest = traverse(&catalog, "Root", 0, &[]).unwrap();
        assert_eq!(harvest.pool.len(), 1);
        assert_eq!(harvest.raw_counts[&path(&[])], 2);
    }

    #[test]
    fn paged_listings_are_exhausted() {
        let names: Vec<String> = (0..7).map(|i| format!("File:{i}.jpg")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let catalog = FakeCatalog::new().with_page_size(3).files("Root", &refs);
        let harvest = traverse(&catalog, "Root", 0, &[]).unwrap();
        assert_eq!(harvest.pool.len(), 7);
    }

    #[test]
    fn pool_first_insertion_wins() {
        let mut pool = FilePool::new();
        assert!(pool.insert(FileRecord::new("File:a.jpg", Origin::Category("R".into()), vec![])));
        assert!(!pool.insert(FileRecord::new(
            "File:a.jpg",
            Origin::Category("S".into()),
            path(&["S"])
        )));
        assert!(pool.insert(FileRecord::new("File:b.jpg", Origin::Category("R".into()), vec![])));
        assert_eq!(pool.get("File:a.jpg").unwrap().origin, Origin::Category("R".into()));
        assert_eq!(pool.get("File:b.jpg").unwrap().discovery, 1);
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(extension_of("File:Photo.JPG"), ".jpg");
        assert_eq!(extension_of("File:noext"), "");
        assert_eq!(extension_of("File:.hidden"), "");
        assert_eq!(normalize_extensions(&["JPG".into(), " .png ".into(), String::new()]), [".jpg", ".png"]);
        assert!(passes_filter("File:x.JPG", &[".jpg".into()]));
        assert!(!passes_filter("File:x.jpeg", &[".jpg".into()]));
    }

    #[test]
    fn origin_labels() {
        assert_eq!(Origin::Category("Maps".into()).label(), "Category:Maps");
        assert_eq!(Origin::List("Manual list".into()).label(), "Manual list");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn unique_never_exceeds_raw(
                root_files in prop::collection::vec(0u8..8, 0..6),
                a_files in prop::collection::vec(0u8..8, 0..6),
                b_files in prop::collection::vec(0u8..8, 0..6),
                filter_jpg in any::<bool>(),
            ) {
                let name = |i: &u8| {
                    let ext = if i % 2 == 0 { "jpg" } else { "png" };
                    format!("File:f{i}.{ext}")
                };
                let r: Vec<String> = root_files.iter().map(name).collect();
                let a: Vec<String> = a_files.iter().map(name).collect();
                let b: Vec<String> = b_files.iter().map(name).collect();
                fn as_refs(v: &[String]) -> Vec<&str> {
                    v.iter().map(String::as_str).collect()
                }
                let catalog = FakeCatalog::new()
                    .files("Root", &as_refs(&r))
                    .files("A", &as_refs(&a))
                    .files("B", &as_refs(&b))
                    .subcategories("Root", &["A", "B"])
                    .subcategories("A", &["B"]);
                let filter = if filter_jpg { vec![".jpg".to_string()] } else { vec![] };
                let harvest = traverse(&catalog, "Root", 2, &filter).unwrap();

                let unique = harvest.pool.counts_by_path();
                for (path, count) in &unique {
                    prop_assert!(*count <= harvest.raw_counts.get(path).copied().unwrap_or(0));
                }

                let mut distinct: HashSet<&String> = HashSet::new();
                for t in r.iter().chain(&a).chain(&b) {
                    if passes_filter(t, &filter) {
                        distinct.insert(t);
                    }
                }
                prop_assert_eq!(harvest.pool.len(), distinct.len());
                for record in &harvest.pool {
                    prop_assert!(passes_filter(&record.title, &filter));
                }
            }
        }
    }
}
