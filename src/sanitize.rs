//! Filesystem-safe names for downloaded files and their folders.
//!
//! Every local path component produced by the crate passes through this
//! module. Names are made legal on Windows (the strictest common target),
//! bounded in length, and always carry an identity suffix so that the same
//! remote asset maps to the same local name on every run.

use std::fmt::Write as _;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Default cap on a single folder segment.
pub const DEFAULT_COMPONENT_LEN: usize = 80;

/// Default cap on a file name before the suffix is attached.
pub const DEFAULT_NAME_LEN: usize = 120;

/// Default budget for the absolute path of a stored file.
pub const DEFAULT_FULL_PATH_BUDGET: usize = 250;

/// Marker used in place of an identity when none is known.
pub const NO_IDENTITY_MARKER: &str = "NO-MID";

const INVALID_CHARS: [char; 14] = [
    '"', '#', '%', '&', '{', '}', '\\', '<', '>', '|', ':', '*', '?', '/',
];

const RESERVED_STEMS: [&str; 22] = [
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Returns the first `n` hex characters of the SHA-256 digest of `text`.
///
/// `n` is clamped to the 64 characters a digest can provide.
#[must_use]
pub fn short_hash(text: &str, n: usize) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(n.min(64));
    hex
}

/// Replaces illegal characters and strips trailing dots and spaces.
fn replace_illegal(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    replaced.trim_end_matches([' ', '.']).to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Splits `name` into stem and extension (extension keeps its leading dot).
///
/// A name made of a leading run of dots followed by text (".hidden") has no
/// extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => name.split_at(idx),
        _ => (name, ""),
    }
}

fn is_reserved_stem(stem: &str) -> bool {
    let bare = stem.trim_matches(['.', ' ']).to_lowercase();
    RESERVED_STEMS.contains(&bare.as_str())
}

/// Sanitizes a single folder segment.
///
/// Names longer than `max_len` characters are cut and tagged with a short
/// hash of the full sanitized name, so distinct long names stay distinct.
/// Never returns an empty string.
#[must_use]
pub fn sanitize_component(name: &str, max_len: usize) -> String {
    let cleaned = replace_illegal(name);
    let cleaned = if char_len(&cleaned) > max_len {
        let keep = max_len.saturating_sub(10);
        format!("{}__{}", take_chars(&cleaned, keep), short_hash(&cleaned, 8))
    } else {
        cleaned
    };
    if cleaned.is_empty() {
        "NA".to_string()
    } else {
        cleaned
    }
}

/// The suffix attached before the extension of every stored file.
///
/// `--<identity>` when an identity is known, otherwise
/// `--NO-MID-<hash of raw name>`.
#[must_use]
pub fn identity_suffix(raw_name: &str, identity: Option<&str>) -> String {
    match identity.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("--{id}"),
        None => format!("--{NO_IDENTITY_MARKER}-{}", short_hash(raw_name, 8)),
    }
}

/// Produces a safe file name for `raw_name`.
///
/// The stem is trimmed first against `max_len` and then, when `folder` is
/// given, against `full_path_budget` measured on the absolute path of
/// `folder`. Suffix and extension are never trimmed; under extreme budget
/// pressure the stem degrades to a single character.
#[must_use]
pub fn sanitize_filename(
    raw_name: &str,
    folder: Option<&Path>,
    max_len: usize,
    full_path_budget: usize,
    identity: Option<&str>,
) -> String {
    let cleaned = replace_illegal(raw_name);
    let (stem, ext) = split_extension(&cleaned);
    let mut stem = stem.to_string();

    if char_len(&cleaned) > max_len {
        let room = max_len.saturating_sub(char_len(ext)).max(1);
        stem = take_chars(&stem, room);
    }

    if is_reserved_stem(&stem) {
        stem.push('_');
    }

    let suffix = identity_suffix(raw_name, identity);
    let fixed = char_len(&suffix) + char_len(ext);

    let available = folder.map_or(max_len, |dir| {
        let abs = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        let dir_len = char_len(&abs.to_string_lossy());
        full_path_budget
            .saturating_sub(dir_len + 1)
            .max(fixed + 1)
    });

    if char_len(&stem) + fixed > available {
        let room = available.saturating_sub(fixed).max(1);
        stem = take_chars(&stem, room);
    }

    format!("{stem}{suffix}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn abs_len(dir: &Path) -> usize {
        std::path::absolute(dir)
            .unwrap()
            .to_string_lossy()
            .chars()
            .count()
    }

    #[test]
    fn illegal_characters_replaced() {
        let name = sanitize_filename("a:b*c?.jpg", None, 120, 250, Some("M1"));
        assert_eq!(name, "a_b_c_--M1.jpg");
    }

    #[test]
    fn trailing_dots_and_spaces_stripped() {
        assert_eq!(sanitize_component("Folder. . ", 80), "Folder");
        assert_eq!(sanitize_filename("photo. ", None, 120, 250, Some("M7")), "photo--M7");
    }

    #[test]
    fn empty_component_becomes_na() {
        assert_eq!(sanitize_component("...", 80), "NA");
        assert_eq!(sanitize_component("", 80), "NA");
    }

    #[test]
    fn long_component_shortened_with_hash() {
        let long = "x".repeat(200);
        let short = sanitize_component(&long, 80);
        assert_eq!(short.chars().count(), 80);
        assert!(short.starts_with(&"x".repeat(70)));
        assert!(short[70..].starts_with("__"));
    }

    #[test]
    fn distinct_long_components_stay_distinct() {
        let a = format!("{}A", "y".repeat(150));
        let b = format!("{}B", "y".repeat(150));
        assert_ne!(sanitize_component(&a, 80), sanitize_component(&b, 80));
    }

    #[test]
    fn identity_suffix_used_when_known() {
        assert_eq!(
            sanitize_filename("Example.jpg", None, 120, 250, Some("M12345")),
            "Example--M12345.jpg"
        );
    }

    #[test]
    fn fallback_suffix_is_hash_of_raw_name() {
        let a = sanitize_filename("Example.jpg", None, 120, 250, None);
        let b = sanitize_filename("Example.jpg", None, 120, 250, Some("  "));
        let c = sanitize_filename("Other.jpg", None, 120, 250, None);
        assert!(a.starts_with("Example--NO-MID-"));
        assert!(a.ends_with(".jpg"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn same_identity_same_name() {
        let first = sanitize_filename("Sunset over sea.png", None, 120, 250, Some("M9"));
        let second = sanitize_filename("Sunset over sea.png", None, 120, 250, Some("M9"));
        assert_eq!(first, second);
    }

    #[test]
    fn reserved_stem_defused() {
        assert_eq!(sanitize_filename("CON.txt", None, 120, 250, Some("M1")), "CON_--M1.txt");
        assert_eq!(sanitize_filename("lpt3.jpg", None, 120, 250, Some("M1")), "lpt3_--M1.jpg");
        assert_eq!(sanitize_filename("console.txt", None, 120, 250, Some("M1")), "console--M1.txt");
    }

    #[test]
    fn per_name_cap_keeps_extension() {
        let raw = format!("{}.jpeg", "a".repeat(300));
        let name = sanitize_filename(&raw, None, 120, 250, Some("M5"));
        assert!(name.ends_with("--M5.jpeg"));
        assert!(name.chars().count() <= 120);
    }

    #[test]
    fn full_path_budget_respected() {
        let dir = TempDir::new().unwrap();
        let raw = format!("{}.tif", "b".repeat(400));
        let budget = abs_len(dir.path()) + 60;
        let name = sanitize_filename(&raw, Some(dir.path()), 120, budget, Some("M42"));
        assert!(abs_len(dir.path()) + 1 + name.chars().count() <= budget);
        assert!(name.ends_with("--M42.tif"));
    }

    #[test]
    fn tiny_budget_degrades_to_one_char_stem() {
        let dir = TempDir::new().unwrap();
        let name = sanitize_filename("Landscape.jpg", Some(dir.path()), 120, 5, Some("M3"));
        assert_eq!(name, "L--M3.jpg");
    }

    #[test]
    fn hidden_style_name_has_no_extension() {
        assert_eq!(split_extension(".profile"), (".profile", ""));
        assert_eq!(split_extension("a.b.c"), ("a.b", ".c"));
        assert_eq!(split_extension("plain"), ("plain", ""));
    }

    #[test]
    fn short_hash_is_stable_hex() {
        let h = short_hash("File:Example.jpg", 8);
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, short_hash("File:Example.jpg", 8));
        assert_eq!(short_hash("x", 100).len(), 64);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn absolute_path_within_budget(
                stem in "[^.\\p{C}]{0,300}",
                ext in prop::sample::select(vec![".jpg", ".png", ".tiff", ".svg", ""]),
                extra in 40usize..200,
                with_id in any::<bool>(),
            ) {
                let dir = TempDir::new().unwrap();
                let budget = abs_len(dir.path()) + extra;
                let raw = format!("{stem}{ext}");
                let id = with_id.then_some("M123456");
                let name = sanitize_filename(&raw, Some(dir.path()), 120, budget, id);
                prop_assert!(abs_len(dir.path()) + 1 + name.chars().count() <= budget);
                let suffix = identity_suffix(&raw, id);
                let replaced = replace_illegal(&raw);
                let (_, final_ext) = split_extension(&replaced);
                let expected_tail = format!("{suffix}{final_ext}");
                prop_assert!(name.ends_with(&expected_tail));
            }

            #[test]
            fn sanitized_names_contain_no_illegal_chars(raw in "\\PC{0,200}") {
                let name = sanitize_filename(&raw, None, 120, 250, None);
                prop_assert!(!name.chars().any(|c| INVALID_CHARS.contains(&c)));
                let component = sanitize_component(&raw, 80);
                prop_assert!(!component.is_empty());
                prop_assert!(component.chars().count() <= 80);
            }
        }
    }
}
