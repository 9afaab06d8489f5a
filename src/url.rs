//! Classification of user-supplied file references and catalog URL helpers.
//!
//! Everything here is string work; no network access.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use reqwest::Url;

/// Host serving human-facing catalog pages.
pub const CATALOG_HOST: &str = "commons.wikimedia.org";

/// Host serving raw asset bytes.
pub const ASSET_HOST: &str = "upload.wikimedia.org";

/// Title prefix for file pages.
pub const FILE_PREFIX: &str = "File:";

/// Title prefix for category pages.
pub const CATEGORY_PREFIX: &str = "Category:";

static NUMERIC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/|=)(M\d+)(?:$|[^0-9])").expect("valid regex"));

/// Characters left unescaped in `Special:FilePath` URLs.
const FILE_PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/')
    .remove(b':');

/// What a raw input string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// An opaque numeric ID such as `M12345`, bare or embedded in a URL.
    NumericId(String),
    /// A direct asset URL, already canonicalized away from any thumbnail.
    AssetUrl {
        /// Original-asset URL.
        url: String,
        /// `File:` title derived from the last path segment.
        title: String,
    },
    /// A catalog page URL naming a file title.
    PageUrl(String),
    /// A bare title, normalized to carry the `File:` prefix.
    Title(String),
    /// A URL that names nothing we can look up.
    Unrecognized,
}

/// Classifies `input` in priority order: numeric ID, asset URL, page URL,
/// bare title.
#[must_use]
pub fn classify(input: &str) -> InputKind {
    let input = input.trim();
    if input.is_empty() {
        return InputKind::Unrecognized;
    }
    if let Some(id) = extract_numeric_id(input) {
        return InputKind::NumericId(id);
    }
    if is_http(input) {
        if is_asset_url(input) {
            let url = canonicalize_asset_url(input);
            let title = format!("{FILE_PREFIX}{}", filename_from_url(&url));
            return InputKind::AssetUrl { url, title };
        }
        return title_from_page_url(input).map_or(InputKind::Unrecognized, InputKind::PageUrl);
    }
    InputKind::Title(normalize_title(input))
}

fn is_http(s: &str) -> bool {
    s.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("http"))
}

fn host_contains(url: &str, needle: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| host.contains(needle))
}

/// Adds the `File:` prefix when missing; a case-insensitive `file:` prefix
/// is rewritten to the canonical spelling.
#[must_use]
pub fn normalize_title(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    match s.get(..FILE_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(FILE_PREFIX) => {
            format!("{FILE_PREFIX}{}", s[FILE_PREFIX.len()..].trim())
        }
        _ => format!("{FILE_PREFIX}{s}"),
    }
}

/// Strips the `File:` prefix, if present.
#[must_use]
pub fn file_name_of(title: &str) -> &str {
    title.strip_prefix(FILE_PREFIX).unwrap_or(title)
}

/// Finds an `M<digits>` identifier appearing as a whole path segment or
/// query value.
#[must_use]
pub fn extract_numeric_id(s: &str) -> Option<String> {
    NUMERIC_ID_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Returns `true` if `url` points at the asset host.
#[must_use]
pub fn is_asset_url(url: &str) -> bool {
    host_contains(url, ASSET_HOST)
}

/// Converts a thumbnail URL (`…/thumb/a/ab/Name.jpg/320px-Name.jpg`) to the
/// original asset URL (`…/a/ab/Name.jpg`). Other URLs are returned as-is.
#[must_use]
pub fn canonicalize_asset_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let segments: Vec<&str> = parsed.path().split('/').collect();
    let Some(thumb_idx) = segments.iter().position(|s| *s == "thumb") else {
        return url.to_string();
    };
    let mut kept: Vec<&str> = segments[..thumb_idx].to_vec();
    kept.extend_from_slice(&segments[thumb_idx + 1..]);
    kept.pop();
    let host = parsed.host_str().unwrap_or_default();
    format!("{}://{host}{}", parsed.scheme(), kept.join("/"))
}

/// Decoded last path segment of `url`.
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    let path = Url::parse(url).map_or_else(|_| url.to_string(), |u| u.path().to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    percent_decode_str(last).decode_utf8_lossy().into_owned()
}

/// Extracts a `File:` title from a catalog page URL.
///
/// Understands `/wiki/File:Name`, `index.php?title=File:Name`,
/// `/wiki/Special:FilePath/Name` and `/wiki/Special:Redirect/file/Name`.
#[must_use]
pub fn title_from_page_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !parsed
        .host_str()
        .is_some_and(|h| h.to_ascii_lowercase().contains(CATALOG_HOST))
    {
        return None;
    }
    let from_path = parsed.path_segments().and_then(|segments| {
        let segments: Vec<String> = segments
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        let wiki = segments.iter().position(|s| s.eq_ignore_ascii_case("wiki"))?;
        match &segments[wiki + 1..] {
            [special, name, ..] if special == "Special:FilePath" => {
                Some(format!("{FILE_PREFIX}{}", name.trim()))
            }
            [special, kind, name, ..] if special == "Special:Redirect" && kind == "file" => {
                Some(format!("{FILE_PREFIX}{}", name.trim()))
            }
            [title, ..] => Some(title.clone()),
            [] => None,
        }
    });
    let from_query = || {
        parsed
            .query_pairs()
            .find(|(k, _)| k == "title")
            .map(|(_, v)| v.into_owned())
    };
    from_path
        .filter(|t| has_file_prefix(t))
        .or_else(|| from_query().filter(|t| has_file_prefix(t)))
        .map(|t| normalize_title(&t))
        .filter(|t| t.len() > FILE_PREFIX.len())
}

fn has_file_prefix(title: &str) -> bool {
    title
        .get(..FILE_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(FILE_PREFIX))
}

/// Human-facing page URL for a title.
#[must_use]
pub fn page_url(title: &str) -> String {
    format!("https://{CATALOG_HOST}/wiki/{title}")
}

/// Entity URI for a numeric ID, or empty when there is none.
#[must_use]
pub fn concept_uri(id: &str) -> String {
    if id.is_empty() {
        String::new()
    } else {
        format!("https://{CATALOG_HOST}/entity/{id}")
    }
}

/// Human-facing entity page for a numeric ID.
#[must_use]
pub fn entity_page_url(id: &str) -> String {
    format!("https://{CATALOG_HOST}/wiki/Special:EntityPage/{id}")
}

/// `Special:FilePath` URL that redirects to the asset bytes for `file_name`.
#[must_use]
pub fn file_path_url(file_name: &str) -> String {
    format!(
        "https://{CATALOG_HOST}/wiki/Special:FilePath/{}",
        utf8_percent_encode(file_name, FILE_PATH_SET)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- classify ---

    #[test]
    fn classify_bare_numeric_id() {
        assert_eq!(classify("M12345"), InputKind::NumericId("M12345".into()));
    }

    #[test]
    fn classify_entity_urls() {
        assert_eq!(
            classify("https://commons.wikimedia.org/entity/M77"),
            InputKind::NumericId("M77".into())
        );
        assert_eq!(
            classify("https://commons.wikimedia.org/wiki/Special:EntityData/M77.json"),
            InputKind::NumericId("M77".into())
        );
    }

    #[test]
    fn classify_thumbnail_url() {
        let thumb = "https://upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Some_photo.jpg/320px-Some_photo.jpg";
        assert_eq!(
            classify(thumb),
            InputKind::AssetUrl {
                url: "https://upload.wikimedia.org/wikipedia/commons/a/ab/Some_photo.jpg".into(),
                title: "File:Some_photo.jpg".into(),
            }
        );
    }

    #[test]
    fn classify_page_url() {
        assert_eq!(
            classify("https://commons.wikimedia.org/wiki/File:Old_map%20(1700).png"),
            InputKind::PageUrl("File:Old_map (1700).png".into())
        );
    }

    #[test]
    fn classify_query_title_url() {
        assert_eq!(
            classify("https://commons.wikimedia.org/w/index.php?title=File:Boat.jpg&oldid=1"),
            InputKind::PageUrl("File:Boat.jpg".into())
        );
    }

    #[test]
    fn special_page_urls_name_files() {
        assert_eq!(
            title_from_page_url("https://commons.wikimedia.org/wiki/Special:FilePath/Boat%20trip.jpg"),
            Some("File:Boat trip.jpg".into())
        );
        assert_eq!(
            title_from_page_url("https://commons.wikimedia.org/wiki/Special:Redirect/file/Boat.jpg?width=200"),
            Some("File:Boat.jpg".into())
        );
        assert_eq!(
            title_from_page_url("https://commons.wikimedia.org/wiki/file:Boat.jpg"),
            Some("File:Boat.jpg".into())
        );
        assert_eq!(title_from_page_url("https://commons.wikimedia.org/wiki/Special:FilePath/"), None);
        assert_eq!(title_from_page_url("https://commons.wikimedia.org/wiki/Special:Redirect/page/1"), None);
    }

    #[test]
    fn classify_bare_titles() {
        assert_eq!(classify("Boat.jpg"), InputKind::Title("File:Boat.jpg".into()));
        assert_eq!(classify("file: Boat.jpg"), InputKind::Title("File:Boat.jpg".into()));
    }

    #[test]
    fn classify_foreign_url_is_unrecognized() {
        assert_eq!(classify("https://example.com/Boat.jpg"), InputKind::Unrecognized);
        assert_eq!(
            classify("https://commons.wikimedia.org/wiki/Category:Boats"),
            InputKind::Unrecognized
        );
        assert_eq!(classify("   "), InputKind::Unrecognized);
    }

    // --- numeric ids ---

    #[test]
    fn numeric_id_must_be_whole_segment() {
        assert_eq!(extract_numeric_id("FileM123.jpg"), None);
        assert_eq!(extract_numeric_id("x?id=M5&y=1"), Some("M5".into()));
        assert_eq!(extract_numeric_id("M12a"), Some("M12".into()));
        assert_eq!(extract_numeric_id("Mountain.jpg"), None);
    }

    // --- asset urls ---

    #[test]
    fn canonicalize_leaves_originals_alone() {
        let url = "https://upload.wikimedia.org/wikipedia/commons/a/ab/X.jpg";
        assert_eq!(canonicalize_asset_url(url), url);
    }

    #[test]
    fn filename_is_decoded() {
        assert_eq!(
            filename_from_url("https://upload.wikimedia.org/x/a/ab/Caf%C3%A9.jpg"),
            "Café.jpg"
        );
    }

    #[test]
    fn asset_host_detection() {
        assert!(is_asset_url("https://upload.wikimedia.org/a.jpg"));
        assert!(!is_asset_url("https://commons.wikimedia.org/wiki/File:a.jpg"));
        assert!(!is_asset_url("not a url"));
    }

    // --- builders ---

    #[test]
    fn file_path_url_escapes_name() {
        assert_eq!(
            file_path_url("A b&c.jpg"),
            "https://commons.wikimedia.org/wiki/Special:FilePath/A%20b%26c.jpg"
        );
    }

    #[test]
    fn entity_page_for_id() {
        assert_eq!(
            entity_page_url("M42"),
            "https://commons.wikimedia.org/wiki/Special:EntityPage/M42"
        );
    }

    #[test]
    fn concept_uri_empty_without_id() {
        assert_eq!(concept_uri(""), "");
        assert_eq!(concept_uri("M1"), "https://commons.wikimedia.org/entity/M1");
    }

    #[test]
    fn file_name_strips_prefix() {
        assert_eq!(file_name_of("File:A.jpg"), "A.jpg");
        assert_eq!(file_name_of("A.jpg"), "A.jpg");
    }
}
