//! Resolution of free-form file references to canonical identities.

use crate::catalog::{Lookup, LookupOutcome};
use crate::error::Result;
use crate::url::{InputKind, classify};

/// Canonical identity of a file reference.
///
/// An empty `title` means the reference could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical `File:` title.
    pub title: String,
    /// Numeric identifier, empty when unknown.
    pub numeric_id: String,
    /// Direct-asset URL, empty when unknown.
    pub asset_url: String,
}

impl Resolved {
    /// Returns `true` if the reference resolved to a title.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !self.title.is_empty()
    }
}

/// Resolves `input` with exactly one lookup call (none for unrecognized
/// input).
///
/// For asset URLs the canonicalized input URL is kept when the lookup does
/// not report one.
///
/// # Errors
///
/// Only run-halting lookup errors propagate. Not-found and transient
/// outcomes yield an unresolved [`Resolved`].
pub fn resolve(lookup: &dyn Lookup, input: &str) -> Result<Resolved> {
    let (outcome, fallback_url) = match classify(input) {
        InputKind::NumericId(id) => (lookup.by_numeric_id(&id)?, String::new()),
        InputKind::AssetUrl { url, title } => (lookup.by_title(&title)?, url),
        InputKind::PageUrl(title) | InputKind::Title(title) => {
            (lookup.by_title(&title)?, String::new())
        }
        InputKind::Unrecognized => {
            log::debug!("Unrecognized reference: {input:?}");
            return Ok(Resolved::default());
        }
    };

    match outcome {
        LookupOutcome::Found(info) => Ok(Resolved {
            title: info.title,
            numeric_id: info.numeric_id,
            asset_url: if info.asset_url.is_empty() {
                fallback_url
            } else {
                info.asset_url
            },
        }),
        LookupOutcome::NotFound => {
            log::debug!("No match for {input:?}");
            Ok(Resolved::default())
        }
        LookupOutcome::TransientError(reason) => {
            log::warn!("Lookup for {input:?} failed: {reason}");
            Ok(Resolved::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::FakeCatalog;

    const URL: &str = "https://upload.wikimedia.org/wikipedia/commons/a/ab/Boat.jpg";

    fn catalog() -> FakeCatalog {
        FakeCatalog::new()
            .asset("File:Boat.jpg", "M10", URL)
            .redirect("File:Old boat.jpg", "File:Boat.jpg")
    }

    fn expected() -> Resolved {
        Resolved {
            title: "File:Boat.jpg".into(),
            numeric_id: "M10".into(),
            asset_url: URL.into(),
        }
    }

    #[test]
    fn resolves_every_input_kind() {
        let inputs = [
            "M10",
            "https://commons.wikimedia.org/entity/M10",
            "https://upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Boat.jpg/120px-Boat.jpg",
            "https://commons.wikimedia.org/wiki/File:Boat.jpg",
            "Boat.jpg",
            "File:Boat.jpg",
        ];
        for input in inputs {
            let c = catalog();
            assert_eq!(resolve(&c, input).unwrap(), expected(), "input {input}");
            assert_eq!(c.lookup_calls.get(), 1, "input {input}");
        }
    }

    #[test]
    fn follows_redirected_titles() {
        let c = catalog();
        assert_eq!(resolve(&c, "Old boat.jpg").unwrap(), expected());
    }

    #[test]
    fn unknown_title_is_unresolved() {
        let c = catalog();
        let resolved = resolve(&c, "Missing.jpg").unwrap();
        assert!(!resolved.is_resolved());
        assert_eq!(c.lookup_calls.get(), 1);
    }

    #[test]
    fn unrecognized_url_makes_no_call() {
        let c = catalog();
        assert!(!resolve(&c, "https://example.org/x.jpg").unwrap().is_resolved());
        assert!(!resolve(&c, "").unwrap().is_resolved());
        assert_eq!(c.lookup_calls.get(), 0);
    }

    #[test]
    fn transient_lookup_is_unresolved_without_retry() {
        let c = catalog().transient_lookup("File:Boat.jpg");
        assert!(!resolve(&c, "Boat.jpg").unwrap().is_resolved());
        assert_eq!(c.lookup_calls.get(), 1);
    }

    #[test]
    fn asset_url_input_kept_when_lookup_has_none() {
        let c = FakeCatalog::new().asset("File:Boat.jpg", "M10", "");
        let resolved = resolve(&c, URL).unwrap();
        assert_eq!(resolved.asset_url, URL);
        assert_eq!(resolved.numeric_id, "M10");
    }
}
