//! Capabilities the harvester needs from the remote catalog.
//!
//! The traversal, resolver and pipeline only see these traits; the real HTTP
//! client lives in [`commons`], in-memory doubles in `testing`.

pub mod commons;

use std::io::Read;

use serde_json::Value;

use crate::error::Result;

pub use commons::CommonsClient;

/// Which members of a category to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Direct file members.
    File,
    /// Direct subcategories.
    Subcategory,
}

impl MemberKind {
    /// Value of the `cmtype` query parameter.
    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Subcategory => "subcat",
        }
    }
}

/// One listed member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Full title, including its namespace prefix.
    pub title: String,
    /// Provider page id, when reported.
    pub page_id: Option<u64>,
}

impl Member {
    /// Creates a member.
    #[must_use]
    pub fn new(title: impl Into<String>, page_id: Option<u64>) -> Self {
        Self {
            title: title.into(),
            page_id,
        }
    }

    /// Numeric identifier derived from the page id (`M<page id>`).
    #[must_use]
    pub fn numeric_id(&self) -> Option<String> {
        self.page_id.map(|id| format!("M{id}"))
    }
}

/// Opaque continuation token: the key/value pairs to send back verbatim.
pub type Continuation = Vec<(String, String)>;

/// One page of a member listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    /// Members on this page, in provider order.
    pub members: Vec<Member>,
    /// Token for the next page, or `None` when the listing is exhausted.
    pub continuation: Option<Continuation>,
}

/// Paged listing of category members.
pub trait MemberSource {
    /// Fetches a single page of `kind` members of `category` (name without
    /// the `Category:` prefix).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a malformed response.
    fn list_page(
        &self,
        category: &str,
        kind: MemberKind,
        continuation: Option<&Continuation>,
    ) -> Result<MemberPage>;

    /// Fetches every page until the provider stops returning a continuation.
    ///
    /// # Errors
    ///
    /// Propagates the first page error; members of earlier pages are dropped.
    fn list_all(&self, category: &str, kind: MemberKind) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.list_page(category, kind, continuation.as_ref())?;
            members.extend(page.members);
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => return Ok(members),
            }
        }
    }
}

/// A resolved asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInfo {
    /// Canonical `File:` title after redirects.
    pub title: String,
    /// Numeric identifier (`M…`), empty when the provider has none.
    pub numeric_id: String,
    /// Direct-asset URL, empty when the provider has none.
    pub asset_url: String,
}

/// Result of a title or id lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The reference maps to an asset.
    Found(AssetInfo),
    /// The provider knows nothing by that name.
    NotFound,
    /// The lookup could not complete; carries a description.
    TransientError(String),
}

/// Numeric id of one title in a batched lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleId {
    /// `M<page id>` of the page the title resolves to.
    Found(String),
    /// The response carried no page for the title.
    NoPage,
    /// The page exists but has no page id.
    NoPageId,
    /// The page does not exist.
    Missing,
    /// The request for the title's batch failed.
    Failed(String),
}

/// Title and id lookups, honoring redirects.
pub trait Lookup {
    /// Looks up a `File:` title.
    ///
    /// # Errors
    ///
    /// Only run-halting errors (a malformed response) are returned as `Err`;
    /// exhausted retries become [`LookupOutcome::TransientError`].
    fn by_title(&self, title: &str) -> Result<LookupOutcome>;

    /// Looks up an `M<digits>` identifier.
    ///
    /// # Errors
    ///
    /// Same as [`by_title`](Self::by_title).
    fn by_numeric_id(&self, id: &str) -> Result<LookupOutcome>;

    /// Numeric ids for `titles`, one per title in input order.
    ///
    /// The default issues one [`by_title`](Self::by_title) call per title.
    ///
    /// # Errors
    ///
    /// Same as [`by_title`](Self::by_title).
    fn ids_for_titles(&self, titles: &[String]) -> Result<Vec<TitleId>> {
        titles
            .iter()
            .map(|title| {
                Ok(match self.by_title(title)? {
                    LookupOutcome::Found(info) if info.numeric_id.is_empty() => TitleId::NoPageId,
                    LookupOutcome::Found(info) => TitleId::Found(info.numeric_id),
                    LookupOutcome::NotFound => TitleId::Missing,
                    LookupOutcome::TransientError(reason) => TitleId::Failed(reason),
                })
            })
            .collect()
    }
}

/// A streamed asset body.
pub struct FetchedAsset {
    /// URL the request ended at after following redirects.
    pub final_url: String,
    /// Response body.
    pub body: Box<dyn Read>,
}

impl std::fmt::Debug for FetchedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedAsset")
            .field("final_url", &self.final_url)
            .finish_non_exhaustive()
    }
}

/// Raw byte transfer for a canonical title.
pub trait ByteFetch {
    /// Opens the asset bytes for `title`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    fn fetch(&self, title: &str) -> Result<FetchedAsset>;
}

/// Raw per-file metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    /// Full request URL, query included.
    pub request_url: String,
    /// Response body as returned.
    pub body: Value,
}

impl FileMetadata {
    /// `M<page id>` of the first page in the body, unless it is missing.
    #[must_use]
    pub fn numeric_id(&self) -> Option<String> {
        let page = self.body.pointer("/query/pages/0")?;
        if page.get("missing").is_some_and(|m| m.as_bool() != Some(false)) {
            return None;
        }
        match page.get("pageid")? {
            Value::Number(n) => n.as_u64().map(|id| format!("M{id}")),
            Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                Some(format!("M{s}"))
            }
            _ => None,
        }
    }

    /// Title of the first page in the body, if any.
    #[must_use]
    pub fn page_title(&self) -> Option<&str> {
        self.body
            .pointer("/query/pages/0/title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// Per-file metadata (image info and extended metadata).
pub trait MetadataFetch {
    /// Fetches metadata for a `File:` title, extended metadata in `language`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status or a
    /// body that is not JSON.
    fn metadata(&self, title: &str, language: &str) -> Result<FileMetadata>;
}
