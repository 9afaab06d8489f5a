//! Wikimedia Commons implementation of the catalog capabilities.
//!
//! Talks to the MediaWiki action API with blocking `reqwest`; every request
//! goes through the configured [`RetryPolicy`].

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    AssetInfo, ByteFetch, Continuation, FetchedAsset, FileMetadata, Lookup, LookupOutcome, Member,
    MemberKind, MemberPage, MemberSource, MetadataFetch, TitleId,
};
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, is_transient_status};
use crate::url::{CATEGORY_PREFIX, file_name_of, file_path_url};

/// Most titles the API accepts in one request without bot rights.
pub const MAX_TITLES_PER_QUERY: usize = 50;

/// Image info properties requested for metadata.
const METADATA_IIPROP: &str = "extmetadata|url|size|sha1|mime|mediatype|timestamp|user";

/// Blocking client for the Commons API and `Special:FilePath`.
#[derive(Debug, Clone)]
pub struct CommonsClient {
    http: Client,
    api_url: String,
    page_limit: u32,
    api_timeout: Duration,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

impl CommonsClient {
    /// Builds a client from the network settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        let http = Client::builder().user_agent(&network.user_agent).build()?;
        Ok(Self {
            http,
            api_url: network.api_url.clone(),
            page_limit: network.page_limit,
            api_timeout: Duration::from_secs(network.timeout_secs),
            fetch_timeout: Duration::from_secs(network.fetch_timeout_secs),
            retry: network.retry_policy(),
        })
    }

    /// Sends a request built by `request`, retrying transient statuses.
    fn send(&self, request: impl Fn() -> reqwest::blocking::RequestBuilder) -> Result<Response> {
        self.retry.run(|| {
            let response = request().send()?;
            let status = response.status();
            if is_transient_status(status.as_u16()) {
                return Err(Error::Transient {
                    status: status.as_u16(),
                    attempts: 1,
                });
            }
            if !status.is_success() {
                return Err(Error::Status {
                    status: status.as_u16(),
                    url: response.url().to_string(),
                });
            }
            Ok(response)
        })
    }

    /// Full request URL for an API query.
    fn query_url(&self, params: &[(String, String)]) -> Result<Url> {
        Url::parse_with_params(&self.api_url, params)
            .map_err(|e| Error::Config(format!("network.api_url '{}': {e}", self.api_url)))
    }

    /// Runs an API query and parses its JSON body.
    fn query<T: DeserializeOwned>(&self, params: &[(String, String)]) -> Result<T> {
        self.query_at(&self.query_url(params)?)
    }

    fn query_at<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let response = self.send(|| self.http.get(url.clone()).timeout(self.api_timeout))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|_| Error::malformed(status, &content_type, &body))
    }

    fn lookup(&self, key: &str, value: String) -> Result<LookupOutcome> {
        let mut params = base_params();
        params.extend([
            param("prop", "imageinfo|info"),
            param("iiprop", "url"),
            param("redirects", "1"),
            (key.to_string(), value),
        ]);
        match self.query(&params) {
            Ok(response) => Ok(lookup_outcome(response)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("Lookup failed: {e}");
                Ok(LookupOutcome::TransientError(e.to_string()))
            }
        }
    }
}

impl MemberSource for CommonsClient {
    fn list_page(
        &self,
        category: &str,
        kind: MemberKind,
        continuation: Option<&Continuation>,
    ) -> Result<MemberPage> {
        let mut params = base_params();
        params.extend([
            param("list", "categorymembers"),
            (
                "cmtitle".to_string(),
                format!("{CATEGORY_PREFIX}{category}"),
            ),
            param("cmtype", kind.as_param()),
            param("cmprop", "ids|title"),
            ("cmlimit".to_string(), self.page_limit.to_string()),
        ]);
        if let Some(token) = continuation {
            params.extend(token.iter().cloned());
        }
        Ok(member_page(self.query(&params)?))
    }
}

impl Lookup for CommonsClient {
    fn by_title(&self, title: &str) -> Result<LookupOutcome> {
        self.lookup("titles", title.to_string())
    }

    fn by_numeric_id(&self, id: &str) -> Result<LookupOutcome> {
        match id.strip_prefix('M').filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit())) {
            Some(digits) => self.lookup("pageids", digits.to_string()),
            None => Ok(LookupOutcome::NotFound),
        }
    }

    fn ids_for_titles(&self, titles: &[String]) -> Result<Vec<TitleId>> {
        let mut ids = Vec::with_capacity(titles.len());
        for batch in titles.chunks(MAX_TITLES_PER_QUERY) {
            let mut params = base_params();
            params.extend([
                param("prop", "info"),
                param("redirects", "1"),
                ("titles".to_string(), batch.join("|")),
            ]);
            match self.query(&params) {
                Ok(response) => ids.extend(batch_ids(batch, response)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("Id lookup for {} title(s) failed: {e}", batch.len());
                    let reason = format!("HTTP/parse error: {e}");
                    ids.extend(batch.iter().map(|_| TitleId::Failed(reason.clone())));
                }
            }
        }
        Ok(ids)
    }
}

impl MetadataFetch for CommonsClient {
    fn metadata(&self, title: &str, language: &str) -> Result<FileMetadata> {
        let mut params = base_params();
        params.extend([
            param("prop", "imageinfo"),
            param("iiprop", METADATA_IIPROP),
            param("iiextmetadatalanguage", language),
            param("redirects", "1"),
            param("titles", title),
        ]);
        let url = self.query_url(&params)?;
        let body: Value = self.query_at(&url)?;
        Ok(FileMetadata {
            request_url: url.to_string(),
            body,
        })
    }
}

impl ByteFetch for CommonsClient {
    fn fetch(&self, title: &str) -> Result<FetchedAsset> {
        let url = file_path_url(file_name_of(title));
        let response = self.send(|| self.http.get(&url).timeout(self.fetch_timeout))?;
        Ok(FetchedAsset {
            final_url: response.url().to_string(),
            body: Box::new(response),
        })
    }
}

fn param(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn base_params() -> Vec<(String, String)> {
    vec![
        param("action", "query"),
        param("format", "json"),
        param("formatversion", "2"),
    ]
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    query: Option<QueryBody>,
    #[serde(rename = "continue", default)]
    continuation: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBody {
    #[serde(default)]
    categorymembers: Vec<RawMember>,
    #[serde(default)]
    pages: Vec<RawPage>,
    #[serde(default)]
    normalized: Vec<RawAlias>,
    #[serde(default)]
    redirects: Vec<RawAlias>,
}

#[derive(Debug, Deserialize)]
struct RawAlias {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    title: String,
    #[serde(default)]
    pageid: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    pageid: Option<u64>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    imageinfo: Vec<RawImageInfo>,
}

#[derive(Debug, Deserialize)]
struct RawImageInfo {
    #[serde(default)]
    url: Option<String>,
}

fn member_page(response: ApiResponse) -> MemberPage {
    let members = response
        .query
        .map(|q| q.categorymembers)
        .unwrap_or_default()
        .into_iter()
        .map(|m| Member::new(m.title, m.pageid))
        .collect();
    let continuation = response.continuation.map(|map| {
        map.into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()
    });
    MemberPage {
        members,
        continuation,
    }
}

fn lookup_outcome(response: ApiResponse) -> LookupOutcome {
    let Some(page) = response.query.and_then(|q| q.pages.into_iter().next()) else {
        return LookupOutcome::NotFound;
    };
    if page.missing || page.invalid {
        return LookupOutcome::NotFound;
    }
    let Some(title) = page.title.filter(|t| !t.is_empty()) else {
        return LookupOutcome::NotFound;
    };
    LookupOutcome::Found(AssetInfo {
        title,
        numeric_id: page.pageid.map(|id| format!("M{id}")).unwrap_or_default(),
        asset_url: page
            .imageinfo
            .into_iter()
            .next()
            .and_then(|i| i.url)
            .unwrap_or_default(),
    })
}

/// Maps each of `titles` to its page, following normalizations and
/// redirects reported in `response`.
fn batch_ids(titles: &[String], response: ApiResponse) -> Vec<TitleId> {
    let query = response.query.unwrap_or_default();
    let aliases: HashMap<&str, &str> = query
        .normalized
        .iter()
        .chain(&query.redirects)
        .filter(|a| !a.from.is_empty() && !a.to.is_empty())
        .map(|a| (a.from.as_str(), a.to.as_str()))
        .collect();
    let pages: HashMap<&str, &RawPage> = query
        .pages
        .iter()
        .filter_map(|p| p.title.as_deref().map(|t| (t, p)))
        .collect();

    let canonical = |title: &str| -> String {
        let mut current = title;
        for _ in 0..=aliases.len() {
            match aliases.get(current) {
                Some(&next) if next != current => current = next,
                _ => break,
            }
        }
        current.to_string()
    };

    titles
        .iter()
        .map(|title| {
            let target = canonical(title);
            let page = [target.clone(), target.replace(' ', "_"), target.replace('_', " ")]
                .iter()
                .find_map(|candidate| pages.get(candidate.as_str()).copied());
            match page {
                None => TitleId::NoPage,
                Some(page) if page.missing => TitleId::Missing,
                Some(page) => page
                    .pageid
                    .filter(|id| *id > 0)
                    .map_or(TitleId::NoPageId, |id| TitleId::Found(format!("M{id}"))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn member_page_with_continuation() {
        let page = member_page(parse(
            r#"{"batchcomplete":false,
                "continue":{"cmcontinue":"file|4142|99","continue":"-||"},
                "query":{"categorymembers":[
                    {"pageid":11,"ns":6,"title":"File:A.jpg"},
                    {"pageid":12,"ns":6,"title":"File:B.jpg"}]}}"#,
        ));
        assert_eq!(
            page.members,
            vec![
                Member::new("File:A.jpg", Some(11)),
                Member::new("File:B.jpg", Some(12))
            ]
        );
        let mut token = page.continuation.unwrap();
        token.sort();
        assert_eq!(
            token,
            vec![
                ("cmcontinue".to_string(), "file|4142|99".to_string()),
                ("continue".to_string(), "-||".to_string()),
            ]
        );
    }

    #[test]
    fn last_page_has_no_continuation() {
        let page = member_page(parse(r#"{"batchcomplete":true,"query":{"categorymembers":[]}}"#));
        assert!(page.members.is_empty());
        assert!(page.continuation.is_none());
    }

    #[test]
    fn lookup_found_after_redirect() {
        let outcome = lookup_outcome(parse(
            r#"{"query":{"redirects":[{"from":"File:Old.jpg","to":"File:New.jpg"}],
                "pages":[{"pageid":77,"ns":6,"title":"File:New.jpg",
                "imageinfo":[{"url":"https://upload.wikimedia.org/wikipedia/commons/a/ab/New.jpg"}]}]}}"#,
        ));
        assert_eq!(
            outcome,
            LookupOutcome::Found(AssetInfo {
                title: "File:New.jpg".into(),
                numeric_id: "M77".into(),
                asset_url: "https://upload.wikimedia.org/wikipedia/commons/a/ab/New.jpg".into(),
            })
        );
    }

    #[test]
    fn lookup_missing_page_is_not_found() {
        let outcome = lookup_outcome(parse(
            r#"{"query":{"pages":[{"ns":6,"title":"File:Nope.jpg","missing":true}]}}"#,
        ));
        assert_eq!(outcome, LookupOutcome::NotFound);
        assert_eq!(lookup_outcome(parse("{}")), LookupOutcome::NotFound);
    }

    #[test]
    fn lookup_without_imageinfo_keeps_empty_url() {
        let outcome = lookup_outcome(parse(
            r#"{"query":{"pages":[{"pageid":5,"ns":6,"title":"File:X.jpg"}]}}"#,
        ));
        let LookupOutcome::Found(info) = outcome else {
            panic!("expected Found");
        };
        assert_eq!(info.numeric_id, "M5");
        assert!(info.asset_url.is_empty());
    }

    fn titles(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn batch_ids_follow_normalization_and_redirects() {
        let response = parse(
            r#"{"query":{
                "normalized":[{"from":"File:old_name.jpg","to":"File:Old name.jpg"}],
                "redirects":[{"from":"File:Old name.jpg","to":"File:New name.jpg"}],
                "pages":[
                    {"pageid":10,"ns":6,"title":"File:New name.jpg"},
                    {"pageid":11,"ns":6,"title":"File:Plain.jpg"},
                    {"ns":6,"title":"File:Gone.jpg","missing":true},
                    {"ns":6,"title":"File:Odd.jpg"}]}}"#,
        );
        let ids = batch_ids(
            &titles(&[
                "File:old_name.jpg",
                "File:Plain.jpg",
                "File:Gone.jpg",
                "File:Odd.jpg",
                "File:Absent.jpg",
            ]),
            response,
        );
        assert_eq!(
            ids,
            [
                TitleId::Found("M10".into()),
                TitleId::Found("M11".into()),
                TitleId::Missing,
                TitleId::NoPageId,
                TitleId::NoPage,
            ]
        );
    }

    #[test]
    fn batch_ids_match_underscore_spelling() {
        let response = parse(r#"{"query":{"pages":[{"pageid":3,"title":"File:A b.jpg"}]}}"#);
        assert_eq!(
            batch_ids(&titles(&["File:A_b.jpg"]), response),
            [TitleId::Found("M3".into())]
        );
    }

    #[test]
    fn alias_cycles_terminate() {
        let response = parse(
            r#"{"query":{"redirects":[{"from":"File:A.jpg","to":"File:B.jpg"},{"from":"File:B.jpg","to":"File:A.jpg"}],"pages":[]}}"#,
        );
        assert_eq!(batch_ids(&titles(&["File:A.jpg"]), response), [TitleId::NoPage]);
    }

    #[test]
    fn metadata_url_carries_all_parameters() {
        let client = CommonsClient::new(&NetworkConfig::default()).unwrap();
        let mut params = base_params();
        params.extend([
            param("prop", "imageinfo"),
            param("iiprop", METADATA_IIPROP),
            param("iiextmetadatalanguage", "nl"),
            param("titles", "File:A b.jpg"),
        ]);
        let url = client.query_url(&params).unwrap();
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["formatversion"], "2");
        assert_eq!(pairs["iiprop"], METADATA_IIPROP);
        assert_eq!(pairs["iiextmetadatalanguage"], "nl");
        assert_eq!(pairs["titles"], "File:A b.jpg");
        assert!(url.as_str().starts_with("https://commons.wikimedia.org/w/api.php?"));
    }

    #[test]
    fn client_builds_from_defaults() {
        let client = CommonsClient::new(&NetworkConfig::default()).unwrap();
        assert_eq!(client.retry, RetryPolicy::default());
        assert_eq!(client.api_timeout, Duration::from_secs(20));
        assert_eq!(client.fetch_timeout, Duration::from_secs(60));
    }

    #[test]
    fn invalid_numeric_id_short_circuits() {
        let client = CommonsClient::new(&NetworkConfig::default()).unwrap();
        assert_eq!(client.by_numeric_id("Mabc").unwrap(), LookupOutcome::NotFound);
        assert_eq!(client.by_numeric_id("M").unwrap(), LookupOutcome::NotFound);
    }
}
