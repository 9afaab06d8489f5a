//! Application configuration.
//!
//! One immutable [`AppConfig`] is built at start-up (TOML file plus command
//! line overrides) and passed by reference into every entry point.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::select::{Ordering, SliceRange};

/// What the run harvests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Walk category trees.
    #[default]
    Categories,
    /// Read references from a list file.
    List,
    /// Save per-file metadata instead of file bytes.
    Metadata,
    /// Add numeric ids next to the URLs of a table file.
    Mids,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Categories => "categories",
            Self::List => "list",
            Self::Metadata => "metadata",
            Self::Mids => "mids",
        })
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "categories" => Ok(Self::Categories),
            "list" => Ok(Self::List),
            "metadata" => Ok(Self::Metadata),
            "mids" => Ok(Self::Mids),
            other => Err(Error::Config(format!(
                "unknown mode '{other}' (expected 'categories', 'list', 'metadata' or 'mids')"
            ))),
        }
    }
}

/// Format of the list file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Chosen from the file extension.
    #[default]
    Auto,
    /// Comma separated.
    Csv,
    /// Tab separated.
    Tsv,
    /// Plain text, one entry per line (tab separated when columns exist).
    Txt,
}

/// Remote endpoints and transport behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// MediaWiki action API endpoint.
    pub api_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Members requested per listing page.
    pub page_limit: u32,
    /// Timeout for API calls, in seconds.
    pub timeout_secs: u64,
    /// Timeout for byte fetches, in seconds.
    pub fetch_timeout_secs: u64,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Base backoff delay, in seconds.
    pub backoff_factor: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_url: "https://commons.wikimedia.org/w/api.php".to_string(),
            user_agent: concat!(
                "commons-dl/",
                env!("CARGO_PKG_VERSION"),
                " (Wikimedia Commons file downloader)"
            )
            .to_string(),
            page_limit: 500,
            timeout_secs: 20,
            fetch_timeout_secs: 60,
            retries: 5,
            backoff_factor: 0.6,
        }
    }
}

impl NetworkConfig {
    /// Retry policy for these settings.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.backoff_factor)
    }
}

/// Local layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Top folder for all downloads.
    pub base_folder: PathBuf,
    /// Where the log lives; the base folder when unset.
    pub log_dir: Option<PathBuf>,
    /// Name of the log (a directory of tables).
    pub log_name: String,
    /// Budget for the absolute path of each stored file.
    pub full_path_budget: usize,
    /// Cap for one folder segment.
    pub max_component_len: usize,
    /// Cap for a file name before its identity suffix.
    pub max_name_len: usize,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_folder: PathBuf::from("dwnlds"),
            log_dir: None,
            log_name: "downloads_log".to_string(),
            full_path_budget: crate::sanitize::DEFAULT_FULL_PATH_BUDGET,
            max_component_len: crate::sanitize::DEFAULT_COMPONENT_LEN,
            max_name_len: crate::sanitize::DEFAULT_NAME_LEN,
        }
    }
}

impl PathsConfig {
    /// Directory holding the log tables.
    #[must_use]
    pub fn log_location(&self) -> PathBuf {
        self.log_dir
            .as_deref()
            .unwrap_or(&self.base_folder)
            .join(&self.log_name)
    }
}

/// Behavior shared by both modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Which harvester to run.
    pub mode: Mode,
    /// Re-download files that already exist.
    pub overwrite: bool,
    /// Plan and resolve only; write nothing.
    pub dry_run: bool,
    /// Ask before downloading.
    pub confirm: bool,
    /// Rows buffered before each log flush.
    pub log_flush_rows: usize,
    /// Allowed extensions; empty allows all.
    pub extensions: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Categories,
            overwrite: false,
            dry_run: false,
            confirm: true,
            log_flush_rows: 10,
            extensions: Vec::new(),
        }
    }
}

/// Category mode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    /// Root categories, without the `Category:` prefix.
    pub roots: Vec<String>,
    /// Slice of `roots` to harvest.
    pub root_range: SliceRange,
    /// Subcategory levels to expand.
    pub depth: usize,
    /// Folder under the base folder for category downloads.
    pub download_subfolder: String,
    /// Store files directly under their root's folder.
    pub flatten: bool,
    /// Slice of the combined pool to download.
    pub global_range: SliceRange,
    /// Order of the combined pool.
    pub ordering: Ordering,
    /// Log table name.
    pub sheet_name: String,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            root_range: SliceRange::default(),
            depth: 0,
            download_subfolder: "cats".to_string(),
            flatten: true,
            global_range: SliceRange::default(),
            ordering: Ordering::RootThenTitle,
            sheet_name: "CategoriesDownloads".to_string(),
        }
    }
}

impl CategoriesConfig {
    /// Roots after slicing, spaces replaced by underscores. Repeated roots
    /// keep their first position.
    #[must_use]
    pub fn selected_roots(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let normalized: Vec<String> = self
            .roots
            .iter()
            .map(|r| r.trim().replace(' ', "_"))
            .filter(|r| !r.is_empty() && seen.insert(r.clone()))
            .collect();
        self.root_range.apply(&normalized).to_vec()
    }
}

/// List mode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    /// List file.
    pub input: PathBuf,
    /// Format of `input`.
    pub format: InputFormat,
    /// Field delimiter override (single character).
    pub delimiter: Option<char>,
    /// Column holding the references.
    pub column: String,
    /// Optional column with a source label per row.
    pub source_column: String,
    /// Source label when the row has none.
    pub source_tag: String,
    /// Slice of rows to process.
    pub range: SliceRange,
    /// Folder under the base folder for list downloads.
    pub download_subfolder: String,
    /// Log table name.
    pub sheet_name: String,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("list-of-tobe-downloaded-files.csv"),
            format: InputFormat::Auto,
            delimiter: None,
            column: "CommonsInput".to_string(),
            source_column: "SourceCategory".to_string(),
            source_tag: "Manual list".to_string(),
            range: SliceRange::default(),
            download_subfolder: "list".to_string(),
            sheet_name: "ListDownloads".to_string(),
        }
    }
}

/// Where metadata mode takes its files from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataInput {
    /// The `[list]` file.
    #[default]
    List,
    /// A harvest of the `[categories]` roots.
    Categories,
}

/// Metadata mode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Input of the run.
    pub source: MetadataInput,
    /// Folder under the base folder for the JSON files.
    pub download_subfolder: String,
    /// Language of the extended metadata.
    pub language: String,
    /// Rows appended to the output table at a time.
    pub chunk_size: usize,
    /// Output table for list input.
    pub list_sheet: String,
    /// Output table for category input.
    pub category_sheet: String,
    /// Table collecting harvested (file, category) pairs.
    pub harvest_sheet: String,
    /// Output dedup columns; empty picks the default for `source`.
    pub dedup_keys: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            source: MetadataInput::List,
            download_subfolder: "downloaded_metadata".to_string(),
            language: "en".to_string(),
            chunk_size: 100,
            list_sheet: "FilesMetadata-Manual".to_string(),
            category_sheet: "FilesMetadata-Category".to_string(),
            harvest_sheet: "Files-Category".to_string(),
            dedup_keys: Vec::new(),
        }
    }
}

impl MetadataConfig {
    /// Output table for the configured source.
    #[must_use]
    pub fn sheet_name(&self) -> &str {
        match self.source {
            MetadataInput::List => &self.list_sheet,
            MetadataInput::Categories => &self.category_sheet,
        }
    }

    /// Dedup columns of the output table.
    #[must_use]
    pub fn output_keys(&self) -> Vec<String> {
        if !self.dedup_keys.is_empty() {
            return self.dedup_keys.clone();
        }
        let keys: &[&str] = match self.source {
            MetadataInput::List => &crate::metadata::LIST_KEY,
            MetadataInput::Categories => &crate::metadata::CATEGORY_KEY,
        };
        keys.iter().map(ToString::to_string).collect()
    }
}

/// Numeric-id extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidsConfig {
    /// Table file updated in place (`.csv` or `.tsv`).
    pub input: PathBuf,
    /// Column holding file URLs.
    pub url_column: String,
    /// Column receiving the numeric id.
    pub mid_column: String,
    /// Column receiving the entity page URL.
    pub mid_url_column: String,
    /// File listing rows that got no id.
    pub errors: PathBuf,
    /// Titles per lookup request.
    pub batch_size: usize,
}

impl Default for MidsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("file-urls.csv"),
            url_column: "FileURL".to_string(),
            mid_column: "FileMid".to_string(),
            mid_url_column: "FileMidURL".to_string(),
            errors: PathBuf::from("errors.csv"),
            batch_size: crate::catalog::commons::MAX_TITLES_PER_QUERY,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Path settings.
    pub paths: PathsConfig,
    /// Run settings.
    pub run: RunConfig,
    /// Category mode settings.
    pub categories: CategoriesConfig,
    /// List mode settings.
    pub list: ListConfig,
    /// Metadata mode settings.
    pub metadata: MetadataConfig,
    /// Numeric-id extraction settings.
    pub mids: MidsConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("commons-dl")
            .join("config.toml")
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for invalid TOML, unknown enum values or
    /// wrongly typed fields.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads `path`, or the default location when `None`. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        if !explicit && !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        log::debug!("Loaded config from {}", path.display());
        Self::from_toml(&text)
    }

    /// Checks everything that must hold before any work starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid element.
    pub fn validate(&self) -> Result<()> {
        if self.run.log_flush_rows == 0 {
            return Err(Error::Config("run.log_flush_rows must be at least 1".into()));
        }
        if self.network.page_limit == 0 {
            return Err(Error::Config("network.page_limit must be at least 1".into()));
        }
        if !self.network.backoff_factor.is_finite() || self.network.backoff_factor < 0.0 {
            return Err(Error::Config(
                "network.backoff_factor must be a non-negative number".into(),
            ));
        }
        match self.run.mode {
            Mode::Categories => self.validate_categories(),
            Mode::List => self.validate_list(),
            Mode::Metadata => {
                self.validate_metadata()?;
                match self.metadata.source {
                    MetadataInput::List => self.validate_list(),
                    MetadataInput::Categories => self.validate_categories(),
                }
            }
            Mode::Mids => self.validate_mids(),
        }
    }

    fn validate_categories(&self) -> Result<()> {
        self.categories.root_range.validate("categories.root_range")?;
        self.categories.global_range.validate("categories.global_range")?;
        if self.categories.selected_roots().is_empty() {
            return Err(Error::Config(
                "categories.roots selects no root category".into(),
            ));
        }
        Ok(())
    }

    fn validate_list(&self) -> Result<()> {
        self.list.range.validate("list.range")?;
        if self.list.column.trim().is_empty() {
            return Err(Error::Config("list.column must not be empty".into()));
        }
        if self.list.input.as_os_str().is_empty() {
            return Err(Error::Config("list.input must name a file".into()));
        }
        Ok(())
    }

    fn validate_metadata(&self) -> Result<()> {
        if self.metadata.chunk_size == 0 {
            return Err(Error::Config("metadata.chunk_size must be at least 1".into()));
        }
        if self.metadata.language.trim().is_empty() {
            return Err(Error::Config("metadata.language must not be empty".into()));
        }
        if self.metadata.sheet_name().trim().is_empty() {
            return Err(Error::Config("metadata output sheet name must not be empty".into()));
        }
        Ok(())
    }

    fn validate_mids(&self) -> Result<()> {
        let mids = &self.mids;
        if mids.input.as_os_str().is_empty() {
            return Err(Error::Config("mids.input must name a file".into()));
        }
        if !(1..=crate::catalog::commons::MAX_TITLES_PER_QUERY).contains(&mids.batch_size) {
            return Err(Error::Config(format!(
                "mids.batch_size must be between 1 and {}",
                crate::catalog::commons::MAX_TITLES_PER_QUERY
            )));
        }
        let columns = [&mids.url_column, &mids.mid_column, &mids.mid_url_column];
        if columns.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::Config("mids column names must not be empty".into()));
        }
        if mids.url_column == mids.mid_column
            || mids.url_column == mids.mid_url_column
            || mids.mid_column == mids.mid_url_column
        {
            return Err(Error::Config("mids column names must be distinct".into()));
        }
        Ok(())
    }

    /// Sets the run mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.run.mode = mode;
        self
    }

    /// Sets whether to overwrite existing files.
    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.run.overwrite = overwrite;
        self
    }

    /// Sets dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.run.dry_run = dry_run;
        self
    }

    /// Sets whether to ask before downloading.
    #[must_use]
    pub const fn with_confirm(mut self, confirm: bool) -> Self {
        self.run.confirm = confirm;
        self
    }

    /// Sets the traversal depth.
    #[must_use]
    pub const fn with_depth(mut self, depth: usize) -> Self {
        self.categories.depth = depth;
        self
    }

    /// Sets the global slice.
    #[must_use]
    pub const fn with_global_range(mut self, range: SliceRange) -> Self {
        self.categories.global_range = range;
        self
    }

    /// Sets the list row slice.
    #[must_use]
    pub const fn with_list_range(mut self, range: SliceRange) -> Self {
        self.list.range = range;
        self
    }

    /// Sets the input of metadata mode.
    #[must_use]
    pub const fn with_metadata_input(mut self, source: MetadataInput) -> Self {
        self.metadata.source = source;
        self
    }

    /// Sets the root categories.
    #[must_use]
    pub fn with_roots(mut self, roots: Vec<String>) -> Self {
        self.categories.roots = roots;
        self
    }

    /// Sets the base download folder.
    #[must_use]
    pub fn with_base_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.paths.base_folder = folder.into();
        self
    }
}
