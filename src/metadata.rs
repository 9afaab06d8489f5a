//! Per-file metadata harvest: the raw JSON of every file is kept on disk and
//! a flattened copy is appended to a table in chunks.
//!
//! Later chunks may carry keys earlier ones did not; the table widens and
//! older rows keep empty cells for the new columns.

use std::io::Write;
use std::path::PathBuf;

use serde_json::Value;

use crate::catalog::{FileMetadata, Lookup, MetadataFetch};
use crate::config::{AppConfig, ListConfig};
use crate::download::{DownloadProgress, LogRow, PART_SUFFIX, part_path};
use crate::error::Result;
use crate::fs::{FileSystem, StdFileSystem};
use crate::list_input::ListEntry;
use crate::resolve::resolve;
use crate::sanitize::{sanitize_component, sanitize_filename};
use crate::select::Selection;
use crate::sink::{Table, TabularSink, append_rows};
use crate::stats::{ItemOutcome, RunStats, RunStatsBuilder};
use crate::url::{InputKind, classify, entity_page_url, file_name_of};

/// Columns leading every metadata row, in order.
pub const FRONT_COLUMNS: [&str; 7] = [
    "Input_CommonsFileName",
    "SourceCategory",
    "Requested_API_URL",
    "Local_JSON_File",
    "Computed_MediaID",
    "Computed_MediaID_URL",
    "BatchIndex",
];

/// Column carrying the reason a fetch failed.
pub const ERROR_COLUMN: &str = "error.message";

/// Default output key for list input.
pub const LIST_KEY: [&str; 2] = ["Input_CommonsFileName", "Computed_MediaID"];

/// Default output key for category input.
pub const CATEGORY_KEY: [&str; 3] = ["Input_CommonsFileName", "SourceCategory", "Computed_MediaID"];

/// Columns (and key) of the harvest table.
pub const HARVEST_COLUMNS: [&str; 2] = ["CommonsFileName", "SourceCategory"];

/// Flattens `value` into dotted keys; list elements are keyed by index.
///
/// Strings are taken verbatim, `null` becomes empty, other scalars their
/// JSON text. Empty objects and lists produce nothing.
#[must_use]
pub fn flatten_json(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, key: &str, out: &mut Vec<(String, String)>) {
    let child = |name: &str| {
        if key.is_empty() {
            name.to_string()
        } else {
            format!("{key}.{name}")
        }
    };
    match value {
        Value::Object(map) => {
            for (name, v) in map {
                flatten_into(v, &child(name), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, &child(&i.to_string()), out);
            }
        }
        Value::Null if !key.is_empty() => out.push((key.to_string(), String::new())),
        Value::String(s) if !key.is_empty() => out.push((key.to_string(), s.clone())),
        Value::Bool(_) | Value::Number(_) if !key.is_empty() => {
            out.push((key.to_string(), value.to_string()));
        }
        _ => {}
    }
}

/// One file to describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    /// Reference as given.
    pub input: String,
    /// `File:` title to query; empty when the input names no file.
    pub title: String,
    /// Source label.
    pub source: String,
}

/// Items for a category selection, in selection order.
#[must_use]
pub fn items_from_selection(selection: &Selection<'_>) -> Vec<MetadataItem> {
    selection
        .groups
        .iter()
        .flat_map(|group| group.records.iter())
        .map(|record| MetadataItem {
            input: record.title.clone(),
            title: record.title.clone(),
            source: record.origin.label(),
        })
        .collect()
}

/// Items for the sliced list rows. Titles and URLs are taken as written;
/// only numeric ids need a lookup.
///
/// # Errors
///
/// Only run-halting lookup errors propagate.
pub fn items_from_list(
    lookup: &dyn Lookup,
    entries: &[ListEntry],
    config: &ListConfig,
) -> Result<Vec<MetadataItem>> {
    config
        .range
        .apply(entries)
        .iter()
        .map(|entry| {
            let title = match classify(&entry.value) {
                InputKind::Title(title)
                | InputKind::PageUrl(title)
                | InputKind::AssetUrl { title, .. } => title,
                InputKind::NumericId(_) => resolve(lookup, &entry.value)?.title,
                InputKind::Unrecognized => String::new(),
            };
            let source = if entry.source.is_empty() {
                config.source_tag.clone()
            } else {
                entry.source.clone()
            };
            Ok(MetadataItem {
                input: entry.value.clone(),
                title,
                source,
            })
        })
        .collect()
}

/// Appends (file, category) pairs of `items` to the harvest table, skipping
/// pairs already present. Returns the resulting row count.
///
/// # Errors
///
/// Returns an error if the table cannot be read or written.
pub fn record_harvest(sink: &mut dyn TabularSink, name: &str, items: &[MetadataItem]) -> Result<usize> {
    let mut table = Table::new(&HARVEST_COLUMNS);
    for item in items {
        table.push_row(vec![item.title.clone(), item.source.clone()]);
    }
    append_rows(sink, name, &table, &HARVEST_COLUMNS, &HARVEST_COLUMNS)
}

/// Builds a chunk table: [`FRONT_COLUMNS`] first, then keys in the order
/// they first appear.
#[must_use]
pub fn rows_to_table(rows: &[Vec<(String, String)>]) -> Table {
    let mut columns: Vec<String> = FRONT_COLUMNS.iter().map(ToString::to_string).collect();
    for row in rows {
        for (key, _) in row {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    let mut table = Table::new(&columns);
    for row in rows {
        let mut cells = vec![String::new(); columns.len()];
        for (key, value) in row {
            if let Some(i) = columns.iter().position(|c| c == key) {
                cells[i].clone_from(value);
            }
        }
        table.push_row(cells);
    }
    table
}

/// Settings of a metadata run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOptions {
    /// Base download folder.
    pub base_folder: PathBuf,
    /// Folder under the base for JSON files; may be empty.
    pub subfolder: String,
    /// Language of the extended metadata.
    pub language: String,
    /// Rows per appended chunk.
    pub chunk_size: usize,
    /// Output table.
    pub table: String,
    /// Output dedup columns.
    pub keys: Vec<String>,
    /// Fetch only; write neither files nor tables.
    pub dry_run: bool,
    /// Cap for a file name before its suffix.
    pub max_name_len: usize,
    /// Budget for the absolute path of a file.
    pub full_path_budget: usize,
}

impl MetadataOptions {
    /// Options from the metadata, path and run settings.
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let subfolder = config.metadata.download_subfolder.trim();
        Self {
            base_folder: config.paths.base_folder.clone(),
            subfolder: if subfolder.is_empty() {
                String::new()
            } else {
                sanitize_component(subfolder, config.paths.max_component_len)
            },
            language: config.metadata.language.trim().to_string(),
            chunk_size: config.metadata.chunk_size.max(1),
            table: config.metadata.sheet_name().to_string(),
            keys: config.metadata.output_keys(),
            dry_run: config.run.dry_run,
            max_name_len: config.paths.max_name_len,
            full_path_budget: config.paths.full_path_budget,
        }
    }

    fn folder(&self) -> PathBuf {
        if self.subfolder.is_empty() {
            self.base_folder.clone()
        } else {
            self.base_folder.join(&self.subfolder)
        }
    }
}

fn front_cells(item: &MetadataItem, batch: usize) -> Vec<(String, String)> {
    let values = [
        item.input.clone(),
        item.source.clone(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        batch.to_string(),
    ];
    FRONT_COLUMNS.iter().map(ToString::to_string).zip(values).collect()
}

fn set(cells: &mut [(String, String)], key: &str, value: String) {
    if let Some(cell) = cells.iter_mut().find(|(k, _)| k == key) {
        cell.1 = value;
    }
}

/// Fetches metadata for items, saves the JSON and appends flattened rows.
pub struct MetadataHarvester<'a, F: FileSystem = StdFileSystem> {
    source: &'a dyn MetadataFetch,
    options: MetadataOptions,
    fs: F,
}

impl<'a> MetadataHarvester<'a, StdFileSystem> {
    /// Creates a harvester on the real file system.
    #[must_use]
    pub const fn new(source: &'a dyn MetadataFetch, options: MetadataOptions) -> Self {
        Self::with_fs(source, options, StdFileSystem)
    }
}

impl<'a, F: FileSystem> MetadataHarvester<'a, F> {
    /// Creates a harvester with a custom file system implementation.
    #[must_use]
    pub const fn with_fs(source: &'a dyn MetadataFetch, options: MetadataOptions, fs: F) -> Self {
        Self { source, options, fs }
    }

    /// Writes the body to `path` through a `.part` file.
    fn save_json(&self, path: &std::path::Path, body: &Value) -> std::io::Result<u64> {
        let bytes = serde_json::to_vec_pretty(body).map_err(std::io::Error::other)?;
        self.fs.create_dir_all(&self.options.folder())?;
        let part = part_path(path);
        let written = self.fs.create_file(&part).and_then(|mut out| {
            out.write_all(&bytes)?;
            out.flush()
        });
        let stored = written.and_then(|()| self.fs.rename_file(&part, path));
        if stored.is_err() {
            let _ = self.fs.remove_file(&part);
        }
        stored.map(|()| bytes.len() as u64)
    }

    /// Stores `meta` for `item` and builds its row.
    fn store(
        &self,
        item: &MetadataItem,
        meta: &FileMetadata,
        batch: usize,
        progress: &dyn DownloadProgress,
    ) -> (Vec<(String, String)>, LogRow, ItemOutcome) {
        let mid = meta.numeric_id().unwrap_or_default();
        let folder = self.options.folder();
        let name = sanitize_filename(
            &format!("{}.json", file_name_of(&item.title)),
            Some(&folder),
            self.options.max_name_len,
            self.options.full_path_budget.saturating_sub(PART_SUFFIX.len()),
            Some(mid.as_str()),
        );
        let path = folder.join(&name);

        let (local, outcome) = if self.options.dry_run {
            (path.display().to_string(), ItemOutcome::Planned)
        } else {
            match self.save_json(&path, &meta.body) {
                Ok(bytes) => {
                    progress.on_bytes(&item.title, bytes);
                    (path.display().to_string(), ItemOutcome::Downloaded { bytes })
                }
                Err(e) => {
                    log::warn!("{}: could not write {}: {e}", item.title, path.display());
                    (String::new(), ItemOutcome::WriteFailed)
                }
            }
        };

        let mut cells = front_cells(item, batch);
        set(&mut cells, "Requested_API_URL", meta.request_url.clone());
        set(&mut cells, "Local_JSON_File", local.clone());
        set(
            &mut cells,
            "Computed_MediaID_URL",
            if mid.is_empty() { String::new() } else { entity_page_url(&mid) },
        );
        set(&mut cells, "Computed_MediaID", mid.clone());
        cells.extend(flatten_json(&meta.body));

        let row = LogRow {
            file_name: item.title.clone(),
            numeric_id: mid,
            source: item.source.clone(),
            local_base_folder: self.options.base_folder.display().to_string(),
            local_subfolder: self.options.subfolder.clone(),
            local_filename: if local.is_empty() { String::new() } else { name },
            ..LogRow::default()
        };
        (cells, row, outcome)
    }

    /// Appends a chunk; on failure the rows stay buffered for the next try.
    fn flush(
        &self,
        buffer: &mut Vec<Vec<(String, String)>>,
        sink: &mut dyn TabularSink,
        stats: &mut RunStatsBuilder,
        progress: &dyn DownloadProgress,
    ) {
        if buffer.is_empty() || self.options.dry_run {
            return;
        }
        let table = rows_to_table(buffer);
        match append_rows(sink, &self.options.table, &table, &FRONT_COLUMNS, &self.options.keys) {
            Ok(total) => {
                let location = sink.describe(&self.options.table);
                log::info!("Wrote {} row(s) to {location} ({total} in table)", buffer.len());
                progress.on_flush(buffer.len(), &location);
                stats.add_flushed(buffer.len());
                buffer.clear();
            }
            Err(e) => log::error!("Could not write table {}: {e}", self.options.table),
        }
    }

    /// Processes `items` in chunks of `chunk_size`, appending one chunk at a
    /// time to the output table.
    ///
    /// Every item yields a row: failed fetches carry [`ERROR_COLUMN`], items
    /// without a title only their input columns.
    ///
    /// # Errors
    ///
    /// Returns run-halting errors; rows completed before it are written
    /// first.
    pub fn run(
        &self,
        items: &[MetadataItem],
        sink: &mut dyn TabularSink,
        progress: &dyn DownloadProgress,
    ) -> Result<RunStats> {
        let mut stats = RunStatsBuilder::new();
        let mut buffer: Vec<Vec<(String, String)>> = Vec::new();
        let total = items.len();
        let chunk = self.options.chunk_size.max(1);
        log::info!(
            "Fetching metadata for {total} file(s) in {} chunk(s) of {chunk}",
            total.div_ceil(chunk)
        );

        for (idx, item) in items.iter().enumerate() {
            let index = idx + 1;
            let batch = idx / chunk + 1;
            let label = if item.title.is_empty() { item.input.as_str() } else { item.title.as_str() };
            progress.on_item_start(index, total, label);

            if item.title.is_empty() {
                log::warn!("[{index}/{total}] {:?}: no file title, row kept without metadata", item.input);
                progress.on_item_failed(index, total, label, "no file title");
                stats.record_failure();
                buffer.push(front_cells(item, batch));
            } else {
                match self.source.metadata(&item.title, &self.options.language) {
                    Ok(meta) => {
                        let (cells, row, outcome) = self.store(item, &meta, batch, progress);
                        if row.numeric_id.is_empty() {
                            log::info!("[{index}/{total}] {label} -> no numeric id");
                        } else {
                            log::info!("[{index}/{total}] {label} -> {}", row.numeric_id);
                        }
                        progress.on_item_done(index, total, &row, outcome);
                        stats.record(outcome);
                        buffer.push(cells);
                    }
                    Err(e) if e.is_fatal() => {
                        self.flush(&mut buffer, sink, &mut stats, progress);
                        return Err(e);
                    }
                    Err(e) => {
                        log::error!("[{index}/{total}] {label} -> {e}");
                        progress.on_item_failed(index, total, label, &e.to_string());
                        stats.record_failure();
                        let mut cells = front_cells(item, batch);
                        cells.push((ERROR_COLUMN.to_string(), e.to_string()));
                        buffer.push(cells);
                    }
                }
            }

            if index % chunk == 0 {
                self.flush(&mut buffer, sink, &mut stats, progress);
            }
        }

        self.flush(&mut buffer, sink, &mut stats, progress);
        Ok(stats.build())
    }
}
