//! Fetch-and-store of selected files with an append-only audit log.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::{ByteFetch, Lookup, LookupOutcome};
use crate::config::{AppConfig, PathsConfig};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, StdFileSystem};
use crate::sanitize::{sanitize_component, sanitize_filename};
use crate::select::Selection;
use crate::sink::{LOG_COLUMNS, Table, TabularSink, append_log_rows};
use crate::stats::{ItemOutcome, RunStats, RunStatsBuilder};
use crate::traverse::{FilePool, FileRecord};
use crate::url::{concept_uri, is_asset_url, page_url};

const CHUNK_SIZE: usize = 128 * 1024;

/// Suffix of in-flight files.
pub(crate) const PART_SUFFIX: &str = ".part";

/// Trait for receiving pipeline progress updates.
///
/// All methods have default no-op implementations.
pub trait DownloadProgress {
    /// Called before an item is processed (`index` is 1-based).
    fn on_item_start(&self, _index: usize, _total: usize, _title: &str) {}

    /// Called with the number of bytes written since the last call.
    fn on_bytes(&self, _title: &str, _delta: u64) {}

    /// Called when an item produced a log row.
    fn on_item_done(&self, _index: usize, _total: usize, _row: &LogRow, _outcome: ItemOutcome) {}

    /// Called when an item was dropped.
    fn on_item_failed(&self, _index: usize, _total: usize, _title: &str, _error: &str) {}

    /// Called after rows were appended to the log.
    fn on_flush(&self, _rows: usize, _location: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

/// A record scheduled for download with its full category chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem<'a> {
    /// Record to fetch.
    pub record: &'a FileRecord,
    /// Category chain including the root; empty for list input.
    pub segments: Vec<String>,
}

/// Plans category downloads: each record's chain prefixed with its root.
#[must_use]
pub fn plan_selection<'a>(selection: &Selection<'a>) -> Vec<PlannedItem<'a>> {
    selection
        .groups
        .iter()
        .flat_map(|group| {
            group.records.iter().map(|record| {
                let mut segments = Vec::with_capacity(record.path_segments.len() + 1);
                segments.push(group.root.to_string());
                segments.extend(record.path_segments.iter().cloned());
                PlannedItem {
                    record: *record,
                    segments,
                }
            })
        })
        .collect()
}

/// Plans list downloads, in pool order.
#[must_use]
pub fn plan_pool(pool: &FilePool) -> Vec<PlannedItem<'_>> {
    pool.iter()
        .map(|record| PlannedItem {
            record,
            segments: record.path_segments.clone(),
        })
        .collect()
}

/// Where files land on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Top download folder.
    pub base_folder: PathBuf,
    /// Folder under the base for this mode; may be empty.
    pub subfolder: String,
    /// Keep only the root segment on disk.
    pub flatten: bool,
    /// Cap for one folder segment.
    pub max_component_len: usize,
    /// Cap for a file name before its suffix.
    pub max_name_len: usize,
    /// Budget for the absolute path of a file.
    pub full_path_budget: usize,
}

impl Layout {
    /// Builds a layout from path settings.
    #[must_use]
    pub fn new(paths: &PathsConfig, subfolder: &str, flatten: bool) -> Self {
        Self {
            base_folder: paths.base_folder.clone(),
            subfolder: subfolder.to_string(),
            flatten,
            max_component_len: paths.max_component_len,
            max_name_len: paths.max_name_len,
            full_path_budget: paths.full_path_budget,
        }
    }

    /// Segments used on disk for a category chain.
    #[must_use]
    pub fn local_segments<'s>(&self, segments: &'s [String]) -> &'s [String] {
        if self.flatten && !segments.is_empty() {
            &segments[..1]
        } else {
            segments
        }
    }

    /// Target folder for a category chain.
    #[must_use]
    pub fn folder_for(&self, segments: &[String]) -> PathBuf {
        let mut folder = self.base_folder.clone();
        if !self.subfolder.is_empty() {
            folder.push(sanitize_component(&self.subfolder, self.max_component_len));
        }
        for segment in self.local_segments(segments) {
            folder.push(sanitize_component(segment, self.max_component_len));
        }
        folder
    }

    /// `folder` relative to the base folder, `/`-separated.
    #[must_use]
    pub fn relative(&self, folder: &Path) -> String {
        folder
            .strip_prefix(&self.base_folder)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }
}

/// Run switches for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Re-download existing files.
    pub overwrite: bool,
    /// Resolve only; touch neither disk nor log.
    pub dry_run: bool,
    /// Rows buffered before each flush.
    pub flush_rows: usize,
    /// Log table to append to.
    pub table: String,
}

impl RunOptions {
    /// Options from the run settings for the given log table.
    #[must_use]
    pub fn new(config: &AppConfig, table: &str) -> Self {
        Self {
            overwrite: config.run.overwrite,
            dry_run: config.run.dry_run,
            flush_rows: config.run.log_flush_rows.max(1),
            table: table.to_string(),
        }
    }
}

/// One audit log record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRow {
    /// Canonical `File:` title.
    pub file_name: String,
    /// Human-facing page URL.
    pub file_url: String,
    /// Numeric identifier.
    pub numeric_id: String,
    /// Entity URI for the numeric identifier.
    pub concept_uri: String,
    /// Resolved direct-asset URL.
    pub image_url: String,
    /// Source label (category or list tag).
    pub source: String,
    /// Full category chain, `/`-separated.
    pub category_path: String,
    /// Base folder.
    pub local_base_folder: String,
    /// Folder below the base actually used.
    pub local_subfolder: String,
    /// Stored file name; empty when nothing was stored.
    pub local_filename: String,
}

impl LogRow {
    /// Cells in [`LOG_COLUMNS`] order.
    #[must_use]
    pub fn cells(&self) -> Vec<String> {
        vec![
            self.file_name.clone(),
            self.file_url.clone(),
            self.numeric_id.clone(),
            self.concept_uri.clone(),
            self.image_url.clone(),
            self.source.clone(),
            self.category_path.clone(),
            self.local_base_folder.clone(),
            self.local_subfolder.clone(),
            self.local_filename.clone(),
        ]
    }
}

/// Builds a log table from rows.
#[must_use]
pub fn rows_to_table(rows: &[LogRow]) -> Table {
    let mut table = Table::new(&LOG_COLUMNS);
    for row in rows {
        table.push_row(row.cells());
    }
    table
}

enum CopyError {
    Read(std::io::Error),
    Write(std::io::Error),
}

/// Drives fetch, store and log for planned items.
pub struct Downloader<'a, F: FileSystem = StdFileSystem> {
    fetch: &'a dyn ByteFetch,
    lookup: &'a dyn Lookup,
    layout: Layout,
    options: RunOptions,
    fs: F,
}

impl<'a> Downloader<'a, StdFileSystem> {
    /// Creates a downloader on the real file system.
    #[must_use]
    pub const fn new(
        fetch: &'a dyn ByteFetch,
        lookup: &'a dyn Lookup,
        layout: Layout,
        options: RunOptions,
    ) -> Self {
        Self::with_fs(fetch, lookup, layout, options, StdFileSystem)
    }
}

impl<'a, F: FileSystem> Downloader<'a, F> {
    /// Creates a downloader with a custom file system implementation.
    #[must_use]
    pub const fn with_fs(
        fetch: &'a dyn ByteFetch,
        lookup: &'a dyn Lookup,
        layout: Layout,
        options: RunOptions,
        fs: F,
    ) -> Self {
        Self {
            fetch,
            lookup,
            layout,
            options,
            fs,
        }
    }

    /// Asset URL for `record`: the stored one, else a title lookup.
    fn asset_url_for(&self, record: &FileRecord) -> Result<String> {
        if let Some(url) = &record.asset_url {
            return Ok(url.clone());
        }
        Ok(match self.lookup.by_title(&record.title)? {
            LookupOutcome::Found(info) => info.asset_url,
            LookupOutcome::NotFound => {
                log::warn!("{}: no asset URL known", record.title);
                String::new()
            }
            LookupOutcome::TransientError(reason) => {
                log::warn!("{}: asset URL lookup failed: {reason}", record.title);
                String::new()
            }
        })
    }

    /// Fetches `title` into `path` through a `.part` file.
    ///
    /// The outer `Result` fails when the fetch itself fails; the inner one
    /// when the bytes could not be stored.
    fn store(
        &self,
        title: &str,
        folder: &Path,
        path: &Path,
        progress: &dyn DownloadProgress,
    ) -> Result<(String, std::io::Result<u64>)> {
        let mut fetched = self.fetch.fetch(title)?;
        if let Err(e) = self.fs.create_dir_all(folder) {
            return Ok((fetched.final_url, Err(e)));
        }

        let part = part_path(path);
        let copied = match self.fs.create_file(&part) {
            Ok(mut out) => copy_body(title, fetched.body.as_mut(), out.as_mut(), progress),
            Err(e) => Err(CopyError::Write(e)),
        };
        match copied {
            Ok(bytes) => {
                let renamed = self.fs.rename_file(&part, path).map(|()| bytes);
                if renamed.is_err() {
                    let _ = self.fs.remove_file(&part);
                }
                Ok((fetched.final_url, renamed))
            }
            Err(CopyError::Write(e)) => {
                let _ = self.fs.remove_file(&part);
                Ok((fetched.final_url, Err(e)))
            }
            Err(CopyError::Read(e)) => {
                let _ = self.fs.remove_file(&part);
                Err(Error::Io(e))
            }
        }
    }

    /// Processes one item into a log row.
    fn process(
        &self,
        item: &PlannedItem<'_>,
        progress: &dyn DownloadProgress,
    ) -> Result<(LogRow, ItemOutcome)> {
        let record = item.record;
        let folder = self.layout.folder_for(&item.segments);
        let safe_name = sanitize_filename(
            record.file_name(),
            Some(&folder),
            self.layout.max_name_len,
            self.layout.full_path_budget.saturating_sub(PART_SUFFIX.len()),
            record.numeric_id.as_deref(),
        );
        let path = folder.join(&safe_name);

        let (image_url, local_filename, outcome) = if self.options.dry_run {
            (self.asset_url_for(record)?, safe_name, ItemOutcome::Planned)
        } else if !self.options.overwrite && self.fs.file_exists(&path) {
            (
                self.asset_url_for(record)?,
                safe_name,
                ItemOutcome::SkippedExisting,
            )
        } else {
            let (final_url, stored) = self.store(&record.title, &folder, &path, progress)?;
            let image_url = if is_asset_url(&final_url) {
                final_url
            } else {
                let looked_up = self.asset_url_for(record)?;
                if looked_up.is_empty() { final_url } else { looked_up }
            };
            match stored {
                Ok(bytes) => (image_url, safe_name, ItemOutcome::Downloaded { bytes }),
                Err(e) => {
                    log::error!("{}: could not store {}: {e}", record.title, path.display());
                    (image_url, String::new(), ItemOutcome::WriteFailed)
                }
            }
        };

        let numeric_id = record.numeric_id.clone().unwrap_or_default();
        let row = LogRow {
            file_name: record.title.clone(),
            file_url: page_url(&record.title),
            concept_uri: concept_uri(&numeric_id),
            numeric_id,
            image_url,
            source: record.origin.label(),
            category_path: item.segments.join("/"),
            local_base_folder: self.layout.base_folder.display().to_string(),
            local_subfolder: self.layout.relative(&folder),
            local_filename,
        };
        Ok((row, outcome))
    }

    /// Appends buffered rows; on failure they stay buffered for the next try.
    fn flush(
        &self,
        buffer: &mut Vec<LogRow>,
        sink: &mut dyn TabularSink,
        stats: &mut RunStatsBuilder,
        progress: &dyn DownloadProgress,
    ) {
        if buffer.is_empty() {
            return;
        }
        match append_log_rows(sink, &self.options.table, &rows_to_table(buffer)) {
            Ok(_) => {
                let location = sink.describe(&self.options.table);
                log::info!("Flushed {} row(s) to {location}", buffer.len());
                progress.on_flush(buffer.len(), &location);
                stats.add_flushed(buffer.len());
                buffer.clear();
            }
            Err(e) => log::error!("Could not write log table {}: {e}", self.options.table),
        }
    }

    /// Processes `items` in order, logging rows to `sink`.
    ///
    /// Per-item failures are reported and skipped. In dry-run mode neither
    /// the file system nor the sink is touched.
    ///
    /// # Errors
    ///
    /// Returns run-halting errors (a malformed catalog response); rows
    /// completed before it are flushed first.
    pub fn run(
        &self,
        items: &[PlannedItem<'_>],
        sink: &mut dyn TabularSink,
        progress: &dyn DownloadProgress,
    ) -> Result<RunStats> {
        let mut stats = RunStatsBuilder::new();
        let mut buffer: Vec<LogRow> = Vec::new();
        let total = items.len();

        for (idx, item) in items.iter().enumerate() {
            let index = idx + 1;
            let title = item.record.title.as_str();
            progress.on_item_start(index, total, title);

            match self.process(item, progress) {
                Ok((row, outcome)) => {
                    log_outcome(index, total, title, &row, outcome);
                    progress.on_item_done(index, total, &row, outcome);
                    stats.record(outcome);
                    if !self.options.dry_run {
                        buffer.push(row);
                        if buffer.len() >= self.options.flush_rows {
                            self.flush(&mut buffer, sink, &mut stats, progress);
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    if !self.options.dry_run {
                        self.flush(&mut buffer, sink, &mut stats, progress);
                    }
                    return Err(e);
                }
                Err(e) => {
                    log::error!("[{index}/{total}] {title} -> {e}");
                    progress.on_item_failed(index, total, title, &e.to_string());
                    stats.record_failure();
                }
            }
        }

        if !self.options.dry_run {
            self.flush(&mut buffer, sink, &mut stats, progress);
        }
        Ok(stats.build())
    }
}

fn copy_body(
    title: &str,
    body: &mut dyn Read,
    out: &mut dyn Write,
    progress: &dyn DownloadProgress,
) -> std::result::Result<u64, CopyError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        out.write_all(&buf[..n]).map_err(CopyError::Write)?;
        let n = n as u64;
        total += n;
        progress.on_bytes(title, n);
    }
    out.flush().map_err(CopyError::Write)?;
    Ok(total)
}

fn log_outcome(index: usize, total: usize, title: &str, row: &LogRow, outcome: ItemOutcome) {
    let name = &row.local_filename;
    match outcome {
        ItemOutcome::Downloaded { bytes } => {
            log::info!("[{index}/{total}] {title} -> saved as {name} ({bytes} bytes)");
        }
        ItemOutcome::SkippedExisting => {
            log::info!("[{index}/{total}] {title} -> already present as {name}");
        }
        ItemOutcome::Planned => log::info!("[{index}/{total}] {title} -> would save as {name}"),
        ItemOutcome::WriteFailed => {
            log::warn!("[{index}/{total}] {title} -> not stored, logged without a local file");
        }
    }
}

/// Returns the `.part` file path for a given final path.
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}
