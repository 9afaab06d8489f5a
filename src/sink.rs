//! Tabular log storage with schema-union, deduplicating appends.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Log columns, in the order they are written.
pub const LOG_COLUMNS: [&str; 10] = [
    "CommonsFileName",
    "CommonsFileURL",
    "MediaInfoID",
    "CommonsConceptURI",
    "CommonsImageURL",
    "SourceCategory",
    "CommonsCategoryPath",
    "LocalBaseFolder",
    "LocalSubFolder",
    "LocalFilename",
];

/// Columns identifying a log row: resolved asset URL and numeric id.
pub const LOG_KEY: [&str; 2] = ["CommonsImageURL", "MediaInfoID"];

/// An in-memory table of string cells. Every row has one cell per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, each aligned with [`columns`](Self::columns).
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Position of `column`, if present.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Cell at (`row`, `column`), empty when the column is absent.
    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> &str {
        self.column_index(column)
            .and_then(|i| self.rows.get(row).and_then(|r| r.get(i)))
            .map_or("", String::as_str)
    }

    /// Projects the table onto `columns`; missing columns become empty.
    #[must_use]
    pub fn reindex(&self, columns: &[String]) -> Self {
        let map: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                map.iter()
                    .map(|i| i.and_then(|i| row.get(i)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        Self {
            columns: columns.to_vec(),
            rows,
        }
    }
}

/// Unions the schemas of `existing` and `new`, concatenates their rows,
/// drops later duplicates on `keys`, and orders columns with `preferred`
/// first and every other column after them in discovery order.
///
/// Keys absent from both tables are ignored; with no key present nothing is
/// deduplicated.
#[must_use]
pub fn merge_tables(existing: &Table, new: &Table, preferred: &[&str], keys: &[&str]) -> Table {
    let mut union: Vec<String> = Vec::new();
    for column in existing.columns().iter().chain(new.columns()) {
        if !union.contains(column) {
            union.push(column.clone());
        }
    }
    let mut ordered: Vec<String> = preferred
        .iter()
        .filter(|p| union.iter().any(|c| c == *p))
        .map(ToString::to_string)
        .collect();
    for column in &union {
        if !ordered.contains(column) {
            ordered.push(column.clone());
        }
    }

    let key_idx: Vec<usize> = keys
        .iter()
        .filter_map(|k| ordered.iter().position(|c| c == k))
        .collect();

    let mut merged = Table::new(&ordered);
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    for row in existing
        .reindex(&ordered)
        .rows
        .into_iter()
        .chain(new.reindex(&ordered).rows)
    {
        if !key_idx.is_empty() {
            let key: Vec<String> = key_idx.iter().map(|&i| row[i].clone()).collect();
            if !seen.insert(key) {
                continue;
            }
        }
        merged.rows.push(row);
    }
    merged
}

/// Named-table storage.
pub trait TabularSink {
    /// Reads a table, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the table exists but cannot be read.
    fn read_table(&self, name: &str) -> Result<Option<Table>>;

    /// Creates a new table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be written.
    fn write_table(&mut self, name: &str, table: &Table) -> Result<()>;

    /// Atomically replaces a table's rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be written.
    fn replace_table(&mut self, name: &str, table: &Table) -> Result<()>;

    /// Human-readable location of a table, for messages.
    fn describe(&self, name: &str) -> String;
}

/// Appends `rows` to the named table through [`merge_tables`]. Returns the
/// resulting row count.
///
/// # Errors
///
/// Returns an error if the table cannot be read or written.
pub fn append_rows<S: AsRef<str>>(
    sink: &mut dyn TabularSink,
    name: &str,
    rows: &Table,
    preferred: &[&str],
    keys: &[S],
) -> Result<usize> {
    let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
    match sink.read_table(name)? {
        Some(existing) => {
            let merged = merge_tables(&existing, rows, preferred, &keys);
            sink.replace_table(name, &merged)?;
            Ok(merged.len())
        }
        None => {
            let merged = merge_tables(&Table::default(), rows, preferred, &keys);
            sink.write_table(name, &merged)?;
            Ok(merged.len())
        }
    }
}

/// Appends `rows` to the named table, deduplicating on [`LOG_KEY`] and
/// enforcing [`LOG_COLUMNS`] order. Returns the resulting row count.
///
/// # Errors
///
/// Returns an error if the table cannot be read or written.
pub fn append_log_rows(sink: &mut dyn TabularSink, name: &str, rows: &Table) -> Result<usize> {
    append_rows(sink, name, rows, &LOG_COLUMNS, &LOG_KEY)
}

/// Delimiter for a table file: tab for `.tsv`, comma otherwise.
fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

/// Reads a delimited file with a header row into a table.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or parsed.
pub fn read_table_file(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let mut table = Table::new(&headers);
    for record in reader.records() {
        table.push_row(record?.iter().map(ToString::to_string).collect());
    }
    Ok(table)
}

/// Writes `table` to `path` through a temp file and rename.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_table_file(path: &Path, table: &Table) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter_for(path))
        .from_path(&tmp_path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    drop(writer);

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Stores each table as `<dir>/<name>.csv`.
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    /// Creates a sink rooted at `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.csv", crate::sanitize::sanitize_component(name, 80)))
    }

}

impl TabularSink for CsvDirectorySink {
    fn read_table(&self, name: &str) -> Result<Option<Table>> {
        let path = self.table_path(name);
        if !path.exists() {
            return Ok(None);
        }
        read_table_file(&path).map(Some)
    }

    fn write_table(&mut self, name: &str, table: &Table) -> Result<()> {
        write_table_file(&self.table_path(name), table)
    }

    fn replace_table(&mut self, name: &str, table: &Table) -> Result<()> {
        write_table_file(&self.table_path(name), table)
    }

    fn describe(&self, name: &str) -> String {
        self.table_path(name).display().to_string()
    }
}
