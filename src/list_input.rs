//! List-mode input: reading reference files and resolving their rows.

use std::io::Read;
use std::path::Path;

use crate::catalog::Lookup;
use crate::config::{InputFormat, ListConfig};
use crate::error::{Error, Result};
use crate::resolve::resolve;
use crate::traverse::{FilePool, FileRecord, Origin};

/// Older log-style columns, merged per row in this priority.
pub const LEGACY_COLUMNS: [&str; 5] = [
    "MediaInfoID",
    "CommonsConceptURI",
    "CommonsFileName",
    "CommonsFileURL",
    "CommonsImageURL",
];

/// One row of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Raw reference as typed (trimmed).
    pub value: String,
    /// Source label from the row, empty when absent.
    pub source: String,
}

/// Format actually used for `path` under `format`.
#[must_use]
pub fn effective_format(path: &Path, format: InputFormat) -> InputFormat {
    if format != InputFormat::Auto {
        return format;
    }
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("csv") => InputFormat::Csv,
        Some("tsv") => InputFormat::Tsv,
        _ => InputFormat::Txt,
    }
}

fn delimiter_byte(format: InputFormat, delimiter: Option<char>) -> Result<u8> {
    match delimiter {
        Some(c) => u8::try_from(c)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| Error::Config(format!("list.delimiter '{c}' must be an ASCII character"))),
        None => Ok(match format {
            InputFormat::Csv => b',',
            _ => b'\t',
        }),
    }
}

/// Reads the configured list file.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file is missing or no usable column is
/// found, or a CSV error for unreadable content.
pub fn read_list(config: &ListConfig) -> Result<Vec<ListEntry>> {
    let file = std::fs::File::open(&config.input).map_err(|e| {
        Error::Config(format!("cannot open list file {}: {e}", config.input.display()))
    })?;
    let format = effective_format(&config.input, config.format);
    parse_list(file, format, config)
}

/// Parses list content in an already-resolved format.
///
/// # Errors
///
/// See [`read_list`].
pub fn parse_list(mut input: impl Read, format: InputFormat, config: &ListConfig) -> Result<Vec<ListEntry>> {
    let delimiter = delimiter_byte(format, config.delimiter)?;
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let has_headers = match format {
        InputFormat::Txt => text
            .lines()
            .next()
            .is_some_and(|first| first.trim().eq_ignore_ascii_case(config.column.trim())),
        _ => true,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(format != InputFormat::Txt)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let mut columns: Vec<String> = Vec::new();
    if has_headers
        && let Some(header) = records.next()
    {
        columns = header?.iter().map(|h| h.trim().to_string()).collect();
    }
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in records {
        rows.push(record?.iter().map(|c| c.trim().to_string()).collect());
    }
    if !has_headers {
        let width = rows.iter().map(Vec::len).max().unwrap_or(1);
        columns = (0..width).map(|i| i.to_string()).collect();
        if width == 1 {
            columns[0] = config.column.trim().to_string();
        }
    }

    let index = |name: &str| columns.iter().position(|c| c == name);
    let cell = |row: &Vec<String>, i: usize| row.get(i).cloned().unwrap_or_default();
    let source_idx = index(config.source_column.trim()).filter(|_| !config.source_column.trim().is_empty());
    let source = |row: &Vec<String>| source_idx.map(|i| cell(row, i)).unwrap_or_default();

    if let Some(i) = index(config.column.trim()) {
        return Ok(rows
            .iter()
            .map(|row| ListEntry {
                value: cell(row, i),
                source: source(row),
            })
            .collect());
    }

    let legacy: Vec<usize> = LEGACY_COLUMNS.iter().filter_map(|&c| index(c)).collect();
    if !legacy.is_empty() {
        log::info!("Merging legacy columns into '{}'", config.column);
        return Ok(rows
            .iter()
            .map(|row| ListEntry {
                value: legacy
                    .iter()
                    .map(|&i| cell(row, i))
                    .find(|v| !v.is_empty())
                    .unwrap_or_default(),
                source: source(row),
            })
            .collect());
    }

    if columns.len() == 1 {
        return Ok(rows
            .iter()
            .map(|row| ListEntry {
                value: cell(row, 0),
                source: String::new(),
            })
            .collect());
    }

    Err(Error::Config(format!(
        "list column '{}' not found and no legacy columns present; found columns: {columns:?}",
        config.column
    )))
}

/// Resolves list entries into a pool keyed by canonical title.
///
/// Empty and unresolvable rows are logged and skipped; the first row
/// resolving to a title wins.
///
/// # Errors
///
/// Only run-halting lookup errors propagate.
pub fn plan_from_list(
    lookup: &dyn Lookup,
    entries: &[ListEntry],
    config: &ListConfig,
) -> Result<FilePool> {
    let entries = config.range.apply(entries);
    let total = entries.len();
    let mut pool = FilePool::new();

    for (idx, entry) in entries.iter().enumerate() {
        let n = idx + 1;
        if entry.value.is_empty() {
            log::warn!("[list {n}/{total}] empty row, skipping");
            continue;
        }
        let resolved = resolve(lookup, &entry.value)?;
        if !resolved.is_resolved() {
            log::warn!("[list {n}/{total}] could not resolve {:?}, skipping", entry.value);
            continue;
        }
        log::info!("[list {n}/{total}] {} -> {}", entry.value, resolved.title);

        let source = if entry.source.is_empty() {
            config.source_tag.clone()
        } else {
            entry.source.clone()
        };
        let record = FileRecord::new(resolved.title, Origin::List(source), Vec::new())
            .with_numeric_id(Some(resolved.numeric_id))
            .with_asset_url(Some(resolved.asset_url));
        if !pool.insert(record) {
            log::debug!("[list {n}/{total}] duplicate of an earlier row");
        }
    }
    Ok(pool)
}
