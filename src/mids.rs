//! Numeric ids for a table of file URLs.
//!
//! The URL column is read, titles are looked up in batches, and two columns
//! (id and entity page URL) are written right after the URL column. Rows
//! that get no id are listed in a separate errors file.

use std::collections::{HashMap, HashSet};

use crate::catalog::{Lookup, TitleId};
use crate::config::MidsConfig;
use crate::error::{Error, Result};
use crate::sink::{Table, read_table_file, write_table_file};
use crate::url::{InputKind, classify, entity_page_url, extract_numeric_id};

/// Cell value for rows without an id.
pub const NOT_FOUND: &str = "NOT FOUND";

/// Second column of the errors file.
pub const ERROR_HEADER: &str = "Error";

/// What a URL cell points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlTarget {
    /// A `File:` title to look up.
    Title(String),
    /// A numeric id already present in the URL.
    Id(String),
    /// Nothing usable.
    Unparsed,
}

/// Reads the target of a URL cell. Only URLs count; bare text does not.
#[must_use]
pub fn target_of(cell: &str) -> UrlTarget {
    let cell = cell.trim();
    if !cell.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("http")) {
        return UrlTarget::Unparsed;
    }
    match classify(cell) {
        InputKind::PageUrl(title) | InputKind::AssetUrl { title, .. } => UrlTarget::Title(title),
        InputKind::NumericId(id) => UrlTarget::Id(id),
        InputKind::Title(_) | InputKind::Unrecognized => UrlTarget::Unparsed,
    }
}

fn reason(id: &TitleId) -> String {
    match id {
        TitleId::Found(_) => String::new(),
        TitleId::NoPage => "No page returned for title".to_string(),
        TitleId::NoPageId => "Page present but pageid missing".to_string(),
        TitleId::Missing => "Page missing or lookup failed".to_string(),
        TitleId::Failed(e) => e.clone(),
    }
}

/// Result of annotating a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidReport {
    /// Input table with the id columns in place.
    pub table: Table,
    /// One row per input row left without an id: the URL and the reason.
    pub errors: Table,
    /// Rows that got an id.
    pub found: usize,
}

/// Looks up ids for the URL column of `table`, `config.batch_size` titles
/// per request, each distinct title once.
///
/// Existing id columns are dropped and re-inserted right after the URL
/// column.
///
/// # Errors
///
/// Returns [`Error::Config`] if the URL column is missing, and run-halting
/// lookup errors.
pub fn annotate(lookup: &dyn Lookup, table: &Table, config: &MidsConfig) -> Result<MidReport> {
    let url_idx = table.column_index(&config.url_column).ok_or_else(|| {
        Error::Config(format!(
            "column '{}' not found; available: {:?}",
            config.url_column,
            table.columns()
        ))
    })?;

    let targets: Vec<UrlTarget> = table.rows().iter().map(|r| target_of(&r[url_idx])).collect();
    let mut seen = HashSet::new();
    let titles: Vec<String> = targets
        .iter()
        .filter_map(|t| match t {
            UrlTarget::Title(title) if seen.insert(title.clone()) => Some(title.clone()),
            _ => None,
        })
        .collect();

    let mut ids: HashMap<String, TitleId> = HashMap::with_capacity(titles.len());
    let batches = titles.chunks(config.batch_size.max(1));
    let batch_count = batches.len();
    for (n, batch) in batches.enumerate() {
        log::info!("Looking up batch {}/{batch_count} ({} title(s))", n + 1, batch.len());
        let outcomes = lookup.ids_for_titles(batch)?;
        ids.extend(batch.iter().cloned().zip(outcomes));
    }

    let kept: Vec<usize> = (0..table.columns().len())
        .filter(|&i| {
            let name = &table.columns()[i];
            *name != config.mid_column && *name != config.mid_url_column
        })
        .collect();
    let insert_at = kept.iter().position(|&i| i == url_idx).map_or(kept.len(), |p| p + 1);
    let mut columns: Vec<String> = kept.iter().map(|&i| table.columns()[i].clone()).collect();
    columns.splice(
        insert_at..insert_at,
        [config.mid_column.clone(), config.mid_url_column.clone()],
    );

    let mut out = Table::new(&columns);
    let mut errors = Table::new(&[config.url_column.as_str(), ERROR_HEADER]);
    let mut found = 0;
    for (row, target) in table.rows().iter().zip(&targets) {
        let url = &row[url_idx];
        let mid = match target {
            UrlTarget::Id(id) => Ok(id.clone()),
            UrlTarget::Title(title) => match ids.get(title) {
                Some(TitleId::Found(id)) => Ok(id.clone()),
                Some(other) => Err(reason(other)),
                None => Err(reason(&TitleId::Missing)),
            },
            UrlTarget::Unparsed => Err("Could not parse a File: title from URL".to_string()),
        };
        let (mid, mid_url) = match mid {
            Ok(id) if extract_numeric_id(&id).as_deref() == Some(id.as_str()) => {
                found += 1;
                let page = entity_page_url(&id);
                (id, page)
            }
            Ok(id) => {
                errors.push_row(vec![url.clone(), format!("Unexpected id '{id}'")]);
                (NOT_FOUND.to_string(), NOT_FOUND.to_string())
            }
            Err(why) => {
                errors.push_row(vec![url.clone(), why]);
                (NOT_FOUND.to_string(), NOT_FOUND.to_string())
            }
        };
        let mut cells: Vec<String> = kept.iter().map(|&i| row[i].clone()).collect();
        cells.splice(insert_at..insert_at, [mid, mid_url]);
        out.push_row(cells);
    }

    Ok(MidReport {
        table: out,
        errors,
        found,
    })
}

/// Annotates the configured table file in place and writes the errors
/// file when there are errors. A dry run writes nothing.
///
/// # Errors
///
/// Returns [`Error::Config`] for a missing input file or URL column, and
/// read, write or run-halting lookup errors.
pub fn run_mids(lookup: &dyn Lookup, config: &MidsConfig, dry_run: bool) -> Result<MidReport> {
    if !config.input.is_file() {
        return Err(Error::Config(format!(
            "cannot open input table {}",
            config.input.display()
        )));
    }
    let table = read_table_file(&config.input)?;
    log::info!("Read {} row(s) from {}", table.len(), config.input.display());
    let report = annotate(lookup, &table, config)?;

    if dry_run {
        log::info!("Dry run: {} left unchanged", config.input.display());
        return Ok(report);
    }
    write_table_file(&config.input, &report.table)?;
    log::info!("Updated {} in place", config.input.display());
    if !report.errors.is_empty() {
        write_table_file(&config.errors, &report.errors)?;
        log::warn!(
            "{} row(s) without id, listed in {}",
            report.errors.len(),
            config.errors.display()
        );
    }
    Ok(report)
}
