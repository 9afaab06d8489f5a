//! Terminal front-end: argument parsing, plan printing, confirmation and
//! progress bars around the library pipeline.

mod progress;

use std::path::PathBuf;

use console::Term;

use crate::catalog::CommonsClient;
use crate::config::{AppConfig, MetadataInput, Mode};
use crate::download::{Downloader, Layout, RunOptions, plan_pool, plan_selection};
use crate::error::{Error, Result};
use crate::list_input::{plan_from_list, read_list};
use crate::metadata::{
    MetadataHarvester, MetadataOptions, items_from_list, items_from_selection, record_harvest,
};
use crate::mids::run_mids;
use crate::report::PlanReport;
use crate::select::{SliceRange, select};
use crate::sink::CsvDirectorySink;
use crate::stats::RunStats;
use crate::traverse::{Harvest, normalize_extensions, traverse};

use progress::{CliProgress, print_lines, print_summary};

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Explicit config file.
    pub config: Option<PathBuf>,
    /// Mode override.
    pub mode: Option<Mode>,
    /// Force a dry run.
    pub dry_run: bool,
    /// Force overwriting.
    pub overwrite: bool,
    /// Skip the confirmation prompt.
    pub yes: bool,
    /// Traversal depth override.
    pub depth: Option<usize>,
    /// Slice override for the active mode.
    pub range: Option<SliceRange>,
}

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print usage and exit.
    Help,
    /// Run with the given overrides.
    Run(CliArgs),
}

/// Prints usage to stderr.
pub fn print_usage() {
    eprintln!("Usage: commons-dl [OPTIONS]");
    eprintln!();
    eprintln!("Harvests files or metadata from Wikimedia Commons categories or a list file,");
    eprintln!("or adds numeric ids to a table of file URLs.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>     Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  -m, --mode <MODE>       categories | list | metadata | mids");
    eprintln!("  -d, --depth <N>         Subcategory levels to expand");
    eprintln!("  -r, --range <S:E>       1-based inclusive slice (either end may be empty)");
    eprintln!("  -n, --dry-run           Resolve and report only; write nothing");
    eprintln!("  -f, --overwrite         Re-download files that already exist");
    eprintln!("  -y, --yes               Do not ask for confirmation");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RUST_LOG                Log filter (default: info)");
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| Error::Config(format!("{flag} requires a value")))
}

/// Parses `START:END` where either side may be empty.
///
/// # Errors
///
/// Returns [`Error::Config`] for a missing colon or a non-numeric bound.
pub fn parse_range(text: &str) -> Result<SliceRange> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("range '{text}' must look like START:END")))?;
    let bound = |s: &str| -> Result<Option<usize>> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("range bound '{s}' is not a number")))
    };
    Ok(SliceRange::new(bound(start)?, bound(end)?))
}

/// Parses command-line arguments (without the program name).
///
/// # Errors
///
/// Returns [`Error::Config`] for unknown options or bad values.
pub fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command> {
    let args: Vec<String> = args.into_iter().collect();
    let mut parsed = CliArgs::default();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "-c" | "--config" => {
                i += 1;
                parsed.config = Some(PathBuf::from(value(&args, i, flag)?));
            }
            "-m" | "--mode" => {
                i += 1;
                parsed.mode = Some(value(&args, i, flag)?.parse()?);
            }
            "-d" | "--depth" => {
                i += 1;
                let raw = value(&args, i, flag)?;
                parsed.depth = Some(
                    raw.parse()
                        .map_err(|_| Error::Config(format!("depth '{raw}' is not a number")))?,
                );
            }
            "-r" | "--range" => {
                i += 1;
                parsed.range = Some(parse_range(value(&args, i, flag)?)?);
            }
            "-n" | "--dry-run" => parsed.dry_run = true,
            "-f" | "--overwrite" => parsed.overwrite = true,
            "-y" | "--yes" => parsed.yes = true,
            "-h" | "--help" => return Ok(Command::Help),
            other => return Err(Error::Config(format!("unknown option: {other}"))),
        }
        i += 1;
    }
    Ok(Command::Run(parsed))
}

impl CliArgs {
    /// Applies the overrides on top of a loaded config.
    #[must_use]
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(mode) = self.mode {
            config = config.with_mode(mode);
        }
        if self.dry_run {
            config = config.with_dry_run(true);
        }
        if self.overwrite {
            config = config.with_overwrite(true);
        }
        if self.yes {
            config = config.with_confirm(false);
        }
        if let Some(depth) = self.depth {
            config = config.with_depth(depth);
        }
        if let Some(range) = self.range {
            config = match config.run.mode {
                Mode::Categories => config.with_global_range(range),
                Mode::List => config.with_list_range(range),
                Mode::Metadata => match config.metadata.source {
                    MetadataInput::Categories => config.with_global_range(range),
                    MetadataInput::List => config.with_list_range(range),
                },
                Mode::Mids => {
                    log::warn!("--range has no effect in mids mode");
                    config
                }
            };
        }
        config
    }
}

/// Asks for confirmation on the terminal. Dry runs and `confirm = false`
/// never ask.
fn confirmed(config: &AppConfig, count: usize) -> Result<bool> {
    if config.run.dry_run || !config.run.confirm {
        return Ok(true);
    }
    let term = Term::stdout();
    term.write_str(&format!("Proceed with {count} file(s)? [y/N] "))?;
    let answer = term.read_line()?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn harvest_roots(client: &CommonsClient, config: &AppConfig) -> Result<Vec<Harvest>> {
    let roots = config.categories.selected_roots();
    let extensions = normalize_extensions(&config.run.extensions);
    println!(
        "Harvesting {} root(s) to depth {}...\n",
        roots.len(),
        config.categories.depth
    );

    let mut harvests = Vec::with_capacity(roots.len());
    for root in &roots {
        match traverse(client, root, config.categories.depth, &extensions) {
            Ok(harvest) => harvests.push(harvest),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::error!("Category:{root}: listing failed, skipping root: {e}"),
        }
    }
    Ok(harvests)
}

fn run_categories(client: &CommonsClient, config: &AppConfig) -> Result<RunStats> {
    let harvests = harvest_roots(client, config)?;
    print_lines(&PlanReport::new(&harvests).render());

    let range = config.categories.global_range;
    let selection = select(&harvests, config.categories.ordering, range);
    println!(
        "\nOrdering: {} | selecting {} -> {} file(s)",
        config.categories.ordering,
        range.describe(selection.pool_size),
        selection.len()
    );
    for harvest in &harvests {
        println!("  Category:{}: {}", harvest.root, selection.count_for(&harvest.root));
    }

    if selection.is_empty() {
        println!("Nothing to download.");
        return Ok(RunStats::default());
    }
    if !confirmed(config, selection.len())? {
        println!("Aborted.");
        return Ok(RunStats::default());
    }

    let items = plan_selection(&selection);
    let layout = Layout::new(
        &config.paths,
        &config.categories.download_subfolder,
        config.categories.flatten,
    );
    let options = RunOptions::new(config, &config.categories.sheet_name);
    let mut sink = CsvDirectorySink::new(config.paths.log_location());

    let downloader = Downloader::new(client, client, layout, options);
    let progress = CliProgress::new(items.len());
    let stats = downloader.run(&items, &mut sink, &progress);
    progress.finish();
    stats
}

fn run_list(client: &CommonsClient, config: &AppConfig) -> Result<RunStats> {
    let entries = read_list(&config.list)?;
    println!(
        "Read {} row(s) from {}",
        entries.len(),
        config.list.input.display()
    );
    let pool = plan_from_list(client, &entries, &config.list)?;
    println!(
        "Rows {} resolved to {} unique file(s)",
        config.list.range.describe(entries.len()),
        pool.len()
    );

    if pool.is_empty() {
        println!("Nothing to download.");
        return Ok(RunStats::default());
    }
    if !confirmed(config, pool.len())? {
        println!("Aborted.");
        return Ok(RunStats::default());
    }

    let items = plan_pool(&pool);
    let layout = Layout::new(&config.paths, &config.list.download_subfolder, false);
    let options = RunOptions::new(config, &config.list.sheet_name);
    let mut sink = CsvDirectorySink::new(config.paths.log_location());

    let downloader = Downloader::new(client, client, layout, options);
    let progress = CliProgress::new(items.len());
    let stats = downloader.run(&items, &mut sink, &progress);
    progress.finish();
    stats
}

fn run_metadata(client: &CommonsClient, config: &AppConfig) -> Result<RunStats> {
    let items = match config.metadata.source {
        MetadataInput::Categories => {
            let harvests = harvest_roots(client, config)?;
            print_lines(&PlanReport::new(&harvests).render());
            let range = config.categories.global_range;
            let selection = select(&harvests, config.categories.ordering, range);
            println!(
                "\nOrdering: {} | selecting {} -> {} file(s)",
                config.categories.ordering,
                range.describe(selection.pool_size),
                selection.len()
            );
            let items = items_from_selection(&selection);
            if !config.run.dry_run && !items.is_empty() {
                let mut sink = CsvDirectorySink::new(config.paths.log_location());
                let rows = record_harvest(&mut sink, &config.metadata.harvest_sheet, &items)?;
                println!("{}: {rows} row(s)", config.metadata.harvest_sheet);
            }
            items
        }
        MetadataInput::List => {
            let entries = read_list(&config.list)?;
            println!(
                "Read {} row(s) from {}; using rows {}",
                entries.len(),
                config.list.input.display(),
                config.list.range.describe(entries.len())
            );
            items_from_list(client, &entries, &config.list)?
        }
    };

    if items.is_empty() {
        println!("Nothing to fetch.");
        return Ok(RunStats::default());
    }
    if !confirmed(config, items.len())? {
        println!("Aborted.");
        return Ok(RunStats::default());
    }

    let harvester = MetadataHarvester::new(client, MetadataOptions::new(config));
    let mut sink = CsvDirectorySink::new(config.paths.log_location());
    let progress = CliProgress::new(items.len());
    let stats = harvester.run(&items, &mut sink, &progress);
    progress.finish();
    stats
}

fn run_ids(client: &CommonsClient, config: &AppConfig) -> Result<()> {
    let report = run_mids(client, &config.mids, config.run.dry_run)?;
    println!(
        "{} row(s): {} with id, {} without",
        report.table.len(),
        report.found,
        report.errors.len()
    );
    if !report.errors.is_empty() && !config.run.dry_run {
        println!("Errors written to {}", config.mids.errors.display());
    }
    Ok(())
}

/// Loads configuration, applies `args` and runs the selected mode.
///
/// # Errors
///
/// Returns configuration errors before any work starts, and run-halting
/// errors from the catalog.
pub fn run(args: &CliArgs) -> Result<()> {
    let config = args.apply(AppConfig::load(args.config.as_deref())?);
    config.validate()?;
    log::debug!("Effective config: {config:?}");

    let client = CommonsClient::new(&config.network)?;
    let stats = match config.run.mode {
        Mode::Categories => run_categories(&client, &config)?,
        Mode::List => run_list(&client, &config)?,
        Mode::Metadata => run_metadata(&client, &config)?,
        Mode::Mids => return run_ids(&client, &config),
    };
    print_summary(&stats, config.run.dry_run);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Command> {
        parse_args(list.iter().map(ToString::to_string))
    }

    fn run_args(list: &[&str]) -> CliArgs {
        match args(list).unwrap() {
            Command::Run(parsed) => parsed,
            Command::Help => panic!("expected run"),
        }
    }

    #[test]
    fn no_args_is_default_run() {
        assert_eq!(run_args(&[]), CliArgs::default());
    }

    #[test]
    fn help_wins() {
        assert_eq!(args(&["--dry-run", "-h"]).unwrap(), Command::Help);
    }

    #[test]
    fn all_options() {
        let parsed = run_args(&[
            "--config", "c.toml", "--mode", "list", "-d", "2", "-r", "3:10", "-n", "-f", "-y",
        ]);
        assert_eq!(parsed.config, Some(PathBuf::from("c.toml")));
        assert_eq!(parsed.mode, Some(Mode::List));
        assert_eq!(parsed.depth, Some(2));
        assert_eq!(parsed.range, Some(SliceRange::new(Some(3), Some(10))));
        assert!(parsed.dry_run && parsed.overwrite && parsed.yes);
    }

    #[test]
    fn bad_input_is_config_error() {
        assert!(matches!(args(&["--bogus"]), Err(Error::Config(_))));
        assert!(matches!(args(&["--depth"]), Err(Error::Config(_))));
        assert!(matches!(args(&["--depth", "x"]), Err(Error::Config(_))));
        assert!(matches!(args(&["--mode", "gallery"]), Err(Error::Config(_))));
    }

    #[test]
    fn open_ended_ranges() {
        assert_eq!(parse_range("5:").unwrap(), SliceRange::new(Some(5), None));
        assert_eq!(parse_range(":7").unwrap(), SliceRange::new(None, Some(7)));
        assert_eq!(parse_range(":").unwrap(), SliceRange::default());
        assert!(parse_range("5").is_err());
        assert!(parse_range("a:2").is_err());
    }

    #[test]
    fn range_targets_active_mode() {
        let range = SliceRange::new(Some(2), Some(4));
        let cats = run_args(&["-r", "2:4"]).apply(AppConfig::new());
        assert_eq!(cats.categories.global_range, range);
        assert_eq!(cats.list.range, SliceRange::default());

        let list = run_args(&["-m", "list", "-r", "2:4"]).apply(AppConfig::new());
        assert_eq!(list.list.range, range);
        assert_eq!(list.categories.global_range, SliceRange::default());
    }

    #[test]
    fn metadata_range_follows_its_source() {
        let range = SliceRange::new(Some(1), Some(3));
        let from_list = run_args(&["-m", "metadata", "-r", "1:3"]).apply(AppConfig::new());
        assert_eq!(from_list.run.mode, Mode::Metadata);
        assert_eq!(from_list.list.range, range);
        assert_eq!(from_list.categories.global_range, SliceRange::default());

        let from_cats = run_args(&["-m", "metadata", "-r", "1:3"])
            .apply(AppConfig::new().with_metadata_input(MetadataInput::Categories));
        assert_eq!(from_cats.categories.global_range, range);
        assert_eq!(from_cats.list.range, SliceRange::default());
    }

    #[test]
    fn range_ignored_for_mids() {
        let config = run_args(&["-m", "mids", "-r", "1:3"]).apply(AppConfig::new());
        assert_eq!(config.run.mode, Mode::Mids);
        assert_eq!(config.list.range, SliceRange::default());
        assert_eq!(config.categories.global_range, SliceRange::default());
    }

    #[test]
    fn flags_override_config() {
        let config = run_args(&["-y", "-n", "-d", "3"]).apply(AppConfig::new());
        assert!(!config.run.confirm);
        assert!(config.run.dry_run);
        assert_eq!(config.categories.depth, 3);
    }

    #[test]
    fn reversed_range_rejected_by_validation() {
        let config = run_args(&["-r", "9:2"])
            .apply(AppConfig::new().with_roots(vec!["Birds".into()]));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
