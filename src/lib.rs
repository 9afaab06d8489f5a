//! commons-dl - harvest files from Wikimedia Commons categories.
//!
//! The library walks category trees breadth-first, deduplicates the files it
//! meets, orders and slices the combined pool, and downloads the selection
//! into filesystem-safe paths while appending an audit log. The same inputs
//! can feed a metadata harvest ([`metadata`]), and a table of file URLs can
//! be annotated with numeric ids ([`mids`]). All remote
//! access goes through the traits in [`catalog`], so every stage can run
//! against in-memory doubles.
//!
//! # Example
//!
//! ```no_run
//! use commons_dl::{
//!     AppConfig, CommonsClient, CsvDirectorySink, Downloader, Layout, NoProgress, Ordering,
//!     RunOptions, SliceRange, plan_selection, select, traverse,
//! };
//!
//! # fn example() -> commons_dl::Result<()> {
//! let config = AppConfig::new().with_roots(vec!["Birds_of_Norway".into()]);
//! let client = CommonsClient::new(&config.network)?;
//!
//! let harvest = traverse(&client, "Birds_of_Norway", 1, &[".jpg".into()])?;
//! let harvests = [harvest];
//! let selection = select(&harvests, Ordering::Title, SliceRange::new(Some(1), Some(20)));
//!
//! let layout = Layout::new(&config.paths, "cats", true);
//! let options = RunOptions::new(&config, "CategoriesDownloads");
//! let mut sink = CsvDirectorySink::new(config.paths.log_location());
//! let stats = Downloader::new(&client, &client, layout, options)
//!     .run(&plan_selection(&selection), &mut sink, &NoProgress)?;
//! println!("Downloaded {} files", stats.downloaded);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod fs;
pub mod list_input;
pub mod metadata;
pub mod mids;
pub mod report;
pub mod resolve;
pub mod retry;
pub mod sanitize;
pub mod select;
pub mod sink;
pub mod stats;
pub mod traverse;
pub mod url;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use catalog::{
    ByteFetch, CommonsClient, FileMetadata, Lookup, LookupOutcome, MemberSource, MetadataFetch,
    TitleId,
};
pub use config::{AppConfig, MetadataInput, Mode};
pub use download::{
    DownloadProgress, Downloader, Layout, LogRow, NoProgress, PlannedItem, RunOptions, plan_pool,
    plan_selection,
};
pub use error::{Error, Result};
pub use fs::{FileSystem, StdFileSystem};
pub use metadata::{MetadataHarvester, MetadataItem, MetadataOptions};
pub use mids::{MidReport, annotate, run_mids};
pub use report::PlanReport;
pub use resolve::{Resolved, resolve};
pub use retry::RetryPolicy;
pub use sanitize::{sanitize_component, sanitize_filename};
pub use select::{Ordering, Selection, SliceRange, select};
pub use sink::{CsvDirectorySink, Table, TabularSink};
pub use stats::{RunStats, format_bytes, format_duration};
pub use traverse::{FilePool, FileRecord, Harvest, traverse};
