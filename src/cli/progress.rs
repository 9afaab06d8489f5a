//! Progress bars and summary reporting for CLI runs.

use std::cell::RefCell;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::download::{DownloadProgress, LogRow};
use crate::stats::{ItemOutcome, RunStats};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a spinner for a single file transfer.
fn make_file_bar(title: &str) -> ProgressBar {
    let bar = ProgressBar::no_length();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {bytes} @ {bytes_per_sec} - {msg}")
            .expect("progress template is valid"),
    );
    bar.set_message(title.to_string());
    bar
}

/// Creates the bar counting processed items.
fn make_total_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("Total [{bar:40.green/white}] {pos}/{len} files ({elapsed})")
            .expect("progress template is valid")
            .progress_chars("━━╌"),
    );
    bar
}

/// Terminal progress for the download pipeline.
pub struct CliProgress {
    multi: MultiProgress,
    total: ProgressBar,
    file: RefCell<Option<ProgressBar>>,
}

impl CliProgress {
    /// Creates bars for `total` items.
    pub fn new(total: usize) -> Self {
        let multi = MultiProgress::new();
        let total = multi.add(make_total_bar(total));
        total.enable_steady_tick(Duration::from_millis(250));
        Self {
            multi,
            total,
            file: RefCell::new(None),
        }
    }

    fn take_file_bar(&self) -> Option<ProgressBar> {
        self.file.borrow_mut().take()
    }

    /// Clears the bars.
    pub fn finish(&self) {
        if let Some(bar) = self.take_file_bar() {
            bar.finish_and_clear();
        }
        self.total.finish_and_clear();
        self.multi.clear().ok();
    }
}

impl DownloadProgress for CliProgress {
    fn on_item_start(&self, _index: usize, _total: usize, title: &str) {
        let bar = self.multi.insert_before(&self.total, make_file_bar(title));
        bar.enable_steady_tick(Duration::from_millis(250));
        if let Some(old) = self.file.borrow_mut().replace(bar) {
            old.finish_and_clear();
        }
    }

    fn on_bytes(&self, _title: &str, delta: u64) {
        if let Some(bar) = self.file.borrow().as_ref() {
            bar.inc(delta);
        }
    }

    fn on_item_done(&self, index: usize, total: usize, row: &LogRow, outcome: ItemOutcome) {
        if let Some(bar) = self.take_file_bar() {
            bar.finish_and_clear();
        }
        self.total.inc(1);
        let target = if row.local_subfolder.is_empty() {
            row.local_filename.clone()
        } else {
            format!("{}/{}", row.local_subfolder, row.local_filename)
        };
        let line = match outcome {
            ItemOutcome::Downloaded { .. } => format!("  [{index}/{total}] {} -> {target}", row.file_name),
            ItemOutcome::SkippedExisting => format!("  [{index}/{total}] {} (exists) {target}", row.file_name),
            ItemOutcome::Planned => format!("  [{index}/{total}] {} would save as {target}", row.file_name),
            ItemOutcome::WriteFailed => format!("  [{index}/{total}] {} (not stored)", row.file_name),
        };
        let _ = self.multi.println(line);
    }

    fn on_item_failed(&self, index: usize, total: usize, title: &str, error: &str) {
        if let Some(bar) = self.take_file_bar() {
            bar.abandon();
        }
        self.total.inc(1);
        let _ = self
            .multi
            .println(format!("  [{index}/{total}] {title} FAILED: {error}"));
    }

    fn on_flush(&self, rows: usize, location: &str) {
        let _ = self
            .multi
            .println(format!("  log: {rows} row(s) -> {location}"));
    }
}

/// Prints report lines.
pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Prints the run summary.
pub fn print_summary(stats: &RunStats, dry_run: bool) {
    if stats.processed == 0 && stats.failed == 0 {
        return;
    }
    println!("\n{SEPARATOR}");
    println!("Summary");
    println!("{SEPARATOR}");
    for line in stats.summary_lines(dry_run) {
        println!("  {line}");
    }
    println!("{SEPARATOR}");
}
