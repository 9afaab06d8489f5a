//! Per-run counters and their human-readable summary.

use std::time::{Duration, Instant};

/// Outcome of a single processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Bytes were written to disk.
    Downloaded {
        /// Size written.
        bytes: u64,
    },
    /// The file already existed and overwrite is off.
    SkippedExisting,
    /// Dry run: nothing written.
    Planned,
    /// Fetched but could not be stored; logged without a local file.
    WriteFailed,
}

/// Statistics for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Items that produced a log row.
    pub processed: usize,
    /// Items whose bytes were written.
    pub downloaded: usize,
    /// Items left alone because the file already existed.
    pub skipped_existing: usize,
    /// Items that failed and produced no row.
    pub failed: usize,
    /// Items whose bytes could not be stored.
    pub write_failed: usize,
    /// Total bytes written.
    pub bytes: u64,
    /// Rows handed to the log sink.
    pub rows_flushed: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunStats {
    /// Summary lines for the end of a run.
    #[must_use]
    pub fn summary_lines(&self, dry_run: bool) -> Vec<String> {
        let mut lines = vec![format!(
            "{}Processed {} file(s) in {}",
            if dry_run { "(dry run) " } else { "" },
            self.processed,
            format_duration(self.elapsed)
        )];
        if !dry_run {
            lines.push(format!(
                "Downloaded: {} ({}) | already present: {} | not stored: {}",
                self.downloaded,
                format_bytes(self.bytes),
                self.skipped_existing,
                self.write_failed
            ));
            lines.push(format!("Log rows flushed: {}", self.rows_flushed));
        }
        if self.failed > 0 {
            lines.push(format!("Failed: {}", self.failed));
        }
        lines
    }
}

/// Accumulates [`RunStats`] while the pipeline runs.
#[derive(Debug)]
pub struct RunStatsBuilder {
    stats: RunStats,
    start_time: Instant,
}

impl Default for RunStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatsBuilder {
    /// Starts the clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: RunStats::default(),
            start_time: Instant::now(),
        }
    }

    /// Records an item that produced a row.
    pub const fn record(&mut self, outcome: ItemOutcome) {
        self.stats.processed += 1;
        match outcome {
            ItemOutcome::Downloaded { bytes } => {
                self.stats.downloaded += 1;
                self.stats.bytes += bytes;
            }
            ItemOutcome::SkippedExisting => self.stats.skipped_existing += 1,
            ItemOutcome::WriteFailed => self.stats.write_failed += 1,
            ItemOutcome::Planned => {}
        }
    }

    /// Records an item that was dropped.
    pub const fn record_failure(&mut self) {
        self.stats.failed += 1;
    }

    /// Records rows written to the sink.
    pub const fn add_flushed(&mut self, rows: usize) {
        self.stats.rows_flushed += rows;
    }

    /// Builds the final statistics.
    #[must_use]
    pub fn build(self) -> RunStats {
        RunStats {
            elapsed: self.start_time.elapsed(),
            ..self.stats
        }
    }
}

/// Formats a byte count with binary units (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = None;
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = Some(u);
    }
    unit.map_or_else(|| format!("{bytes} B"), |u| format!("{value:.2} {u}"))
}

/// Formats a duration as `4.2s`, `3m 07s` or `1h 02m 03s`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        3600.. => format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60),
        60.. => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{secs}.{}s", d.subsec_millis() / 100),
    }
}
