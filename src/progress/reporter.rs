//! Progress reporter implementation
//!
//! Uses indicatif for a status spinner plus one bar each for files,
//! directories, links and bytes. Counters are atomics so the reporter can
//! be shared behind an `Arc` and read from a signal-driven shutdown path.
//! The engines only write to it; nothing reads it back for control.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const BAR_TEMPLATE: &str = "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)";

fn counter_bar(multi: &MultiProgress, prefix: &'static str) -> ProgressBar {
    let bar = multi.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_prefix(prefix);
    bar
}

/// Progress reporter for replication runs
pub struct ProgressReporter {
    multi: MultiProgress,
    status: ProgressBar,
    files_bar: ProgressBar,
    dirs_bar: ProgressBar,
    links_bar: ProgressBar,
    bytes_bar: ProgressBar,
    start_time: Instant,
    total_files: AtomicU64,
    total_dirs: AtomicU64,
    total_links: AtomicU64,
    total_bytes: AtomicU64,
    files_done: AtomicU64,
    dirs_done: AtomicU64,
    links_done: AtomicU64,
    bytes_done: AtomicU64,
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            status.set_style(style);
        }

        let files_bar = counter_bar(&multi, "Files");
        let dirs_bar = counter_bar(&multi, "Dirs ");
        let links_bar = counter_bar(&multi, "Links");

        let bytes_bar = multi.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})")
        {
            bytes_bar.set_style(style.progress_chars("=> "));
        }
        bytes_bar.set_prefix("Data ");

        Self {
            multi,
            status,
            files_bar,
            dirs_bar,
            links_bar,
            bytes_bar,
            start_time: Instant::now(),
            total_files: AtomicU64::new(0),
            total_dirs: AtomicU64::new(0),
            total_links: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            files_done: AtomicU64::new(0),
            dirs_done: AtomicU64::new(0),
            links_done: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode and tests)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Set the totals the bars count towards
    pub fn set_totals(&self, files: u64, dirs: u64, links: u64, bytes: u64) {
        self.total_files.store(files, Ordering::Relaxed);
        self.total_dirs.store(dirs, Ordering::Relaxed);
        self.total_links.store(links, Ordering::Relaxed);
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.files_bar.set_length(files);
        self.dirs_bar.set_length(dirs);
        self.links_bar.set_length(links);
        self.bytes_bar.set_length(bytes);
    }

    /// Advance the file counter
    pub fn increment_files(&self, count: u64) {
        self.files_done.fetch_add(count, Ordering::Relaxed);
        self.files_bar.inc(count);
    }

    /// Advance the directory counter
    pub fn increment_dirs(&self, count: u64) {
        self.dirs_done.fetch_add(count, Ordering::Relaxed);
        self.dirs_bar.inc(count);
    }

    /// Advance the link counter
    pub fn increment_links(&self, count: u64) {
        self.links_done.fetch_add(count, Ordering::Relaxed);
        self.links_bar.inc(count);
    }

    /// Advance the byte counter
    pub fn increment_bytes(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.bytes_bar.inc(bytes);
    }

    /// Take back a file that was counted before its copy failed
    pub fn retract_file(&self, bytes: u64) {
        let files = saturating_sub(&self.files_done, 1);
        let done = saturating_sub(&self.bytes_done, bytes);
        self.files_bar.set_position(files);
        self.bytes_bar.set_position(done);
    }

    /// Show live scan counters in the status line
    pub fn scan_tick(&self, dirs: u64, files: u64) {
        self.status
            .set_message(format!("Scanning: {} directories, {} files", dirs, files));
        self.status.tick();
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Set current path being copied
    pub fn set_current_file(&self, path: &str) {
        let display = if path.chars().count() > 60 {
            let tail: String = path.chars().rev().take(57).collect::<Vec<_>>().into_iter().rev().collect();
            format!("...{}", tail)
        } else {
            path.to_string()
        };
        self.status.set_message(display);
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get current throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let bytes = self.bytes_done.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            bytes as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        for bar in [&self.files_bar, &self.dirs_bar, &self.links_bar, &self.bytes_bar] {
            bar.finish();
        }
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        for bar in [&self.files_bar, &self.dirs_bar, &self.links_bar, &self.bytes_bar] {
            bar.abandon();
        }
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Get progress summary
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            total_files: self.total_files.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            total_dirs: self.total_dirs.load(Ordering::Relaxed),
            dirs_done: self.dirs_done.load(Ordering::Relaxed),
            total_links: self.total_links.load(Ordering::Relaxed),
            links_done: self.links_done.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            throughput: self.throughput(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_sub(counter: &AtomicU64, by: u64) -> u64 {
    let prev = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(by)))
        .unwrap_or(0);
    prev.saturating_sub(by)
}

/// Progress summary
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Files to copy
    pub total_files: u64,
    /// Files copied so far
    pub files_done: u64,
    /// Directories to create, the root included
    pub total_dirs: u64,
    /// Directories created so far
    pub dirs_done: u64,
    /// Links to recreate
    pub total_links: u64,
    /// Links recreated so far
    pub links_done: u64,
    /// Bytes to copy
    pub total_bytes: u64,
    /// Bytes copied so far
    pub bytes_done: u64,
    /// Elapsed time
    pub elapsed: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
}

impl ProgressSummary {
    /// Get byte completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes_done as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Print summary to console
    pub fn print(&self) {
        println!("Progress: {:.1}%", self.percentage());
        println!("Files:    {}/{}", self.files_done, self.total_files);
        println!("Dirs:     {}/{}", self.dirs_done, self.total_dirs);
        println!("Links:    {}/{}", self.links_done, self.total_links);
        println!(
            "Bytes:    {}/{}",
            humansize::format_size(self.bytes_done, humansize::BINARY),
            humansize::format_size(self.total_bytes, humansize::BINARY)
        );
        println!("Elapsed:  {:.1?}", self.elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::disabled();
        reporter.set_totals(10, 3, 1, 1000);

        reporter.increment_bytes(500);
        reporter.increment_files(5);
        reporter.increment_dirs(2);

        let summary = reporter.summary();
        assert_eq!(summary.bytes_done, 500);
        assert_eq!(summary.files_done, 5);
        assert_eq!(summary.dirs_done, 2);
        assert_eq!(summary.percentage(), 50.0);
    }

    #[test]
    fn test_retract_file() {
        let reporter = ProgressReporter::disabled();
        reporter.set_totals(2, 1, 0, 100);
        reporter.increment_files(1);
        reporter.increment_bytes(40);
        reporter.retract_file(40);

        let summary = reporter.summary();
        assert_eq!(summary.files_done, 0);
        assert_eq!(summary.bytes_done, 0);

        // never underflows
        reporter.retract_file(10);
        assert_eq!(reporter.summary().files_done, 0);
    }

    #[test]
    fn test_current_file_truncation() {
        let reporter = ProgressReporter::disabled();
        reporter.set_current_file(&"x".repeat(100));
        reporter.set_current_file("short");
        assert!(!reporter.is_enabled());
    }
}
