//! Source tree scanner
//!
//! Walks the source top-down in file-name order and feeds every entry to
//! the [`PathClassifier`]. Directories that are excluded, junctions or on a
//! different device (Unix mount points) are pruned. Unreadable directories
//! are recorded as errors and not descended.

use crate::error::{IoResultExt, ReplicaError, Result};
use crate::fs::classifier::{PathClassifier, ScanContext};
use crate::fs::exclusion::ExclusionSet;
use crate::progress::ProgressReporter;
use crate::sync::Inventory;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Result of a scan
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Root path that was scanned
    pub root: PathBuf,
    /// Frozen inventory
    pub inventory: Inventory,
    /// Rules at the end of the scan, discovered siblings and junctions included
    pub exclusions: ExclusionSet,
    /// Directories visited, pruned ones excluded
    pub dirs_scanned: u64,
    /// Non-directory entries visited
    pub files_scanned: u64,
    /// Scan duration
    pub scan_duration: Duration,
}

impl ScanResult {
    /// Print the post-scan summary
    pub fn print_summary(&self) {
        let inv = &self.inventory;
        println!("Hardlinks:   {}", inv.hardlinks.len());
        println!("Attributes:  {} directories", inv.attributed_dirs.len());
        if !inv.junctions.is_empty() {
            println!("Junctions:   {}", inv.junctions.len());
            for junction in &inv.junctions {
                println!("  {}", junction);
            }
        }
        println!("Exclude:     {:?}", self.exclusions.all_rules());
        println!("Total dirs:  {}", inv.dir_count());
        println!("Total files: {}", inv.file_count());
        println!("Total links: {}", inv.link_count());
        println!(
            "Total size:  {:.2} GB, {} bytes ({})",
            inv.total_size as f64 / (1024.0 * 1024.0 * 1024.0),
            inv.total_size,
            humansize::format_size(inv.total_size, humansize::BINARY)
        );
        println!("Scan time:   {:.2?}", self.scan_duration);
        if !inv.errors.is_empty() {
            println!("OS errors:   {}", inv.errors.len());
            for path in &inv.errors {
                println!("  {}", path);
            }
        }
    }
}

/// Configuration for the scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Do not cross into other filesystems
    pub prune_mounts: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { prune_mounts: true }
    }
}

/// Top-down scanner building the inventory
pub struct ScanEngine {
    classifier: PathClassifier,
    config: ScanConfig,
    progress: Option<Arc<ProgressReporter>>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl ScanEngine {
    /// Create a scanner
    pub fn new(classifier: PathClassifier, config: ScanConfig) -> Self {
        Self {
            classifier,
            config,
            progress: None,
            cancelled: None,
        }
    }

    /// Publish live counters to a progress reporter
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop the walk with [`ReplicaError::Cancelled`] once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Scan `root` starting from `exclusions`
    pub fn scan(&self, root: &Path, exclusions: ExclusionSet) -> Result<ScanResult> {
        let start = Instant::now();
        let root_meta = std::fs::metadata(root).with_path(root)?;
        if !root_meta.is_dir() {
            return Err(ReplicaError::InvalidPath(format!("{} is not a directory", root.display())));
        }
        let root_device = device_of(&root_meta);

        let mut ctx = ScanContext::new(exclusions).with_root(root);
        let mut dirs_scanned = 0u64;
        let mut files_scanned = 0u64;

        let mut walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            if self.is_cancelled() {
                info!("Scan of {} cancelled", root.display());
                return Err(ReplicaError::Cancelled);
            }
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    warn!("Cannot read {}: {}", path.display(), err);
                    ctx.inventory.record_error(path.to_string_lossy().into_owned());
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            if is_dir {
                if self.config.prune_mounts && self.crosses_device(&entry, root_device) {
                    info!("Not crossing mount point {}", entry.path().display());
                    walker.skip_current_dir();
                    continue;
                }
                dirs_scanned += 1;
            } else {
                files_scanned += 1;
            }

            let outcome = self.classifier.classify(&mut ctx, entry.path(), is_dir);
            if is_dir && !outcome.allows_descent() {
                walker.skip_current_dir();
            }

            if let Some(progress) = &self.progress {
                progress.scan_tick(dirs_scanned + 1, files_scanned);
            }
        }

        let ScanContext {
            inventory,
            exclusions,
            ..
        } = ctx;

        info!(
            "Scanned {}: {} dirs, {} files, {} links, {} errors",
            root.display(),
            inventory.dir_count(),
            inventory.file_count(),
            inventory.link_count(),
            inventory.errors.len()
        );

        Ok(ScanResult {
            root: root.to_path_buf(),
            inventory,
            exclusions,
            dirs_scanned,
            files_scanned,
            scan_duration: start.elapsed(),
        })
    }

    fn crosses_device(&self, entry: &walkdir::DirEntry, root_device: Option<u64>) -> bool {
        match (root_device, entry.metadata().ok()) {
            (Some(root), Some(meta)) => device_of(&meta).map(|d| d != root).unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(unix)]
fn device_of(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.dev())
}

#[cfg(not(unix))]
fn device_of(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
