//! Replication orchestration
//!
//! Ties the stages together. A fresh run truncates the session, scans the
//! source and writes the snapshot; a resumed run starts from a snapshot
//! read back from disk. Both then drive the copy pass and, unless it was
//! cancelled, the metadata replay. Paths that failed anywhere are appended
//! to the session's error file.

use crate::config::ReplicaConfig;
use crate::core::copier::{CopyEngine, CopyJob, CopyReport};
use crate::core::replay::{MetadataReplayer, ReplayReport};
use crate::error::Result;
use crate::fs::{Capabilities, CopyPrimitive, ExclusionSet, FileCopier, PathClassifier, ScanConfig, ScanEngine, ScanResult};
use crate::progress::ProgressReporter;
use crate::sync::{Inventory, Session, SessionHeader, SessionLog};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of a whole replication run
#[derive(Debug, Clone)]
pub struct ReplicationResult {
    /// Copy pass report
    pub copy: CopyReport,
    /// Replay report, absent when the copy pass was cancelled
    pub replay: Option<ReplayReport>,
    /// Paths the scan could not read
    pub scan_errors: Vec<String>,
    /// Whether this run continued an earlier session
    pub resumed: bool,
    /// Duration of copy and replay
    pub duration: Duration,
}

impl ReplicationResult {
    /// Whether the run stopped on a cancellation request
    pub fn is_cancelled(&self) -> bool {
        self.copy.cancelled
    }

    /// Check if every stage succeeded for every path
    pub fn is_success(&self) -> bool {
        self.copy.is_success()
            && self.scan_errors.is_empty()
            && self.replay.as_ref().map(|r| r.is_success()).unwrap_or(false)
    }

    /// Every path that failed, scan errors first
    pub fn failed_paths(&self) -> Vec<String> {
        let mut paths = self.scan_errors.clone();
        paths.extend(self.copy.failures.iter().map(|f| f.path.clone()));
        if let Some(replay) = &self.replay {
            paths.extend(replay.failures.iter().map(|f| f.path.clone()));
        }
        paths
    }

    /// Print result summary
    pub fn print_summary(&self) {
        println!();
        println!("=== Replication {} ===", if self.resumed { "Resumed" } else { "Complete" });
        println!("Files copied:    {}", self.copy.files_copied);
        if self.copy.files_skipped > 0 {
            println!("Files skipped:   {} (already copied)", self.copy.files_skipped);
        }
        println!("Dirs created:    {}", self.copy.dirs_created);
        println!("Symlinks:        {}", self.copy.links_copied);
        println!(
            "Data copied:     {}",
            humansize::format_size(self.copy.bytes_copied, humansize::BINARY)
        );
        match &self.replay {
            Some(replay) => {
                println!("Attributes:      {}", replay.attributes_applied);
                println!("Junctions:       {}", replay.junctions_created);
                println!("Hardlinks:       {}", replay.hardlinks_created);
                if replay.already_present > 0 {
                    println!("Already linked:  {}", replay.already_present);
                }
            }
            None => println!("Metadata replay: skipped"),
        }
        println!("Duration:        {:.2?}", self.duration);

        let failed = self.failed_paths();
        if !failed.is_empty() {
            println!();
            println!("Failed paths ({}):", failed.len());
            for path in failed.iter().take(10) {
                println!("  {}", path);
            }
            if failed.len() > 10 {
                println!("  ... and {} more", failed.len() - 10);
            }
        }
    }
}

/// Runs a replication end to end against one session file
pub struct Replicator {
    config: ReplicaConfig,
    caps: Capabilities,
    copier: Arc<dyn CopyPrimitive>,
    progress: Arc<ProgressReporter>,
    cancelled: Arc<AtomicBool>,
    session: SessionLog,
}

impl Replicator {
    /// Create a replicator with native capabilities and no visible progress
    pub fn new(config: ReplicaConfig) -> Self {
        let caps = Capabilities::native(&config.source);
        let session = SessionLog::new(&config.session);
        Self {
            config,
            caps,
            copier: Arc::new(FileCopier),
            progress: Arc::new(ProgressReporter::disabled()),
            cancelled: Arc::new(AtomicBool::new(false)),
            session,
        }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the platform capabilities
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Replace the copy primitive
    pub fn with_copier(mut self, copier: Arc<dyn CopyPrimitive>) -> Self {
        self.copier = copier;
        self
    }

    /// Share an existing cancellation flag
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Get cancellation flag for external control
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// The configuration this replicator runs with
    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// The session file this replicator writes
    pub fn session(&self) -> &SessionLog {
        &self.session
    }

    /// The progress reporter shared with the engines
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Truncate the session, scan the source and write the snapshot
    pub fn prepare(&self) -> Result<ScanResult> {
        self.config.check_destination()?;
        self.session.truncate()?;
        let exclusions = ExclusionSet::from_rules(self.config.effective_excludes())?;

        self.progress.set_status("Scanning source");
        let scan = ScanEngine::new(PathClassifier::new(self.caps.clone()), ScanConfig::default())
            .with_progress(Arc::clone(&self.progress))
            .with_cancellation(Arc::clone(&self.cancelled))
            .scan(&self.config.source, exclusions)?;

        let header = SessionHeader {
            source: self.config.source.to_string_lossy().into_owned(),
            destination: self.config.destination.to_string_lossy().into_owned(),
            exclude: scan.exclusions.all_rules(),
        };
        self.session.write_snapshot(&header, &scan.inventory)?;
        info!("Session snapshot saved to {}", self.session.path().display());
        Ok(scan)
    }

    /// Copy and replay a freshly prepared scan
    pub fn run(&self, scan: &ScanResult) -> Result<ReplicationResult> {
        self.drive(&scan.inventory, &scan.exclusions, HashSet::new(), scan.inventory.errors.clone(), false)
    }

    /// Prepare and run in one go
    pub fn run_fresh(&self) -> Result<ReplicationResult> {
        let scan = self.prepare()?;
        self.run(&scan)
    }

    /// Continue an interrupted session, skipping every logged path
    pub fn resume(&self, session: &Session) -> Result<ReplicationResult> {
        let inventory = &session.inventory;
        let (discovered, rules): (Vec<&String>, Vec<&String>) = session
            .header
            .exclude
            .iter()
            .partition(|r| inventory.is_secondary_member(r) || inventory.junctions.contains(r));
        let mut exclusions = ExclusionSet::from_rules(rules.into_iter().cloned())?;
        for path in discovered {
            exclusions.push(path.clone());
        }
        info!(
            "Resuming {} -> {} with {} paths already copied",
            session.header.source,
            session.header.destination,
            session.copied.len()
        );
        self.drive(&session.inventory, &exclusions, session.copied_set(), Vec::new(), true)
    }

    fn drive(
        &self,
        inventory: &Inventory,
        exclusions: &ExclusionSet,
        already_copied: HashSet<&str>,
        scan_errors: Vec<String>,
        resumed: bool,
    ) -> Result<ReplicationResult> {
        let start = Instant::now();
        self.progress.set_totals(
            inventory.file_count(),
            inventory.dir_count(),
            inventory.link_count(),
            inventory.total_size,
        );
        self.progress.set_status("Copying");

        let job = CopyJob {
            source: &self.config.source,
            destination: &self.config.destination,
            inventory,
            exclusions,
            already_copied,
        };
        let engine = CopyEngine::new(Arc::clone(&self.copier))
            .with_progress(Arc::clone(&self.progress))
            .with_cancellation(Arc::clone(&self.cancelled))
            .merge_existing(self.config.merge_existing);

        let copy = match engine.execute(&job, &self.session) {
            Ok(report) => report,
            Err(e) => {
                self.progress.finish_error(&e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = copy.failures_error() {
            warn!("{}", e);
        }

        let replay = if copy.cancelled || self.cancelled.load(Ordering::SeqCst) {
            info!("Metadata replay skipped after cancellation");
            None
        } else {
            Some(
                MetadataReplayer::new(self.caps.clone())
                    .with_progress(Arc::clone(&self.progress))
                    .replay(&self.config.source, &self.config.destination, inventory),
            )
        };

        let result = ReplicationResult {
            copy,
            replay,
            scan_errors,
            resumed,
            duration: start.elapsed(),
        };

        let failed = result.failed_paths();
        if !failed.is_empty() {
            self.session.write_errors(&failed)?;
            warn!(
                "{} failed paths written to {}",
                failed.len(),
                self.session.error_path().display()
            );
        }

        if result.is_cancelled() {
            self.progress.finish_error("Cancelled");
        } else if result.is_success() {
            self.progress.finish_success("Replication complete");
        } else {
            self.progress.finish_error(&format!("{} paths failed", failed.len()));
        }
        Ok(result)
    }
}
