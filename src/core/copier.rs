//! Copy engine
//!
//! Recursively copies the source tree into the destination, one directory
//! listing at a time. For every listing it decides which children to skip
//! (exclusion rules, junctions, anything the scan did not record) and
//! copies the rest through the [`CopyPrimitive`]. Every non-skipped child
//! joins the directory's batch before its copy runs; failures are taken
//! back out. The batch is appended to the session log when the directory
//! is done, or as soon as cancellation is noticed.

use crate::error::{collect_failures, PathFailure, ReplicaError, Result};
use crate::fs::{copy_times, list_dir, CopyPrimitive, ExclusionSet};
use crate::progress::ProgressReporter;
use crate::sync::{Inventory, SessionLog};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything one copy pass needs to know
#[derive(Debug)]
pub struct CopyJob<'a> {
    /// Source root
    pub source: &'a Path,
    /// Destination root
    pub destination: &'a Path,
    /// Frozen scan inventory
    pub inventory: &'a Inventory,
    /// Rules at the end of the scan
    pub exclusions: &'a ExclusionSet,
    /// Paths already confirmed by an earlier, interrupted run
    pub already_copied: HashSet<&'a str>,
}

/// Outcome of a copy pass
#[derive(Debug, Default, Clone)]
pub struct CopyReport {
    /// Files copied
    pub files_copied: u64,
    /// Bytes copied
    pub bytes_copied: u64,
    /// Directories created or merged, the root included
    pub dirs_created: u64,
    /// Symlinks recreated
    pub links_copied: u64,
    /// Files skipped because an earlier run already copied them
    pub files_skipped: u64,
    /// Paths appended to the session log by this pass
    pub paths_logged: u64,
    /// Per-path failures
    pub failures: Vec<PathFailure>,
    /// Whether the pass stopped on a cancellation request
    pub cancelled: bool,
    /// Duration of the pass
    pub duration: Duration,
}

impl CopyReport {
    /// Check if every path was copied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// The failures as a structured error
    pub fn failures_error(&self) -> Result<()> {
        collect_failures(self.failures.clone())
    }
}

enum Flow {
    Continue,
    Cancelled,
}

/// Directory-by-directory copy engine
pub struct CopyEngine {
    copier: Arc<dyn CopyPrimitive>,
    progress: Option<Arc<ProgressReporter>>,
    cancelled: Arc<AtomicBool>,
    merge_existing: bool,
}

struct PassState<'a> {
    known: HashSet<&'a str>,
    replayed: HashSet<&'a str>,
    report: CopyReport,
}

impl CopyEngine {
    /// Create an engine around a copy primitive
    pub fn new(copier: Arc<dyn CopyPrimitive>) -> Self {
        Self {
            copier,
            progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            merge_existing: true,
        }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Share an existing cancellation flag
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Whether existing destination directories are merged into
    pub fn merge_existing(mut self, merge: bool) -> Self {
        self.merge_existing = merge;
        self
    }

    /// Get cancellation flag for external control
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Cancel the operation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run one copy pass, appending confirmed paths to `log`
    pub fn execute(&self, job: &CopyJob<'_>, log: &SessionLog) -> Result<CopyReport> {
        let start = Instant::now();

        if job.destination.exists() {
            if !self.merge_existing {
                return Err(ReplicaError::Precondition(format!(
                    "destination {} already exists and merging is disabled",
                    job.destination.display()
                )));
            }
        } else {
            fs::create_dir_all(job.destination).map_err(|e| ReplicaError::io(job.destination, e))?;
        }

        let mut state = PassState {
            known: job.inventory.known_paths(),
            replayed: job
                .inventory
                .junctions
                .iter()
                .chain(job.inventory.errors.iter())
                .map(|s| s.as_str())
                .collect(),
            report: CopyReport::default(),
        };
        state.report.dirs_created = 1;
        if let Some(progress) = &self.progress {
            progress.increment_dirs(1);
        }

        let flow = self.copy_dir(job, job.source, job.destination, &mut state, log)?;
        if matches!(flow, Flow::Cancelled) {
            state.report.cancelled = true;
            info!("Copy cancelled after {} logged paths", state.report.paths_logged);
        } else if let Err(e) = copy_times(job.source, job.destination) {
            debug!("Cannot copy times of {}: {}", job.source.display(), e);
        }

        state.report.duration = start.elapsed();
        Ok(state.report)
    }

    fn copy_dir<'a>(
        &self,
        job: &CopyJob<'a>,
        src_dir: &Path,
        dst_dir: &Path,
        state: &mut PassState<'a>,
        log: &SessionLog,
    ) -> Result<Flow> {
        let listing = match list_dir(src_dir) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Cannot list {}: {}", src_dir.display(), e);
                state.report.failures.push(PathFailure::new(src_dir, e));
                return Ok(Flow::Continue);
            }
        };
        let ignored = job.exclusions.ignored_names(src_dir, listing.names());

        let mut children: Vec<(&str, bool)> = listing
            .dirs
            .iter()
            .map(|n| (n.as_str(), true))
            .chain(listing.files.iter().map(|n| (n.as_str(), false)))
            .collect();
        children.sort_by(|a, b| a.0.cmp(b.0));

        let mut batch: Vec<String> = Vec::new();

        for (name, is_dir) in children {
            if self.is_cancelled() {
                self.flush(log, &mut batch, &mut state.report)?;
                return Ok(Flow::Cancelled);
            }
            if ignored.contains(name) {
                continue;
            }

            let src = src_dir.join(name);
            let key = src.to_string_lossy().into_owned();
            if !state.known.contains(key.as_str()) || state.replayed.contains(key.as_str()) {
                debug!("Skipping {} (not in inventory)", key);
                continue;
            }
            let dst = dst_dir.join(name);
            let done_before = job.already_copied.contains(key.as_str());

            if is_dir {
                if !done_before {
                    match self.prepare_dir(&dst) {
                        Ok(()) => {
                            batch.push(key.clone());
                            state.report.dirs_created += 1;
                        }
                        Err(e) => {
                            warn!("Cannot create {}: {}", dst.display(), e);
                            state.report.failures.push(PathFailure::new(&src, e));
                            continue;
                        }
                    }
                }
                if let Some(progress) = &self.progress {
                    progress.increment_dirs(1);
                }

                if let Flow::Cancelled = self.copy_dir(job, &src, &dst, state, log)? {
                    self.flush(log, &mut batch, &mut state.report)?;
                    return Ok(Flow::Cancelled);
                }
                if let Err(e) = copy_times(&src, &dst) {
                    debug!("Cannot copy times of {}: {}", src.display(), e);
                }
                continue;
            }

            let size = job.inventory.size_of(&key);
            let is_symlink = fs::symlink_metadata(&src)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);

            if done_before {
                state.report.files_skipped += 1;
                if let Some(progress) = &self.progress {
                    if is_symlink {
                        progress.increment_links(1);
                    } else {
                        progress.increment_files(1);
                        progress.increment_bytes(size);
                    }
                }
                continue;
            }

            batch.push(key.clone());
            if is_symlink {
                match self.copier.copy_symlink(&src, &dst) {
                    Ok(()) => {
                        state.report.links_copied += 1;
                        if let Some(progress) = &self.progress {
                            progress.increment_links(1);
                        }
                    }
                    Err(e) => {
                        batch.pop();
                        warn!("Cannot recreate link {}: {}", key, e);
                        state.report.failures.push(PathFailure::new(&src, e));
                    }
                }
                continue;
            }

            if let Some(progress) = &self.progress {
                progress.set_current_file(&key);
                progress.increment_files(1);
                progress.increment_bytes(size);
            }
            match self.copier.copy_file(&src, &dst) {
                Ok(bytes) => {
                    state.report.files_copied += 1;
                    state.report.bytes_copied += bytes;
                }
                Err(e) => {
                    batch.pop();
                    if let Some(progress) = &self.progress {
                        progress.retract_file(size);
                    }
                    warn!("Cannot copy {}: {}", key, e);
                    state.report.failures.push(PathFailure::new(&src, e));
                }
            }
        }

        self.flush(log, &mut batch, &mut state.report)?;
        Ok(Flow::Continue)
    }

    fn prepare_dir(&self, dst: &Path) -> std::io::Result<()> {
        match fs::symlink_metadata(dst) {
            Ok(meta) if meta.is_dir() && self.merge_existing => Ok(()),
            Ok(_) => Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => fs::create_dir(dst),
            Err(e) => Err(e),
        }
    }

    fn flush(&self, log: &SessionLog, batch: &mut Vec<String>, report: &mut CopyReport) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        log.append_copied(batch)?;
        report.paths_logged += batch.len() as u64;
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{Capabilities, FileCopier, PathClassifier, ScanConfig, ScanEngine, ScanResult};
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn create_test_structure(root: &Path) {
        fs::create_dir_all(root.join("dir1/sub")).unwrap();
        fs::create_dir_all(root.join("dir2")).unwrap();
        fs::write(root.join("root.txt"), b"root file").unwrap();
        fs::write(root.join("dir1/a.txt"), b"aaaa").unwrap();
        fs::write(root.join("dir1/sub/b.txt"), b"bbbbbbbb").unwrap();
        fs::write(root.join("dir2/c.log"), b"cc").unwrap();
    }

    fn scan(root: &Path, rules: &[&str]) -> ScanResult {
        ScanEngine::new(PathClassifier::new(Capabilities::native(root)), ScanConfig::default())
            .scan(root, ExclusionSet::from_rules(rules.iter().copied()).unwrap())
            .unwrap()
    }

    fn job<'a>(src: &'a Path, dst: &'a Path, scan: &'a ScanResult) -> CopyJob<'a> {
        CopyJob {
            source: src,
            destination: dst,
            inventory: &scan.inventory,
            exclusions: &scan.exclusions,
            already_copied: HashSet::new(),
        }
    }

    fn session(temp: &TempDir) -> SessionLog {
        let log = SessionLog::new(temp.path().join("session.jsonl"));
        log.truncate().unwrap();
        log
    }

    struct CancelAfter {
        inner: FileCopier,
        limit: usize,
        count: AtomicUsize,
        flag: Arc<AtomicBool>,
    }

    impl CopyPrimitive for CancelAfter {
        fn copy_file(&self, source: &Path, dest: &Path) -> io::Result<u64> {
            let n = self.inner.copy_file(source, dest)?;
            if self.count.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.flag.store(true, Ordering::SeqCst);
            }
            Ok(n)
        }

        fn copy_symlink(&self, source: &Path, dest: &Path) -> io::Result<()> {
            self.inner.copy_symlink(source, dest)
        }
    }

    #[test]
    fn test_full_copy_matches_inventory() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        create_test_structure(src.path());

        let scanned = scan(src.path(), &[]);
        let log = session(&work);
        let engine = CopyEngine::new(Arc::new(FileCopier));
        let report = engine.execute(&job(src.path(), dst.path(), &scanned), &log).unwrap();

        assert!(report.is_success());
        assert_eq!(report.files_copied, 4);
        assert_eq!(report.bytes_copied, scanned.inventory.total_size);
        assert_eq!(report.dirs_created, scanned.inventory.dir_count());
        assert_eq!(fs::read(dst.path().join("dir1/sub/b.txt")).unwrap(), b"bbbbbbbb");
        assert_eq!(report.paths_logged, 7);
    }

    #[test]
    fn test_exclusions_respected() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        create_test_structure(src.path());

        let rule = src.path().join("dir1").to_string_lossy().into_owned();
        let scanned = scan(src.path(), &[rule.as_str(), "*.log"]);
        let log = session(&work);
        let report = CopyEngine::new(Arc::new(FileCopier))
            .execute(&job(src.path(), dst.path(), &scanned), &log)
            .unwrap();

        assert_eq!(report.files_copied, 1);
        assert!(!dst.path().join("dir1").exists());
        assert!(!dst.path().join("dir2/c.log").exists());
        assert!(dst.path().join("dir2").is_dir());
    }

    #[test]
    fn test_cancel_after_three_of_ten() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(src.path().join(format!("f{:02}.bin", i)), vec![b'x'; 16]).unwrap();
        }

        let scanned = scan(src.path(), &[]);
        let log = session(&work);
        log.write_snapshot(
            &crate::sync::SessionHeader {
                source: src.path().to_string_lossy().into_owned(),
                destination: dst.path().to_string_lossy().into_owned(),
                exclude: Vec::new(),
            },
            &scanned.inventory,
        )
        .unwrap();

        let flag = Arc::new(AtomicBool::new(false));
        let copier = CancelAfter {
            inner: FileCopier,
            limit: 3,
            count: AtomicUsize::new(0),
            flag: Arc::clone(&flag),
        };
        let engine = CopyEngine::new(Arc::new(copier)).with_cancellation(flag);
        let report = engine.execute(&job(src.path(), dst.path(), &scanned), &log).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.files_copied, 3);
        assert!(report.failures.is_empty());

        let session = log.load().unwrap();
        assert_eq!(session.copied.len(), 3);
        assert!(session.copied[0].ends_with("f00.bin"));
        assert!(session.inventory.errors.is_empty());
    }

    #[test]
    fn test_resume_skips_logged_paths() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        create_test_structure(src.path());

        let scanned = scan(src.path(), &[]);
        let log = session(&work);
        let done = src.path().join("root.txt").to_string_lossy().into_owned();

        let mut resumed = job(src.path(), dst.path(), &scanned);
        resumed.already_copied.insert(done.as_str());
        let report = CopyEngine::new(Arc::new(FileCopier))
            .execute(&resumed, &log)
            .unwrap();

        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_copied, 3);
        assert!(!dst.path().join("root.txt").exists());
    }

    #[test]
    fn test_collision_recorded_and_not_logged() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        create_test_structure(src.path());
        // a directory where the source has a file
        fs::create_dir(dst.path().join("root.txt")).unwrap();

        let scanned = scan(src.path(), &[]);
        let log = session(&work);
        let progress = Arc::new(ProgressReporter::disabled());
        let report = CopyEngine::new(Arc::new(FileCopier))
            .with_progress(Arc::clone(&progress))
            .execute(&job(src.path(), dst.path(), &scanned), &log)
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("root.txt"));
        assert!(matches!(report.failures_error(), Err(ReplicaError::CopyFailures { count: 1, .. })));

        let logged: Vec<PathBuf> = fs::read_to_string(log.path())
            .unwrap()
            .lines()
            .map(PathBuf::from)
            .collect();
        assert!(!logged.iter().any(|p| p.ends_with("root.txt")));

        let summary = progress.summary();
        assert_eq!(summary.files_done, 3);
        assert_eq!(summary.bytes_done, report.bytes_copied);
    }

    #[test]
    fn test_no_merge_refuses_existing_destination() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        create_test_structure(src.path());

        let scanned = scan(src.path(), &[]);
        let log = session(&work);
        let result = CopyEngine::new(Arc::new(FileCopier))
            .merge_existing(false)
            .execute(&job(src.path(), dst.path(), &scanned), &log);
        assert!(matches!(result, Err(ReplicaError::Precondition(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_recreated() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(src.path().join("target.txt"), b"t").unwrap();
        std::os::unix::fs::symlink("target.txt", src.path().join("link")).unwrap();

        let scanned = scan(src.path(), &[]);
        let report = CopyEngine::new(Arc::new(FileCopier))
            .execute(&job(src.path(), dst.path(), &scanned), &session(&work))
            .unwrap();

        assert_eq!(report.links_copied, 1);
        assert_eq!(fs::read_link(dst.path().join("link")).unwrap(), PathBuf::from("target.txt"));
    }
}
