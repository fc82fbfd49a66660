//! Metadata replay
//!
//! Runs after a complete copy pass and restores what a content copy loses,
//! in three stages: directory attributes, then junctions, then hardlinks.
//! A failure is recorded against its path and never stops the remaining
//! paths or stages.

use crate::error::PathFailure;
use crate::fs::{same_file, translate, Capabilities, Probe};
use crate::progress::ProgressReporter;
use crate::sync::Inventory;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a replay
#[derive(Debug, Default, Clone)]
pub struct ReplayReport {
    /// Directories whose attributes were restored
    pub attributes_applied: u64,
    /// Junctions recreated
    pub junctions_created: u64,
    /// Hardlinks created
    pub hardlinks_created: u64,
    /// Junctions and hardlinks found already in place from an earlier replay
    pub already_present: u64,
    /// Per-path failures
    pub failures: Vec<PathFailure>,
}

impl ReplayReport {
    /// Check if every stage succeeded for every path
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What a junction or hardlink step did at its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Created,
    Present,
}

/// Replays attributes, junctions and hardlinks onto the destination
pub struct MetadataReplayer {
    caps: Capabilities,
    progress: Option<Arc<ProgressReporter>>,
}

impl MetadataReplayer {
    /// Create a replayer
    pub fn new(caps: Capabilities) -> Self {
        Self { caps, progress: None }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn status(&self, msg: &str) {
        if let Some(progress) = &self.progress {
            progress.set_status(msg);
        }
    }

    fn link_done(&self) {
        if let Some(progress) = &self.progress {
            progress.increment_links(1);
        }
    }

    /// Run all three stages in order
    pub fn replay(&self, source: &Path, destination: &Path, inventory: &Inventory) -> ReplayReport {
        let mut report = ReplayReport::default();

        self.status("Restoring directory attributes");
        self.apply_attributes(source, destination, inventory, &mut report);

        self.status("Recreating junctions");
        self.create_junctions(source, destination, inventory, &mut report);

        self.status("Creating hardlinks");
        self.create_hardlinks(source, destination, inventory, &mut report);

        info!(
            "Replay finished: {} attributes, {} junctions, {} hardlinks, {} already present, {} failures",
            report.attributes_applied,
            report.junctions_created,
            report.hardlinks_created,
            report.already_present,
            report.failures.len()
        );
        report
    }

    /// Stage 1: apply recorded directory attributes
    pub fn apply_attributes(
        &self,
        source: &Path,
        destination: &Path,
        inventory: &Inventory,
        report: &mut ReplayReport,
    ) {
        for dir in &inventory.attributed_dirs {
            let dst = translate(Path::new(&dir.path), source, destination);
            match self.caps.attributes.apply(&dst, dir.attributes) {
                Ok(()) => {
                    debug!("Attributes {:#x} -> {}", dir.attributes, dst.display());
                    report.attributes_applied += 1;
                }
                Err(e) => {
                    warn!("Cannot set attributes on {}: {}", dst.display(), e);
                    report.failures.push(PathFailure::new(&dir.path, e));
                }
            }
        }
    }

    /// Stage 2: recreate junctions pointing at translated targets
    pub fn create_junctions(
        &self,
        source: &Path,
        destination: &Path,
        inventory: &Inventory,
        report: &mut ReplayReport,
    ) {
        for junction in &inventory.junctions {
            let src = Path::new(junction);
            match self.create_junction(src, source, destination) {
                Ok(Placement::Created) => {
                    report.junctions_created += 1;
                    self.link_done();
                }
                Ok(Placement::Present) => {
                    report.already_present += 1;
                    self.link_done();
                }
                Err(e) => {
                    warn!("Cannot recreate junction {}: {}", junction, e);
                    report.failures.push(PathFailure::new(src, e));
                }
            }
        }
    }

    fn create_junction(&self, src: &Path, source: &Path, destination: &Path) -> io::Result<Placement> {
        let dst = translate(src, source, destination);
        let target = translate(&self.caps.junctions.target(src)?, source, destination);

        if !target.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("junction target {} does not exist", target.display()),
            ));
        }
        if let Ok(existing) = fs::symlink_metadata(&dst) {
            let same_target = self.caps.junctions.is_junction(&dst, &existing)
                && self.caps.junctions.target(&dst).is_ok_and(|t| t == target);
            if same_target {
                debug!("Junction {} already points at {}", dst.display(), target.display());
                return Ok(Placement::Present);
            }
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            ));
        }

        self.caps.junctions.create(&dst, &target)?;
        debug!("Junction {} -> {}", dst.display(), target.display());

        let meta = fs::symlink_metadata(src)?;
        let atime = filetime::FileTime::from_last_access_time(&meta);
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        if let Err(e) = filetime::set_symlink_file_times(&dst, atime, mtime) {
            debug!("Cannot copy times onto {}: {}", dst.display(), e);
        }
        self.copy_attributes(src, &dst)?;
        Ok(Placement::Created)
    }

    /// Stage 3: link every sibling to its group's canonical copy
    pub fn create_hardlinks(
        &self,
        source: &Path,
        destination: &Path,
        inventory: &Inventory,
        report: &mut ReplayReport,
    ) {
        for (canonical, members) in &inventory.hardlinks {
            let dst_canonical = translate(Path::new(canonical), source, destination);
            for member in members.iter().filter(|m| *m != canonical) {
                let src = Path::new(member);
                let dst = translate(src, source, destination);
                match self.link_member(src, &dst, &dst_canonical) {
                    Ok(Placement::Created) => {
                        report.hardlinks_created += 1;
                        self.link_done();
                    }
                    Ok(Placement::Present) => {
                        report.already_present += 1;
                        self.link_done();
                    }
                    Err(e) => {
                        warn!("Cannot link {} to {}: {}", dst.display(), dst_canonical.display(), e);
                        report.failures.push(PathFailure::new(src, e));
                    }
                }
            }
        }
    }

    fn link_member(&self, src: &Path, dst: &Path, dst_canonical: &Path) -> io::Result<Placement> {
        if fs::symlink_metadata(dst).is_ok() {
            if same_file(dst, dst_canonical)? {
                debug!("{} is already linked to {}", dst.display(), dst_canonical.display());
                return Ok(Placement::Present);
            }
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            ));
        }
        fs::hard_link(dst_canonical, dst)?;
        self.copy_attributes(src, dst)?;
        Ok(Placement::Created)
    }

    fn copy_attributes(&self, src: &Path, dst: &Path) -> io::Result<()> {
        match self.caps.attributes.probe(src) {
            Probe::Ok(0) => Ok(()),
            Probe::Ok(bits) => self.caps.attributes.apply(dst, bits),
            Probe::NotFound => Ok(()),
            Probe::Failed(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CopyEngine, CopyJob};
    use crate::fs::platform::fakes::{FakeJunctions, MemoryAttributes};
    use crate::fs::platform::FILE_ATTRIBUTE_HIDDEN;
    use crate::fs::{ExclusionSet, FileCopier, PathClassifier, ScanConfig, ScanEngine};
    use crate::sync::SessionLog;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn replicate(src: &Path, dst: &Path, caps: Capabilities, work: &TempDir) -> (Inventory, ReplayReport) {
        let scanned = ScanEngine::new(PathClassifier::new(caps.clone()), ScanConfig::default())
            .scan(src, ExclusionSet::new())
            .unwrap();
        let log = SessionLog::new(work.path().join("s.jsonl"));
        log.truncate().unwrap();
        let job = CopyJob {
            source: src,
            destination: dst,
            inventory: &scanned.inventory,
            exclusions: &scanned.exclusions,
            already_copied: HashSet::new(),
        };
        CopyEngine::new(Arc::new(FileCopier))
            .execute(&job, &log)
            .unwrap();
        let report = MetadataReplayer::new(caps).replay(src, dst, &scanned.inventory);
        (scanned.inventory, report)
    }

    #[test]
    fn test_hidden_directory_replayed_only_there() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::create_dir(src.path().join("hidden")).unwrap();
        fs::create_dir(src.path().join("plain")).unwrap();

        let attrs = Arc::new(MemoryAttributes::default());
        attrs.set(src.path().join("hidden"), FILE_ATTRIBUTE_HIDDEN);
        let mut caps = Capabilities::native(src.path());
        caps.attributes = attrs.clone();

        let (_, report) = replicate(src.path(), dst.path(), caps, &work);
        assert!(report.is_success());
        assert_eq!(report.attributes_applied, 1);

        assert_eq!(attrs.get(&dst.path().join("hidden")), Some(FILE_ATTRIBUTE_HIDDEN));
        let on_destination: Vec<PathBuf> = attrs
            .bits
            .lock()
            .unwrap()
            .keys()
            .filter(|p| p.starts_with(dst.path()))
            .cloned()
            .collect();
        assert_eq!(on_destination, vec![dst.path().join("hidden")]);
    }

    #[test]
    fn test_junction_recreated_with_translated_target() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut junctions = FakeJunctions::default();
        junctions
            .junctions
            .insert(src.path().join("j"), src.path().join("real"));
        let fake = Arc::new(junctions);

        let mut caps = Capabilities::native(src.path());
        caps.junctions = fake.clone();
        fs::create_dir(src.path().join("j")).unwrap();
        fs::create_dir(dst.path().join("real")).unwrap();

        let mut inventory = Inventory::new();
        inventory.add_junction(src.path().join("j").to_string_lossy().into_owned());
        inventory.add_junction(src.path().join("j").to_string_lossy().into_owned());

        let report = MetadataReplayer::new(caps).replay(src.path(), dst.path(), &inventory);
        assert_eq!(report.junctions_created, 1);
        // the second registration finds the same junction in place
        assert_eq!(report.already_present, 1);
        assert!(report.is_success(), "{:?}", report.failures);

        let created = fake.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0], (dst.path().join("j"), dst.path().join("real")));
    }

    #[test]
    fn test_junction_destination_taken_by_directory() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut junctions = FakeJunctions::default();
        junctions
            .junctions
            .insert(src.path().join("j"), src.path().join("real"));
        let mut caps = Capabilities::native(src.path());
        caps.junctions = Arc::new(junctions);
        fs::create_dir(dst.path().join("real")).unwrap();
        fs::create_dir(dst.path().join("j")).unwrap();

        let mut inventory = Inventory::new();
        inventory.add_junction(src.path().join("j").to_string_lossy().into_owned());

        let report = MetadataReplayer::new(caps).replay(src.path(), dst.path(), &inventory);
        assert_eq!(report.junctions_created, 0);
        assert_eq!(report.already_present, 0);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_junction_missing_target_is_failure() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut junctions = FakeJunctions::default();
        junctions
            .junctions
            .insert(src.path().join("j"), src.path().join("nowhere"));
        let mut caps = Capabilities::native(src.path());
        caps.junctions = Arc::new(junctions);

        let mut inventory = Inventory::new();
        inventory.add_junction(src.path().join("j").to_string_lossy().into_owned());

        let report = MetadataReplayer::new(caps).replay(src.path(), dst.path(), &inventory);
        assert_eq!(report.junctions_created, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(!dst.path().join("j").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_hardlinks_materialized() {
        use std::os::unix::fs::MetadataExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("a.txt"), b"0123456789").unwrap();
        fs::hard_link(src.path().join("a.txt"), src.path().join("sub/b.txt")).unwrap();

        let caps = Capabilities::native(src.path());
        let (inventory, report) = replicate(src.path(), dst.path(), caps.clone(), &work);
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.hardlinks_created, 1);

        let a = fs::metadata(dst.path().join("a.txt")).unwrap();
        let b = fs::metadata(dst.path().join("sub/b.txt")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(a.nlink(), 2);

        // replaying again finds the link already there
        let again = MetadataReplayer::new(caps).replay(src.path(), dst.path(), &inventory);
        assert_eq!(again.hardlinks_created, 0);
        assert_eq!(again.already_present, 1);
        assert!(again.is_success(), "{:?}", again.failures);
    }

    #[cfg(unix)]
    #[test]
    fn test_unrelated_file_at_link_destination_fails() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"0123456789").unwrap();
        fs::hard_link(src.path().join("a.txt"), src.path().join("b.txt")).unwrap();

        let caps = Capabilities::native(src.path());
        let (inventory, _) = replicate(src.path(), dst.path(), caps.clone(), &work);
        fs::remove_file(dst.path().join("b.txt")).unwrap();
        fs::write(dst.path().join("b.txt"), b"different").unwrap();

        let again = MetadataReplayer::new(caps).replay(src.path(), dst.path(), &inventory);
        assert_eq!(again.already_present, 0);
        assert_eq!(again.failures.len(), 1);
    }
}
