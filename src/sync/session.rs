//! Session log
//!
//! The session is a JSON Lines file. A run starts by truncating it, writes
//! five snapshot records once the scan is finished, and then appends one
//! raw path per line for every entry the copy pass has confirmed:
//!
//! ```text
//! {"source": "...", "destination": "...", "exclude": [...]}
//! {"<canonical>": ["<canonical>", "<sibling>", ...], ...}
//! [{"path": "...", "attributes": 2}, ...]
//! ["<junction>", ...]
//! {"dirs": [...], "files": [...], "links": [...], "sizes": {...}}
//! /src/a.txt
//! /src/dir
//! ...
//! ```
//!
//! Every write is a single `write_all` of whole newline-terminated records
//! followed by `sync_data`. The reader drops a trailing record without its
//! newline, so a torn write is never observed.
//!
//! Paths are stored as lossy UTF-8 strings.

use crate::error::{IoResultExt, ReplicaError, Result};
use crate::sync::inventory::{AttributedDir, HardlinkGroups, Inventory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Record 1: roots and exclusion rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// Source root
    pub source: String,
    /// Destination root
    pub destination: String,
    /// Exclusion rules at the end of the scan
    pub exclude: Vec<String>,
}

/// Record 5: the classified listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Listing {
    dirs: Vec<String>,
    files: Vec<String>,
    links: Vec<String>,
    #[serde(default)]
    sizes: BTreeMap<String, u64>,
}

/// A session read back from disk
#[derive(Debug, Clone)]
pub struct Session {
    /// Roots and rules
    pub header: SessionHeader,
    /// Reconstructed inventory
    pub inventory: Inventory,
    /// Confirmed paths in log order
    pub copied: Vec<String>,
}

impl Session {
    /// Confirmed paths as a lookup set
    pub fn copied_set(&self) -> HashSet<&str> {
        self.copied.iter().map(|s| s.as_str()).collect()
    }
}

/// Handle to a session file on disk
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    /// Refer to the session at `path`; nothing is touched on disk
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Session file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Companion error file: same base name, `error.json` extension
    pub fn error_path(&self) -> PathBuf {
        self.path.with_extension("error.json")
    }

    /// Whether a session worth resuming is present
    pub fn exists_nonempty(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Start over with an empty session
    pub fn truncate(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        File::create(&self.path).with_path(&self.path)?;
        Ok(())
    }

    fn append(&self, buf: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_path(&self.path)?;
        file.write_all(buf).with_path(&self.path)?;
        file.sync_data().with_path(&self.path)?;
        Ok(())
    }

    /// Write the five snapshot records in one durable write
    pub fn write_snapshot(&self, header: &SessionHeader, inventory: &Inventory) -> Result<()> {
        let listing = Listing {
            dirs: inventory.dirs.clone(),
            files: inventory.files.clone(),
            links: inventory.links.clone(),
            sizes: inventory.sizes.clone(),
        };

        let mut buf = Vec::new();
        for record in [
            serde_json::to_vec(header)?,
            serde_json::to_vec(&inventory.hardlinks)?,
            serde_json::to_vec(&inventory.attributed_dirs)?,
            serde_json::to_vec(&inventory.junctions)?,
            serde_json::to_vec(&listing)?,
        ] {
            buf.extend_from_slice(&record);
            buf.push(b'\n');
        }

        self.append(&buf)?;
        tracing::debug!("Session snapshot written to {}", self.path.display());
        Ok(())
    }

    /// Append confirmed paths, one per line, in one durable write
    pub fn append_copied<S: AsRef<str>>(&self, paths: &[S]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for path in paths {
            let path = path.as_ref();
            if path.contains('\n') {
                tracing::warn!("Not logging path containing a newline: {:?}", path);
                continue;
            }
            buf.push_str(path);
            buf.push('\n');
        }
        self.append(buf.as_bytes())
    }

    /// Append the failed paths to the companion error file
    pub fn write_errors<S: AsRef<str>>(&self, paths: &[S]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let list: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
        let mut buf = serde_json::to_vec(&list)?;
        buf.push(b'\n');

        let error_path = self.error_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&error_path)
            .with_path(&error_path)?;
        file.write_all(&buf).with_path(&error_path)?;
        file.sync_data().with_path(&error_path)?;
        Ok(())
    }

    /// Every error list written to the companion file, oldest first
    pub fn read_errors(&self) -> Result<Vec<Vec<String>>> {
        let error_path = self.error_path();
        let text = match fs::read_to_string(&error_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ReplicaError::io(error_path, e)),
        };
        let mut runs = Vec::new();
        for value in serde_json::Deserializer::from_str(&text).into_iter::<Vec<String>>() {
            runs.push(value?);
        }
        Ok(runs)
    }

    /// Read the session back
    pub fn load(&self) -> Result<Session> {
        let text = fs::read_to_string(&self.path).with_path(&self.path)?;

        // drop a torn trailing record
        let complete = match text.rfind('\n') {
            Some(idx) => &text[..=idx],
            None => "",
        };
        let mut lines = complete.lines();

        let header: SessionHeader = serde_json::from_str(next_record(&mut lines, "header")?)?;
        let hardlinks: HardlinkGroups = serde_json::from_str(next_record(&mut lines, "hardlink")?)?;
        let attributed_dirs: Vec<AttributedDir> =
            serde_json::from_str(next_record(&mut lines, "attribute")?)?;
        let junctions: Vec<String> = serde_json::from_str(next_record(&mut lines, "junction")?)?;
        let listing: Listing = serde_json::from_str(next_record(&mut lines, "listing")?)?;

        let copied: Vec<String> = lines.filter(|l| !l.is_empty()).map(str::to_owned).collect();

        let mut inventory = Inventory::new();
        inventory.total_size = listing
            .files
            .iter()
            .map(|f| listing.sizes.get(f).copied().unwrap_or(0))
            .sum();
        inventory.dirs = listing.dirs;
        inventory.files = listing.files;
        inventory.links = listing.links;
        inventory.sizes = listing.sizes;
        inventory.hardlinks = hardlinks;
        inventory.junctions = junctions;
        inventory.attributed_dirs = attributed_dirs;
        inventory.rebuild_index();

        Ok(Session {
            header,
            inventory,
            copied,
        })
    }
}

fn next_record<'a>(lines: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    lines
        .next()
        .ok_or_else(|| ReplicaError::session(format!("session ends before the {} record", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn sample_inventory() -> Inventory {
        let mut inv = Inventory::new();
        inv.record_dir("/src/z");
        inv.record_dir("/src/a");
        inv.record_file("/src/z/b.bin", 7);
        inv.record_file("/src/a.txt", 10);
        inv.record_link("/src/b.txt", 10);
        inv.register_group("/src/a.txt", vec!["/src/a.txt".into(), "/src/b.txt".into()]);
        inv.record_attributes("/src/z", 2);
        inv.add_junction("/src/j");
        inv
    }

    fn header() -> SessionHeader {
        SessionHeader {
            source: "/src".into(),
            destination: "/dst".into(),
            exclude: vec!["sys".into(), "/src/b.txt".into()],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("session.jsonl"));
        log.truncate().unwrap();
        assert!(!log.exists_nonempty());

        let inv = sample_inventory();
        log.write_snapshot(&header(), &inv).unwrap();
        log.append_copied(&["/src/z", "/src/z/b.bin"]).unwrap();
        log.append_copied(&["/src/a.txt"]).unwrap();

        assert!(log.exists_nonempty());
        let session = log.load().unwrap();
        assert_eq!(session.header, header());
        assert_eq!(session.inventory, inv);
        assert_eq!(session.copied, vec!["/src/z", "/src/z/b.bin", "/src/a.txt"]);
        assert!(session.copied_set().contains("/src/a.txt"));
    }

    #[test]
    fn test_torn_trailing_line_ignored() {
        let dir = tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("s.jsonl"));
        log.truncate().unwrap();
        log.write_snapshot(&header(), &Inventory::new()).unwrap();
        log.append_copied(&["/src/one"]).unwrap();

        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(b"/src/tw").unwrap();

        let session = log.load().unwrap();
        assert_eq!(session.copied, vec!["/src/one"]);
    }

    #[test]
    fn test_listing_without_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.jsonl");
        fs::write(
            &path,
            "{\"source\":\"/s\",\"destination\":\"/d\",\"exclude\":[]}\n{}\n[]\n[]\n{\"dirs\":[],\"files\":[\"/s/f\"],\"links\":[]}\n",
        )
        .unwrap();

        let session = SessionLog::new(&path).load().unwrap();
        assert_eq!(session.inventory.files, vec!["/s/f"]);
        assert_eq!(session.inventory.size_of("/s/f"), 0);
        assert!(session.copied.is_empty());
    }

    #[test]
    fn test_truncated_snapshot_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.jsonl");
        fs::write(&path, "{\"source\":\"/s\",\"destination\":\"/d\",\"exclude\":[]}\n{}\n").unwrap();
        assert!(matches!(SessionLog::new(&path).load(), Err(ReplicaError::SessionError(_))));
    }

    #[test]
    fn test_error_file() {
        let dir = tempdir().unwrap();
        let log = SessionLog::new(dir.path().join("progress.jsonl"));
        assert_eq!(log.error_path(), dir.path().join("progress.error.json"));

        log.write_errors::<&str>(&[]).unwrap();
        assert!(!log.error_path().exists());

        log.write_errors(&["/src/bad"]).unwrap();
        log.write_errors(&["/src/worse", "/src/worst"]).unwrap();
        let runs = log.read_errors().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1], vec!["/src/worse", "/src/worst"]);
    }

    proptest! {
        #[test]
        fn prop_copied_order_preserved(paths in proptest::collection::vec("/[a-z]{1,8}(/[a-z0-9. ]{1,8}){0,3}", 0..20)) {
            let dir = tempdir().unwrap();
            let log = SessionLog::new(dir.path().join("p.jsonl"));
            log.truncate().unwrap();
            log.write_snapshot(&header(), &Inventory::new()).unwrap();
            for chunk in paths.chunks(3) {
                log.append_copied(chunk).unwrap();
            }
            let session = log.load().unwrap();
            prop_assert_eq!(session.copied, paths);
        }
    }
}
