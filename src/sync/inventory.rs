//! Scan inventory
//!
//! The catalog produced by the scan pass and frozen afterwards. Path lists
//! keep discovery order; that order is the order the copy pass and a resumed
//! run will follow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Hardlink groups: canonical member -> every member, canonical first
pub type HardlinkGroups = BTreeMap<String, Vec<String>>;

/// A directory whose tracked attributes must be replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedDir {
    /// Source path of the directory
    pub path: String,
    /// Tracked attribute bits observed at scan time
    pub attributes: u32,
}

/// In-memory result of a scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    /// Directories in discovery order (the root is not listed)
    pub dirs: Vec<String>,
    /// Regular files, including canonical hardlink members
    pub files: Vec<String>,
    /// Symlinks, directory links and non-canonical hardlink members
    pub links: Vec<String>,
    /// Recorded size per file or link path
    pub sizes: BTreeMap<String, u64>,
    /// Sum of file sizes; links do not count
    pub total_size: u64,
    /// Hardlink groups
    pub hardlinks: HardlinkGroups,
    /// Junctions to recreate after the copy
    pub junctions: Vec<String>,
    /// Directories carrying tracked attribute bits
    pub attributed_dirs: Vec<AttributedDir>,
    /// Paths that failed classification
    pub errors: Vec<String>,
    /// member -> canonical, for every member of every group
    members: HashMap<String, String>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory count, the source root included
    pub fn dir_count(&self) -> u64 {
        self.dirs.len() as u64 + 1
    }

    /// Number of files
    pub fn file_count(&self) -> u64 {
        self.files.len() as u64
    }

    /// Number of links
    pub fn link_count(&self) -> u64 {
        self.links.len() as u64
    }

    /// Record a directory
    pub fn record_dir(&mut self, path: impl Into<String>) {
        self.dirs.push(path.into());
    }

    /// Record a file and add its size to the total
    pub fn record_file(&mut self, path: impl Into<String>, size: u64) {
        let path = path.into();
        self.total_size += size;
        self.sizes.insert(path.clone(), size);
        self.files.push(path);
    }

    /// Record a link; its size is kept but not added to the total
    pub fn record_link(&mut self, path: impl Into<String>, size: u64) {
        let path = path.into();
        self.sizes.insert(path.clone(), size);
        self.links.push(path);
    }

    /// Record a directory carrying tracked attribute bits
    pub fn record_attributes(&mut self, path: impl Into<String>, attributes: u32) {
        self.attributed_dirs.push(AttributedDir {
            path: path.into(),
            attributes,
        });
    }

    /// Record a path that failed classification
    pub fn record_error(&mut self, path: impl Into<String>) {
        self.errors.push(path.into());
    }

    /// Register a new hardlink group keyed by `canonical`
    ///
    /// `members` must contain `canonical`; it is moved to the front.
    pub fn register_group(&mut self, canonical: impl Into<String>, members: Vec<String>) {
        let canonical = canonical.into();
        let mut ordered = Vec::with_capacity(members.len().max(1));
        ordered.push(canonical.clone());
        ordered.extend(members.into_iter().filter(|m| *m != canonical));

        for member in &ordered {
            self.members.insert(member.clone(), canonical.clone());
        }
        self.hardlinks.insert(canonical, ordered);
    }

    /// Remove a group and its member index; returns the members
    pub fn remove_group(&mut self, canonical: &str) -> Option<Vec<String>> {
        let members = self.hardlinks.remove(canonical)?;
        for member in &members {
            self.members.remove(member);
        }
        Some(members)
    }

    /// Canonical member of the group containing `path`
    pub fn canonical_of(&self, path: &str) -> Option<&str> {
        self.members.get(path).map(|s| s.as_str())
    }

    /// Whether `path` belongs to a group but is not its canonical member
    pub fn is_secondary_member(&self, path: &str) -> bool {
        matches!(self.canonical_of(path), Some(canonical) if canonical != path)
    }

    /// Register a junction for replay
    pub fn add_junction(&mut self, path: impl Into<String>) {
        self.junctions.push(path.into());
    }

    /// Drop the most recent registration of `path` as a junction
    pub fn remove_junction(&mut self, path: &str) -> bool {
        match self.junctions.iter().rposition(|j| j == path) {
            Some(idx) => {
                self.junctions.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Recorded size for a path, 0 if unknown
    pub fn size_of(&self, path: &str) -> u64 {
        self.sizes.get(path).copied().unwrap_or(0)
    }

    /// Every path the copy pass may touch
    pub fn known_paths(&self) -> HashSet<&str> {
        self.dirs
            .iter()
            .chain(self.files.iter())
            .chain(self.links.iter())
            .map(|s| s.as_str())
            .collect()
    }

    /// Rebuild the member index after the groups were loaded from disk
    pub fn rebuild_index(&mut self) {
        self.members.clear();
        for (canonical, members) in &self.hardlinks {
            for member in members {
                self.members.insert(member.clone(), canonical.clone());
            }
        }
    }
}
