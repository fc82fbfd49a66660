//! Path classification
//!
//! Decides, for one path seen by the scan, whether it is excluded and which
//! inventory bucket it belongs to. The checks run in a fixed order:
//!
//! 1. exclusion (no syscall)
//! 2. hardlink detection, which may register a group and sibling rules
//! 3. junction detection, which registers the junction and a subtree rule
//! 4. attribute probe, which retracts 2 and 3 when it fails
//! 5. bucket assignment
//!
//! Retraction is explicit: the classifier keeps a [`Registration`] of what
//! it added for the current path and hands it to [`ScanContext::retract`]
//! on the failure branches.

use crate::fs::exclusion::ExclusionSet;
use crate::fs::platform::{Capabilities, Probe, Siblings, TRACKED_ATTRIBUTES};
use crate::sync::Inventory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Kind of a scanned entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file (or the canonical member of a hardlink group)
    File,
    /// Real directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Junction / directory reparse point
    Junction,
    /// Non-canonical member of a hardlink group
    HardlinkMember,
}

/// Snapshot of one path taken at scan time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute path
    pub path: PathBuf,
    /// Classified kind
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Tracked attribute bits, 0 where the platform has none
    pub attributes: u32,
}

/// What happened to a classified path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Recorded in the inventory
    Recorded(Entry),
    /// Matched an exclusion rule
    Excluded,
    /// Vanished while being looked at
    Skipped,
    /// An OS error; the path is in the inventory's error list
    Failed,
}

impl Classified {
    /// Whether the scan may descend below this path
    pub fn allows_descent(&self) -> bool {
        matches!(self, Classified::Recorded(Entry { kind: EntryKind::Directory, .. }))
    }
}

/// Registrations made for a single path, kept for rollback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Canonical key of a group registered for this path
    pub group: Option<String>,
    /// Whether this path was registered as a junction
    pub junction: bool,
}

/// Mutable state threaded through a scan
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    /// Inventory under construction
    pub inventory: Inventory,
    /// Exclusion rules, growing as siblings and junctions are found
    pub exclusions: ExclusionSet,
    /// Scan root; hardlink siblings outside it are not group members
    pub root: Option<PathBuf>,
    warned_unsupported: bool,
}

impl ScanContext {
    /// Start a scan with the given rules
    pub fn new(exclusions: ExclusionSet) -> Self {
        Self {
            inventory: Inventory::new(),
            exclusions,
            root: None,
            warned_unsupported: false,
        }
    }

    /// Restrict hardlink siblings to paths under `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn within_root(&self, path: &Path) -> bool {
        self.root.as_deref().map_or(true, |root| path.starts_with(root))
    }

    /// Undo every registration made for `path`
    pub fn retract(&mut self, path: &str, registration: &Registration) {
        if let Some(canonical) = &registration.group {
            if let Some(members) = self.inventory.remove_group(canonical) {
                for member in members.iter().filter(|m| m.as_str() != path) {
                    self.exclusions.remove(member);
                }
            }
        }
        if registration.junction {
            self.inventory.remove_junction(path);
            self.exclusions.remove(path);
        }
        debug!("Retracted {}", path);
    }
}

/// Classifies paths against the platform capabilities
#[derive(Debug, Clone)]
pub struct PathClassifier {
    caps: Capabilities,
}

impl PathClassifier {
    /// Create a classifier
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    /// Classify `path` and record it in `ctx`
    pub fn classify(&self, ctx: &mut ScanContext, path: &Path, is_dir: bool) -> Classified {
        let key = path.to_string_lossy().into_owned();

        // Siblings carry exclusion rules so the copy pass never copies them
        // as payload, but the scan still lists them as links.
        if !is_dir && ctx.inventory.is_secondary_member(&key) {
            let size = std::fs::symlink_metadata(path).map(|m| m.len()).unwrap_or(0);
            ctx.inventory.record_link(key, size);
            return Classified::Recorded(Entry {
                path: path.to_path_buf(),
                kind: EntryKind::HardlinkMember,
                size,
                attributes: 0,
            });
        }

        if ctx.exclusions.is_excluded(path) {
            debug!("Excluded {}", key);
            return Classified::Excluded;
        }

        let metadata = match Probe::from_io(std::fs::symlink_metadata(path)) {
            Probe::Ok(m) => m,
            Probe::NotFound => return Classified::Skipped,
            Probe::Failed(e) => {
                warn!("Cannot stat {}: {}", key, e);
                ctx.inventory.record_error(key);
                return Classified::Failed;
            }
        };

        let is_symlink = metadata.file_type().is_symlink();
        let is_junction = self.caps.junctions.is_junction(path, &metadata);
        let mut registration = Registration::default();
        let mut hardlinked = false;

        if !is_dir
            && !metadata.is_dir()
            && !is_symlink
            && !is_junction
            && self.caps.hardlinks.link_count(path, &metadata) > 1
            && ctx.inventory.canonical_of(&key).is_none()
        {
            match self.caps.hardlinks.siblings(path, &metadata) {
                Ok(Siblings::Resolved(found)) => {
                    let siblings: Vec<String> = found
                        .iter()
                        .filter(|p| {
                            p.as_path() != path && ctx.within_root(p) && !ctx.exclusions.is_excluded(p)
                        })
                        .map(|p| p.to_string_lossy().into_owned())
                        .collect();
                    if !siblings.is_empty() {
                        let mut members = vec![key.clone()];
                        members.extend(siblings.iter().cloned());
                        ctx.inventory.register_group(key.clone(), members);
                        for sibling in siblings {
                            ctx.exclusions.push(sibling);
                        }
                        registration.group = Some(key.clone());
                        hardlinked = true;
                    }
                }
                Ok(Siblings::Unsupported) => {
                    if !ctx.warned_unsupported {
                        warn!("Hardlink siblings cannot be enumerated on this platform; linked files are copied as plain files");
                        ctx.warned_unsupported = true;
                    }
                }
                Err(e) => {
                    warn!("Cannot resolve hardlinks of {}: {}", key, e);
                    ctx.inventory.record_error(key);
                    return Classified::Failed;
                }
            }
        }

        if is_junction {
            ctx.inventory.add_junction(key.clone());
            ctx.exclusions.push(key.clone());
            registration.junction = true;
        }

        let attributes = match self.caps.attributes.probe(path) {
            Probe::Ok(bits) => bits & TRACKED_ATTRIBUTES,
            Probe::NotFound => {
                ctx.retract(&key, &registration);
                return Classified::Skipped;
            }
            Probe::Failed(e) => {
                warn!("Cannot read attributes of {}: {}", key, e);
                ctx.retract(&key, &registration);
                ctx.inventory.record_error(key);
                return Classified::Failed;
            }
        };

        let size = metadata.len();
        let kind = if is_junction {
            ctx.inventory.record_link(key.clone(), size);
            EntryKind::Junction
        } else if is_symlink {
            ctx.inventory.record_link(key.clone(), size);
            EntryKind::Symlink
        } else if metadata.is_dir() {
            ctx.inventory.record_dir(key.clone());
            if attributes != 0 {
                ctx.inventory.record_attributes(key.clone(), attributes);
            }
            EntryKind::Directory
        } else {
            if hardlinked {
                debug!("Hardlink group rooted at {}", key);
            }
            ctx.inventory.record_file(key.clone(), size);
            EntryKind::File
        };

        Classified::Recorded(Entry {
            path: path.to_path_buf(),
            kind,
            size: if kind == EntryKind::Directory { 0 } else { size },
            attributes,
        })
    }

    /// Read-only classification of a single path
    ///
    /// Touches no scan state. Any path with more than one link reports as
    /// [`EntryKind::HardlinkMember`].
    pub fn describe(&self, path: &Path) -> Probe<Entry> {
        let metadata = match Probe::from_io(std::fs::symlink_metadata(path)) {
            Probe::Ok(m) => m,
            Probe::NotFound => return Probe::NotFound,
            Probe::Failed(e) => return Probe::Failed(e),
        };
        let attributes = match self.caps.attributes.probe(path) {
            Probe::Ok(bits) => bits & TRACKED_ATTRIBUTES,
            Probe::NotFound => return Probe::NotFound,
            Probe::Failed(e) => return Probe::Failed(e),
        };

        let kind = if self.caps.junctions.is_junction(path, &metadata) {
            EntryKind::Junction
        } else if metadata.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Directory
        } else if self.caps.hardlinks.link_count(path, &metadata) > 1 {
            EntryKind::HardlinkMember
        } else {
            EntryKind::File
        };

        Probe::Ok(Entry {
            path: path.to_path_buf(),
            kind,
            size: if kind == EntryKind::Directory { 0 } else { metadata.len() },
            attributes,
        })
    }
}
