//! Platform capabilities
//!
//! The classifier and the replayer never call OS-specific APIs directly.
//! They go through three capability traits, bundled in [`Capabilities`]:
//!
//! - [`AttributeProvider`]: read and write the tracked attribute bits
//! - [`HardlinkResolver`]: link counts and sibling enumeration
//! - [`JunctionHandler`]: junction detection and creation
//!
//! Windows gets real implementations. On Unix attributes are always empty,
//! junctions do not exist and hardlink siblings are found through a lazily
//! built device+inode index of the source root. Elsewhere sibling
//! enumeration reports [`Siblings::Unsupported`].

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read-only attribute bit
pub const FILE_ATTRIBUTE_READONLY: u32 = 0x1;
/// Hidden attribute bit
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
/// System attribute bit
pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
/// Archive attribute bit
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;

/// Attribute bits that a content copy does not carry over
pub const TRACKED_ATTRIBUTES: u32 =
    FILE_ATTRIBUTE_ARCHIVE | FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_READONLY | FILE_ATTRIBUTE_SYSTEM;

/// Outcome of a probe that may race with deletion
#[derive(Debug)]
pub enum Probe<T> {
    /// The probe succeeded
    Ok(T),
    /// The path vanished (or is a dangling link); skip it silently
    NotFound,
    /// Any other OS error; the caller records it
    Failed(io::Error),
}

impl<T> Probe<T> {
    /// Split an I/O result into the three outcomes
    pub fn from_io(result: io::Result<T>) -> Self {
        match result {
            Ok(value) => Probe::Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Probe::NotFound,
            Err(e) => Probe::Failed(e),
        }
    }
}

/// Result of hardlink sibling enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Siblings {
    /// Every path sharing the file's identity, the probed path included
    Resolved(Vec<PathBuf>),
    /// This platform cannot enumerate siblings
    Unsupported,
}

/// Tracked-attribute access
pub trait AttributeProvider: Send + Sync {
    /// Read the tracked bits of `path` without following links
    fn probe(&self, path: &Path) -> Probe<u32>;

    /// Replace the attribute bits of `path` with `attributes`
    fn apply(&self, path: &Path, attributes: u32) -> io::Result<()>;
}

/// Hardlink sibling enumeration
pub trait HardlinkResolver: Send + Sync {
    /// Number of directory entries referencing this file
    fn link_count(&self, path: &Path, metadata: &Metadata) -> u64;

    /// All paths sharing the identity of `path`
    fn siblings(&self, path: &Path, metadata: &Metadata) -> io::Result<Siblings>;
}

/// Junction (directory reparse point) handling
pub trait JunctionHandler: Send + Sync {
    /// Whether `path` is a junction rather than a plain directory or symlink
    fn is_junction(&self, path: &Path, metadata: &Metadata) -> bool;

    /// Where the junction points, as stored on disk
    fn target(&self, path: &Path) -> io::Result<PathBuf>;

    /// Create a junction at `link` pointing to `target`
    fn create(&self, link: &Path, target: &Path) -> io::Result<()>;
}

/// The capability set used by a replication run
#[derive(Clone)]
pub struct Capabilities {
    /// Attribute reads and writes
    pub attributes: Arc<dyn AttributeProvider>,
    /// Hardlink enumeration
    pub hardlinks: Arc<dyn HardlinkResolver>,
    /// Junction detection and creation
    pub junctions: Arc<dyn JunctionHandler>,
}

impl Capabilities {
    /// Native implementations for the running platform
    ///
    /// `root` bounds the sibling search where the platform has to index it.
    pub fn native(root: &Path) -> Self {
        Self {
            attributes: Arc::new(NativeAttributes),
            hardlinks: Arc::new(NativeHardlinks::new(root)),
            junctions: Arc::new(NativeJunctions),
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

/// Platform attribute provider
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeAttributes;

/// Platform junction handler
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeJunctions;

#[cfg(windows)]
mod imp {
    use super::*;
    use std::ffi::OsString;
    use std::os::windows::ffi::{OsStrExt, OsStringExt};
    use std::os::windows::fs::MetadataExt;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_HANDLE_EOF, ERROR_MORE_DATA, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::Storage::FileSystem::{
        FindClose, FindFirstFileNameW, FindNextFileNameW, GetFileInformationByHandle,
        SetFileAttributesW, BY_HANDLE_FILE_INFORMATION,
    };

    const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    const VERBATIM_PREFIX: &str = r"\??\";

    fn wide(path: &Path) -> Vec<u16> {
        path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
    }

    impl AttributeProvider for NativeAttributes {
        fn probe(&self, path: &Path) -> Probe<u32> {
            Probe::from_io(std::fs::symlink_metadata(path).map(|m| m.file_attributes() & TRACKED_ATTRIBUTES))
        }

        fn apply(&self, path: &Path, attributes: u32) -> io::Result<()> {
            let name = wide(path);
            // SAFETY: `name` is a NUL-terminated UTF-16 buffer that outlives the call.
            let ok = unsafe { SetFileAttributesW(name.as_ptr(), attributes) };
            if ok == 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    /// Hardlink enumeration through `FindFirstFileNameW`
    #[derive(Debug, Default)]
    pub struct NativeHardlinks;

    impl NativeHardlinks {
        pub fn new(_root: &Path) -> Self {
            Self
        }
    }

    fn volume_prefix(path: &Path) -> OsString {
        match path.components().next() {
            Some(std::path::Component::Prefix(prefix)) => prefix.as_os_str().to_os_string(),
            _ => OsString::new(),
        }
    }

    fn file_information(path: &Path) -> io::Result<BY_HANDLE_FILE_INFORMATION> {
        let file = std::fs::File::open(path)?;
        // SAFETY: zeroed is a valid bit pattern for this plain C struct.
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        // SAFETY: the handle is owned by `file` and stays open for the call.
        let ok = unsafe { GetFileInformationByHandle(file.as_raw_handle() as _, &mut info) };
        if ok == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(info)
        }
    }

    /// Whether `a` and `b` are the same file (volume serial and file index)
    pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
        let a = file_information(a)?;
        let b = file_information(b)?;
        Ok(a.dwVolumeSerialNumber == b.dwVolumeSerialNumber
            && a.nFileIndexHigh == b.nFileIndexHigh
            && a.nFileIndexLow == b.nFileIndexLow)
    }

    impl HardlinkResolver for NativeHardlinks {
        fn link_count(&self, path: &Path, _metadata: &Metadata) -> u64 {
            file_information(path)
                .map(|info| u64::from(info.nNumberOfLinks))
                .unwrap_or(1)
        }

        fn siblings(&self, path: &Path, _metadata: &Metadata) -> io::Result<Siblings> {
            let name = wide(path);
            let prefix = volume_prefix(path);
            let mut buf: Vec<u16> = vec![0; 1024];
            let mut found = Vec::new();

            let mut len = buf.len() as u32;
            // SAFETY: `name` is NUL-terminated and `buf` holds `len` u16 slots.
            let mut handle = unsafe { FindFirstFileNameW(name.as_ptr(), 0, &mut len, buf.as_mut_ptr()) };
            if handle == INVALID_HANDLE_VALUE {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(ERROR_MORE_DATA as i32) {
                    return Err(err);
                }
                buf.resize(len as usize, 0);
                // SAFETY: as above, with the buffer grown to the requested size.
                handle = unsafe { FindFirstFileNameW(name.as_ptr(), 0, &mut len, buf.as_mut_ptr()) };
                if handle == INVALID_HANDLE_VALUE {
                    return Err(io::Error::last_os_error());
                }
            }

            loop {
                let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
                let mut full = prefix.clone();
                full.push(OsString::from_wide(&buf[..end]));
                found.push(PathBuf::from(full));

                len = buf.len() as u32;
                // SAFETY: `handle` came from FindFirstFileNameW and is still open.
                let ok = unsafe { FindNextFileNameW(handle, &mut len, buf.as_mut_ptr()) };
                if ok != 0 {
                    continue;
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(ERROR_MORE_DATA as i32) {
                    buf.resize(len as usize, 0);
                    len = buf.len() as u32;
                    // SAFETY: same handle, larger buffer.
                    if unsafe { FindNextFileNameW(handle, &mut len, buf.as_mut_ptr()) } != 0 {
                        continue;
                    }
                }
                // SAFETY: closing the find handle exactly once.
                unsafe { FindClose(handle) };
                if err.raw_os_error() == Some(ERROR_HANDLE_EOF as i32) {
                    break;
                }
                return Err(err);
            }

            Ok(Siblings::Resolved(found))
        }
    }

    impl JunctionHandler for NativeJunctions {
        fn is_junction(&self, path: &Path, metadata: &Metadata) -> bool {
            let attrs = metadata.file_attributes();
            if attrs & FILE_ATTRIBUTE_REPARSE_POINT == 0 || attrs & FILE_ATTRIBUTE_DIRECTORY == 0 {
                return false;
            }
            std::fs::read_link(path)
                .map(|t| t.to_string_lossy().starts_with(VERBATIM_PREFIX))
                .unwrap_or(false)
        }

        fn target(&self, path: &Path) -> io::Result<PathBuf> {
            let raw = std::fs::read_link(path)?;
            let text = raw.to_string_lossy();
            Ok(match text.strip_prefix(VERBATIM_PREFIX) {
                Some(stripped) => PathBuf::from(stripped),
                None => raw,
            })
        }

        fn create(&self, link: &Path, target: &Path) -> io::Result<()> {
            let status = std::process::Command::new("cmd")
                .arg("/C")
                .arg("mklink")
                .arg("/J")
                .arg(link)
                .arg(target)
                .stdout(std::process::Stdio::null())
                .status()?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::other(format!("mklink /J exited with {}", status)))
            }
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::MetadataExt;
    use std::sync::OnceLock;
    use walkdir::WalkDir;

    /// Whether `a` and `b` are the same file (device and inode, links not followed)
    pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
        let a = std::fs::symlink_metadata(a)?;
        let b = std::fs::symlink_metadata(b)?;
        Ok(a.dev() == b.dev() && a.ino() == b.ino())
    }

    impl AttributeProvider for NativeAttributes {
        fn probe(&self, path: &Path) -> Probe<u32> {
            Probe::from_io(std::fs::symlink_metadata(path).map(|_| 0))
        }

        fn apply(&self, _path: &Path, _attributes: u32) -> io::Result<()> {
            Ok(())
        }
    }

    /// Sibling lookup through a device+inode index of the source root
    ///
    /// The index is built on first use, so trees without multiply-linked
    /// files never pay for the extra walk.
    #[derive(Debug)]
    pub struct NativeHardlinks {
        root: PathBuf,
        index: OnceLock<HashMap<(u64, u64), Vec<PathBuf>>>,
    }

    impl NativeHardlinks {
        pub fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                index: OnceLock::new(),
            }
        }

        fn build_index(&self) -> HashMap<(u64, u64), Vec<PathBuf>> {
            let mut index: HashMap<(u64, u64), Vec<PathBuf>> = HashMap::new();
            let walker = WalkDir::new(&self.root)
                .follow_links(false)
                .same_file_system(true)
                .sort_by_file_name();
            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(meta) = entry.metadata() {
                    if meta.nlink() > 1 {
                        index
                            .entry((meta.dev(), meta.ino()))
                            .or_default()
                            .push(entry.into_path());
                    }
                }
            }
            tracing::debug!("Indexed {} multiply-linked files under {}", index.len(), self.root.display());
            index
        }
    }

    impl HardlinkResolver for NativeHardlinks {
        fn link_count(&self, _path: &Path, metadata: &Metadata) -> u64 {
            metadata.nlink()
        }

        fn siblings(&self, path: &Path, metadata: &Metadata) -> io::Result<Siblings> {
            let index = self.index.get_or_init(|| self.build_index());
            let mut found = index
                .get(&(metadata.dev(), metadata.ino()))
                .cloned()
                .unwrap_or_default();
            if !found.iter().any(|p| p == path) {
                found.insert(0, path.to_path_buf());
            }
            Ok(Siblings::Resolved(found))
        }
    }

    impl JunctionHandler for NativeJunctions {
        fn is_junction(&self, _path: &Path, _metadata: &Metadata) -> bool {
            false
        }

        fn target(&self, path: &Path) -> io::Result<PathBuf> {
            std::fs::read_link(path)
        }

        fn create(&self, _link: &Path, _target: &Path) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "junctions are not supported on this platform",
            ))
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use super::*;

    /// File identity is unknown here; nothing is the same file
    pub fn same_file(_a: &Path, _b: &Path) -> io::Result<bool> {
        Ok(false)
    }

    impl AttributeProvider for NativeAttributes {
        fn probe(&self, path: &Path) -> Probe<u32> {
            Probe::from_io(std::fs::symlink_metadata(path).map(|_| 0))
        }

        fn apply(&self, _path: &Path, _attributes: u32) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct NativeHardlinks;

    impl NativeHardlinks {
        pub fn new(_root: &Path) -> Self {
            Self
        }
    }

    impl HardlinkResolver for NativeHardlinks {
        fn link_count(&self, _path: &Path, _metadata: &Metadata) -> u64 {
            1
        }

        fn siblings(&self, _path: &Path, _metadata: &Metadata) -> io::Result<Siblings> {
            Ok(Siblings::Unsupported)
        }
    }

    impl JunctionHandler for NativeJunctions {
        fn is_junction(&self, _path: &Path, _metadata: &Metadata) -> bool {
            false
        }

        fn target(&self, path: &Path) -> io::Result<PathBuf> {
            std::fs::read_link(path)
        }

        fn create(&self, _link: &Path, _target: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "junctions are not supported"))
        }
    }
}

pub use imp::{same_file, NativeHardlinks};
