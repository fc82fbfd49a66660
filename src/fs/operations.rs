//! File operations
//!
//! The trusted primitives the engines are built on: a non-recursive
//! directory listing, a content+stat file copy, symlink recreation and
//! source-to-destination path translation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffer size for buffered file copies
const BUFFER_SIZE: usize = 1024 * 1024;

/// The copy primitive used by the copy engine
///
/// Implementations copy content and basic stat. They never decide what to
/// copy.
pub trait CopyPrimitive: Send + Sync {
    /// Copy one regular file, returning the number of bytes written
    fn copy_file(&self, source: &Path, dest: &Path) -> io::Result<u64>;

    /// Recreate a symbolic link with the same target
    fn copy_symlink(&self, source: &Path, dest: &Path) -> io::Result<()>;
}

/// Buffered file copier that keeps permissions and timestamps
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCopier;

impl FileCopier {
    fn copy_buffered(&self, source: &Path, dest: &Path) -> io::Result<u64> {
        let src_file = File::open(source)?;
        let dst_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)?;

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, src_file);
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dst_file);
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    }
}

impl CopyPrimitive for FileCopier {
    fn copy_file(&self, source: &Path, dest: &Path) -> io::Result<u64> {
        let copied = self.copy_buffered(source, dest)?;
        let perms = fs::metadata(source)?.permissions();
        fs::set_permissions(dest, perms)?;
        copy_times(source, dest)?;
        Ok(copied)
    }

    fn copy_symlink(&self, source: &Path, dest: &Path) -> io::Result<()> {
        let target = fs::read_link(source)?;
        create_symlink(&target, source, dest)?;
        let meta = fs::symlink_metadata(source)?;
        let atime = filetime::FileTime::from_last_access_time(&meta);
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        // Not every filesystem lets link times be set.
        let _ = filetime::set_symlink_file_times(dest, atime, mtime);
        Ok(())
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, _source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(windows)]
fn create_symlink(target: &Path, source: &Path, dest: &Path) -> io::Result<()> {
    use std::os::windows::fs::FileTypeExt;
    if fs::symlink_metadata(source)?.file_type().is_symlink_dir() {
        std::os::windows::fs::symlink_dir(target, dest)
    } else {
        std::os::windows::fs::symlink_file(target, dest)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, _source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported"))
}

/// Copy access and modification times from `source` onto `dest`
pub fn copy_times(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dest, atime, mtime)
}

/// Child names of a directory, split by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Real subdirectories
    pub dirs: Vec<String>,
    /// Everything else, symlinks included
    pub files: Vec<String>,
}

impl DirListing {
    /// All names, directories first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().chain(self.files.iter()).map(|s| s.as_str())
    }
}

/// Non-recursive listing that does not follow symlinks
///
/// Names are sorted so that repeated runs see the same order.
pub fn list_dir(dir: &Path) -> io::Result<DirListing> {
    let mut listing = DirListing::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            listing.dirs.push(name);
        } else {
            listing.files.push(name);
        }
    }
    listing.dirs.sort();
    listing.files.sort();
    Ok(listing)
}

/// Swap the `src_root` prefix of `path` for `dst_root`
///
/// Paths outside `src_root` are returned unchanged.
pub fn translate(path: &Path, src_root: &Path, dst_root: &Path) -> PathBuf {
    match path.strip_prefix(src_root) {
        Ok(rel) if rel.as_os_str().is_empty() => dst_root.to_path_buf(),
        Ok(rel) => dst_root.join(rel),
        Err(_) => path.to_path_buf(),
    }
}

/// Whether `path` is a directory with no entries
pub fn is_dir_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_copy_file_preserves_content_and_mtime() {
        let temp = TempDir::new().unwrap();
        let src = create_test_file(temp.path(), "src.txt", b"Hello, World!");
        let old = filetime::FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        let dst = temp.path().join("dst.txt");
        let bytes = FileCopier.copy_file(&src, &dst).unwrap();

        assert_eq!(bytes, 13);
        assert_eq!(fs::read(&dst).unwrap(), b"Hello, World!");
        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        let err = FileCopier.copy_file(&missing, &temp.path().join("x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!temp.path().join("x").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_symlink() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink("does-not-exist", &link).unwrap();

        let dst = temp.path().join("copy");
        FileCopier.copy_symlink(&link, &dst).unwrap();
        assert_eq!(fs::read_link(&dst).unwrap(), PathBuf::from("does-not-exist"));
    }

    #[test]
    fn test_list_dir_sorted_and_split() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("zdir")).unwrap();
        fs::create_dir(temp.path().join("adir")).unwrap();
        create_test_file(temp.path(), "b.txt", b"");
        create_test_file(temp.path(), "a.txt", b"");

        let listing = list_dir(temp.path()).unwrap();
        assert_eq!(listing.dirs, vec!["adir", "zdir"]);
        assert_eq!(listing.files, vec!["a.txt", "b.txt"]);
        assert_eq!(listing.names().count(), 4);
    }

    #[test]
    fn test_translate() {
        let src = Path::new("/src");
        let dst = Path::new("/mnt/dst");
        assert_eq!(translate(Path::new("/src/a/b"), src, dst), PathBuf::from("/mnt/dst/a/b"));
        assert_eq!(translate(Path::new("/src"), src, dst), PathBuf::from("/mnt/dst"));
        assert_eq!(translate(Path::new("/elsewhere/x"), src, dst), PathBuf::from("/elsewhere/x"));
    }

    #[test]
    fn test_is_dir_empty() {
        let temp = TempDir::new().unwrap();
        assert!(is_dir_empty(temp.path()).unwrap());
        create_test_file(temp.path(), "f", b"1");
        assert!(!is_dir_empty(temp.path()).unwrap());
    }
}
