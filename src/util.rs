use log::warn;
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{PatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub relative_path: String,
    pub kind: EntryKind,
    pub full_path: PathBuf,
    /// File size in bytes at walk time (0 for directories).
    pub size: u64,
}

/// Walk a directory tree and collect all entries keyed by relative path.
/// Paths use forward slashes so containers are portable across platforms.
pub fn walk_directory(root: &Path) -> Result<BTreeMap<String, DirEntry>> {
    let root = root.canonicalize().map_err(|e| PatchError::io(root, e))?;

    let mut entries = BTreeMap::new();

    for entry in WalkDir::new(&root).min_depth(1) {
        let entry = entry.map_err(|e| PatchError::io(&root, e.into()))?;

        let full_path = entry.path().to_path_buf();
        let relative = full_path
            .strip_prefix(&root)
            .map_err(|_| PatchError::UnsafePath(full_path.display().to_string()))?;

        let relative_str = relative
            .to_str()
            .ok_or_else(|| PatchError::Malformed(format!("non-UTF-8 path: {}", relative.display())))?
            .replace('\\', "/");

        let kind = if entry.file_type().is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };

        let size = match kind {
            EntryKind::File => entry
                .metadata()
                .map_err(|e| PatchError::io(&full_path, e.into()))?
                .len(),
            EntryKind::Dir => 0,
        };

        entries.insert(
            relative_str.clone(),
            DirEntry {
                relative_path: relative_str,
                kind,
                full_path,
                size,
            },
        );
    }

    Ok(entries)
}

/// Read-only file contents: a live mapping, or nothing for empty files
/// (zero-length mappings are rejected on some platforms).
pub enum FileData {
    Mapped(Mmap),
    Empty,
}

impl Deref for FileData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileData::Mapped(map) => map,
            FileData::Empty => &[],
        }
    }
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the mapping is live.
pub fn mmap_file(path: &Path) -> Result<FileData> {
    let file = std::fs::File::open(path).map_err(|e| PatchError::io(path, e))?;
    let len = file.metadata().map_err(|e| PatchError::io(path, e))?.len();
    if len == 0 {
        return Ok(FileData::Empty);
    }
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| PatchError::io(path, e))?;
    Ok(FileData::Mapped(map))
}

/// Turn a relative path decoded from a container into a path below a root.
/// Rejects absolute paths, `..` and anything else that could escape it.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    let clean = !relative.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        warn!("rejected container path {relative:?}");
        return Err(PatchError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(candidate))
}

/// Whether two paths name the same existing location.
pub fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Fail with `SamePath` when `source` and `target` name the same location.
pub fn ensure_distinct(source: &Path, target: &Path) -> Result<()> {
    if same_location(source, target) {
        warn!("refusing to use {} as both source and target", source.display());
        return Err(PatchError::SamePath(target.to_path_buf()));
    }
    Ok(())
}

/// Write `data` to `path`, creating parent directories as needed.
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
    }
    std::fs::write(path, data).map_err(|e| PatchError::io(path, e))
}

/// Hash file contents for identity checks across trees.
pub fn fingerprint(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_accepts_nested_relative() {
        let root = Path::new("/out");
        assert_eq!(safe_join(root, "a/b.txt").unwrap(), Path::new("/out/a/b.txt"));
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/out");
        for bad in ["", "../x", "a/../../x", "/etc/passwd", "./a"] {
            assert!(
                matches!(safe_join(root, bad), Err(PatchError::UnsafePath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_walk_directory_relative_paths() {
        let temp = tempfile::TempDir::new().unwrap();
        write_file(&temp.path().join("sub/inner.txt"), b"abc").unwrap();
        write_file(&temp.path().join("top.txt"), b"").unwrap();

        let entries = walk_directory(temp.path()).unwrap();
        let paths: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(paths, vec!["sub", "sub/inner.txt", "top.txt"]);
        assert_eq!(entries["sub"].kind, EntryKind::Dir);
        assert_eq!(entries["sub/inner.txt"].size, 3);
    }

    #[test]
    fn test_ensure_distinct() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("a.bin");
        write_file(&file, b"x").unwrap();
        let alias = temp.path().join("sub/../a.bin");
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();

        assert!(matches!(
            ensure_distinct(&file, &alias),
            Err(PatchError::SamePath(_))
        ));
        assert!(ensure_distinct(&file, &temp.path().join("missing.bin")).is_ok());
    }

    #[test]
    fn test_mmap_empty_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("empty");
        write_file(&path, b"").unwrap();
        assert!(mmap_file(&path).unwrap().is_empty());
        assert!(matches!(
            mmap_file(&temp.path().join("missing")),
            Err(PatchError::Io { .. })
        ));
    }
}
