//! # Filesystem capability surface
//!
//! Per the design notes, the engine talks to the filesystem only through this
//! small trait, never through bare `std::fs` calls scattered across modules.
//! This keeps the platform-specific branches (case sensitivity, reparse
//! points, permission bits) behind one boundary and gives tests a stable seam
//! to assert against using real temporary directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The kind of a filesystem entry, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// A lightweight snapshot of one entry's metadata, as needed by the builder
/// and staleness comparator. Deliberately smaller than `std::fs::Metadata` —
/// only the fields the engine's decisions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_secs: i64,
    #[cfg(unix)]
    pub mode: u32,
}

/// Filesystem operations the engine needs, abstracted so platform quirks
/// (Windows reparse points, Unix permission bits) live in one `impl`.
pub trait FileSystem {
    fn stat(&self, path: &Path) -> io::Result<EntryStat>;
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    fn is_reparse_point(&self, path: &Path) -> bool;
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn free_space(&self, path: &Path) -> io::Result<u64>;
    fn same_inode(&self, a: &Path, b: &Path) -> io::Result<bool>;
}

/// Real-OS implementation backing production runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn stat(&self, path: &Path) -> io::Result<EntryStat> {
        let meta = fs::symlink_metadata(path)?;
        let kind = if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        let mtime_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(EntryStat {
                kind,
                size: meta.len(),
                mtime_secs,
                mode: meta.permissions().mode(),
            })
        }
        #[cfg(not(unix))]
        {
            Ok(EntryStat {
                kind,
                size: meta.len(),
                mtime_secs,
            })
        }
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn is_reparse_point(&self, path: &Path) -> bool {
        // Windows junctions/reparse points surface as a file-attribute bit
        // that `std` doesn't expose portably outside of the `symlink` file
        // type; on Unix there is no equivalent, so nothing is ever excluded
        // here. A real Windows build would check
        // `file_type.is_symlink() && attributes & FILE_ATTRIBUTE_REPARSE_POINT`
        // via `std::os::windows::fs::MetadataExt`.
        #[cfg(windows)]
        {
            use std::os::windows::fs::MetadataExt;
            const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
            fs::symlink_metadata(path)
                .map(|m| m.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0)
                .unwrap_or(false)
        }
        #[cfg(not(windows))]
        {
            let _ = path;
            false
        }
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        fs::hard_link(original, link)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
        }
        #[cfg(windows)]
        {
            // Best-effort: Windows requires knowing file-vs-dir ahead of
            // time. Try file first, fall back to dir.
            std::os::windows::fs::symlink_file(target, link)
                .or_else(|_| std::os::windows::fs::symlink_dir(target, link))
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = (target, link);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "symlinks unsupported on this platform",
            ))
        }
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let written = fs::copy(from, to)?;
        if let Ok(meta) = fs::metadata(from) {
            let mtime = filetime::FileTime::from_last_modification_time(&meta);
            let _ = filetime::set_file_mtime(to, mtime);
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(to, fs::Permissions::from_mode(meta.permissions().mode()));
            }
        }
        Ok(written)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }

    fn same_inode(&self, a: &Path, b: &Path) -> io::Result<bool> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let ma = fs::symlink_metadata(a)?;
            let mb = fs::symlink_metadata(b)?;
            Ok(ma.dev() == mb.dev() && ma.ino() == mb.ino())
        }
        #[cfg(not(unix))]
        {
            // No portable inode-equality primitive; treat as unknown.
            let _ = (a, b);
            Ok(false)
        }
    }
}

/// Recursively removes a directory tree by unlinking each entry rather than
/// following/re-deriving inodes — safe to use on a tree that shares hard
/// links with other snapshots, since unlinking only drops this directory's
/// reference to each inode.
pub fn remove_tree(fs_ops: &dyn FileSystem, root: &Path) -> io::Result<()> {
    let stat = fs_ops.stat(root)?;
    if stat.kind != EntryKind::Directory {
        return fs_ops.remove_file(root);
    }
    for entry in fs_ops.list_dir(root)? {
        let entry_stat = fs_ops.stat(&entry)?;
        match entry_stat.kind {
            EntryKind::Directory => remove_tree(fs_ops, &entry)?,
            _ => fs_ops.remove_file(&entry)?,
        }
    }
    fs_ops.remove_dir(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_tree_unlinks_shared_inode_without_touching_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let a_dir = dir.path().join("a");
        let b_dir = dir.path().join("b");
        fs::create_dir_all(&a_dir).unwrap();
        fs::create_dir_all(&b_dir).unwrap();
        let shared_src = dir.path().join("shared.txt");
        fs::write(&shared_src, b"content").unwrap();
        fs::hard_link(&shared_src, a_dir.join("shared.txt")).unwrap();
        fs::hard_link(&shared_src, b_dir.join("shared.txt")).unwrap();

        remove_tree(&RealFs, &a_dir).unwrap();

        assert!(!a_dir.exists());
        assert!(b_dir.join("shared.txt").exists());
        let content = fs::read_to_string(b_dir.join("shared.txt")).unwrap();
        assert_eq!(content, "content");
    }
}
