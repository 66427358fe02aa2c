//! # Recovery, restore, purge, and move-backup
//!
//! The read side of the catalog: pulling one file's history back
//! out, restoring a whole snapshot to a fresh location, purging a path from
//! every snapshot that has it, and re-materializing a contiguous snapshot
//! range at a new root without losing the hard-link sharing *within* that
//! range.

use crate::catalog::SnapshotRef;
use crate::fsops::{remove_tree, EntryKind, FileSystem};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// One version of a path found while scanning the catalog for `recover`.
#[derive(Debug, Clone)]
pub struct RecoveryCandidate {
    pub snapshot_label: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime_secs: i64,
}

/// Every version of `relative_path` found across `snapshots`, oldest first.
/// A path absent from a given snapshot is simply not a candidate for it —
/// this is not an error, since most files don't exist in every snapshot.
pub fn recover_candidates(
    fs_ops: &dyn FileSystem,
    snapshots: &[SnapshotRef],
    relative_path: &str,
) -> Vec<RecoveryCandidate> {
    let mut out = Vec::new();
    for snap in snapshots {
        let path = join_relative(&snap.path, relative_path);
        if let Ok(stat) = fs_ops.stat(&path) {
            if stat.kind == EntryKind::File {
                out.push(RecoveryCandidate {
                    snapshot_label: label_of(&snap.path),
                    path,
                    size: stat.size,
                    mtime_secs: stat.mtime_secs,
                });
            }
        }
    }
    out
}

/// Copies one recovered candidate to `destination`, appending ".1", ".2", …
/// if a file already exists there — recovery never clobbers. In a directory
/// containing X, X.1, X.2, recovering a new X produces X.3.
pub fn recover_copy(fs_ops: &dyn FileSystem, candidate_path: &Path, destination: &Path) -> io::Result<PathBuf> {
    let mut target = destination.to_path_buf();
    let mut n = 1;
    while target.exists() {
        target = numbered_sibling(destination, n);
        n += 1;
    }
    if let Some(parent) = target.parent() {
        fs_ops.create_dir_all(parent)?;
    }
    fs_ops.copy_file(candidate_path, &target)?;
    Ok(target)
}

fn numbered_sibling(path: &Path, n: u32) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    let name = match ext {
        Some(ext) => format!("{stem}.{n}.{ext}"),
        None => format!("{stem}.{n}"),
    };
    path.with_file_name(name)
}

/// Every distinct relative path ever backed up under `relative_dir`, across
/// all snapshots.
pub fn list_paths(snapshots: &[SnapshotRef], relative_dir: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for snap in snapshots {
        let scan_root = join_relative(&snap.path, relative_dir);
        for path in list_files_recursive(&scan_root) {
            out.insert(relative_slash(&snap.path, &path));
        }
    }
    out
}

/// Whether extra destination entries (not present in the restored snapshot)
/// are removed or left alone. Mutually exclusive at the CLI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraPolicy {
    DeleteExtra,
    KeepExtra,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub files_copied: u64,
    pub symlinks_created: u64,
    pub extras_removed: u64,
}

/// Copies (never links) a whole snapshot tree to `destination`. Restoring
/// always produces independent content — the point is to detach from the
/// backup root entirely.
pub fn restore_snapshot(
    fs_ops: &dyn FileSystem,
    snapshot_root: &Path,
    destination: &Path,
    extra_policy: ExtraPolicy,
) -> io::Result<RestoreReport> {
    fs_ops.create_dir_all(destination)?;
    let mut report = RestoreReport::default();
    let mut restored: BTreeSet<String> = BTreeSet::new();
    copy_tree(fs_ops, snapshot_root, destination, destination, &mut report, &mut restored)?;

    if extra_policy == ExtraPolicy::DeleteExtra {
        for path in list_files_recursive(destination) {
            let rel = relative_slash(destination, &path);
            if !restored.contains(&rel) {
                if fs_ops.remove_file(&path).is_ok() {
                    report.extras_removed += 1;
                }
            }
        }
        prune_empty_dirs(destination);
    }
    Ok(report)
}

fn copy_tree(
    fs_ops: &dyn FileSystem,
    src_dir: &Path,
    dest_dir: &Path,
    dest_root: &Path,
    report: &mut RestoreReport,
    restored: &mut BTreeSet<String>,
) -> io::Result<()> {
    for entry in fs_ops.list_dir(src_dir)? {
        let Ok(stat) = fs_ops.stat(&entry) else { continue };
        let name = entry.file_name().unwrap();
        let dest = dest_dir.join(name);
        match stat.kind {
            EntryKind::Directory => {
                fs_ops.create_dir_all(&dest)?;
                copy_tree(fs_ops, &entry, &dest, dest_root, report, restored)?;
            }
            EntryKind::Symlink => {
                if let Ok(target) = fs_ops.read_link(&entry) {
                    let _ = fs_ops.remove_file(&dest);
                    if fs_ops.symlink(&target, &dest).is_ok() {
                        report.symlinks_created += 1;
                        restored.insert(relative_slash(dest_root, &dest));
                    }
                }
            }
            EntryKind::File => {
                if is_manifest_or_sentinel(&entry) {
                    continue;
                }
                fs_ops.copy_file(&entry, &dest)?;
                report.files_copied += 1;
                restored.insert(relative_slash(dest_root, &dest));
            }
            EntryKind::Other => {}
        }
    }
    Ok(())
}

fn prune_empty_dirs(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            prune_empty_dirs(&path);
            let _ = std::fs::remove_dir(&path);
        }
    }
}

fn is_manifest_or_sentinel(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    name == ".snapkeep-complete" || name.starts_with("checksums.")
}

/// One snapshot's copy of a path under consideration for purge.
#[derive(Debug, Clone)]
pub struct PurgeCandidate {
    pub snapshot_label: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Every snapshot that has something at `relative_path`, with its kind —
/// if snapshots disagree on file-vs-directory (rare: the source path's type
/// changed over time), the caller can present a kind picker instead of
/// assuming.
pub fn purge_candidates(fs_ops: &dyn FileSystem, snapshots: &[SnapshotRef], relative_path: &str) -> Vec<PurgeCandidate> {
    let mut out = Vec::new();
    for snap in snapshots {
        let path = join_relative(&snap.path, relative_path);
        if let Ok(stat) = fs_ops.stat(&path) {
            out.push(PurgeCandidate {
                snapshot_label: label_of(&snap.path),
                path,
                kind: stat.kind,
            });
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
}

/// Removes `relative_path` from every snapshot that has it. Hard-link safe —
/// goes through [`crate::fsops::remove_tree`] for directories so siblings
/// sharing inodes with the purged path are untouched.
pub fn purge(fs_ops: &dyn FileSystem, snapshots: &[SnapshotRef], relative_path: &str) -> io::Result<PurgeReport> {
    let mut report = PurgeReport::default();
    for snap in snapshots {
        let path = join_relative(&snap.path, relative_path);
        let Ok(stat) = fs_ops.stat(&path) else { continue };
        match stat.kind {
            EntryKind::Directory => remove_tree(fs_ops, &path)?,
            _ => fs_ops.remove_file(&path)?,
        }
        report.removed.push(path);
    }
    Ok(report)
}

#[derive(Debug, Default)]
pub struct MoveReport {
    pub files_copied: u64,
    pub files_linked: u64,
    pub snapshots_moved: u64,
}

/// Re-materializes a contiguous range of snapshots at `new_root`, preserving
/// hard-link sharing *within the range*: if two snapshots in the range share
/// an inode for the same relative path, their copies at `new_root` are
/// hard-linked to each other rather than duplicated — even though neither is
/// linked back to the original backup root anymore.
pub fn move_backup(fs_ops: &dyn FileSystem, snapshots_in_range: &[SnapshotRef], new_root: &Path) -> io::Result<MoveReport> {
    let mut report = MoveReport::default();
    let mut previous_original: Option<PathBuf> = None;
    let mut previous_materialized: BTreeMap<String, PathBuf> = BTreeMap::new();

    for snap in snapshots_in_range {
        let leaf = snap.path.file_name().unwrap_or_default();
        let year = snap.timestamp.format("%Y").to_string();
        let dest_root = new_root.join(year).join(leaf);
        fs_ops.create_dir_all(&dest_root)?;

        let mut materialized = BTreeMap::new();
        move_one(
            fs_ops,
            &snap.path,
            &dest_root,
            "",
            previous_original.as_deref(),
            &previous_materialized,
            &mut materialized,
            &mut report,
        )?;
        previous_original = Some(snap.path.clone());
        previous_materialized = materialized;
        report.snapshots_moved += 1;
    }
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn move_one(
    fs_ops: &dyn FileSystem,
    src_dir: &Path,
    dest_dir: &Path,
    rel_prefix: &str,
    previous_original_root: Option<&Path>,
    previous_materialized: &BTreeMap<String, PathBuf>,
    materialized: &mut BTreeMap<String, PathBuf>,
    report: &mut MoveReport,
) -> io::Result<()> {
    for entry in fs_ops.list_dir(src_dir)? {
        let Ok(stat) = fs_ops.stat(&entry) else { continue };
        let name = entry.file_name().unwrap();
        let rel = if rel_prefix.is_empty() {
            name.to_string_lossy().to_string()
        } else {
            format!("{rel_prefix}/{}", name.to_string_lossy())
        };
        let dest = dest_dir.join(name);

        match stat.kind {
            EntryKind::Directory => {
                fs_ops.create_dir_all(&dest)?;
                move_one(fs_ops, &entry, &dest, &rel, previous_original_root, previous_materialized, materialized, report)?;
            }
            EntryKind::Symlink => {
                if let Ok(target) = fs_ops.read_link(&entry) {
                    let _ = fs_ops.symlink(&target, &dest);
                }
            }
            EntryKind::File => {
                let shared = previous_original_root
                    .map(|prev_root| {
                        let prev_path = join_relative(prev_root, &rel);
                        fs_ops.same_inode(&entry, &prev_path).unwrap_or(false)
                    })
                    .unwrap_or(false);

                if shared {
                    if let Some(linked_to) = previous_materialized.get(&rel) {
                        fs_ops.hard_link(linked_to, &dest)?;
                        materialized.insert(rel, dest);
                        report.files_linked += 1;
                        continue;
                    }
                }
                fs_ops.copy_file(&entry, &dest)?;
                materialized.insert(rel, dest);
                report.files_copied += 1;
            }
            EntryKind::Other => {}
        }
    }
    Ok(())
}

fn join_relative(root: &Path, relative_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for component in relative_path.split('/').filter(|c| !c.is_empty()) {
        out.push(component);
    }
    out
}

fn relative_slash(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

fn label_of(snapshot_path: &Path) -> String {
    snapshot_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

fn list_files_recursive(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::RealFs;
    use chrono::Local;
    use std::fs;

    fn make_snap(dir: &Path, label: &str) -> SnapshotRef {
        let path = dir.join(label);
        fs::create_dir_all(&path).unwrap();
        SnapshotRef { path, timestamp: Local::now(), os_label: None }
    }

    #[test]
    fn recover_candidates_finds_versions_across_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = make_snap(dir.path(), "s1");
        let s2 = make_snap(dir.path(), "s2");
        fs::write(s1.path.join("doc.txt"), b"v1").unwrap();
        fs::write(s2.path.join("doc.txt"), b"v2").unwrap();

        let candidates = recover_candidates(&RealFs, &[s1, s2], "doc.txt");
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn recover_copy_avoids_clobbering_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.txt");
        fs::write(&src, b"content").unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, b"already here").unwrap();

        let written = recover_copy(&RealFs, &src, &dest).unwrap();
        assert_ne!(written, dest);
        assert_eq!(written.file_name().unwrap(), "out.1.txt");
    }

    #[test]
    fn recover_copy_picks_smallest_unused_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.txt");
        fs::write(&src, b"content").unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, b"v0").unwrap();
        fs::write(dir.path().join("out.1.txt"), b"v1").unwrap();
        fs::write(dir.path().join("out.2.txt"), b"v2").unwrap();

        let written = recover_copy(&RealFs, &src, &dest).unwrap();
        assert_eq!(written.file_name().unwrap(), "out.3.txt");
    }

    #[test]
    fn list_paths_unions_across_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = make_snap(dir.path(), "s1");
        let s2 = make_snap(dir.path(), "s2");
        fs::create_dir_all(s1.path.join("docs")).unwrap();
        fs::create_dir_all(s2.path.join("docs")).unwrap();
        fs::write(s1.path.join("docs/a.txt"), b"a").unwrap();
        fs::write(s2.path.join("docs/b.txt"), b"b").unwrap();

        let paths = list_paths(&[s1, s2], "docs");
        assert!(paths.contains("docs/a.txt"));
        assert!(paths.contains("docs/b.txt"));
    }

    #[test]
    fn restore_copies_independent_content() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join("a.txt"), b"hello").unwrap();
        let dest = dir.path().join("restored");

        let report = restore_snapshot(&RealFs, &snap, &dest, ExtraPolicy::KeepExtra).unwrap();
        assert_eq!(report.files_copied, 1);
        assert!(!RealFs.same_inode(&snap.join("a.txt"), &dest.join("a.txt")).unwrap());
    }

    #[test]
    fn restore_with_delete_extra_removes_untracked_destination_files() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join("a.txt"), b"hello").unwrap();
        let dest = dir.path().join("restored");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("leftover.txt"), b"stale").unwrap();

        let report = restore_snapshot(&RealFs, &snap, &dest, ExtraPolicy::DeleteExtra).unwrap();
        assert_eq!(report.extras_removed, 1);
        assert!(!dest.join("leftover.txt").exists());
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn purge_removes_path_from_every_snapshot_that_has_it() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = make_snap(dir.path(), "s1");
        let s2 = make_snap(dir.path(), "s2");
        fs::write(s1.path.join("secret.txt"), b"x").unwrap();
        fs::write(s2.path.join("secret.txt"), b"x").unwrap();
        fs::write(s2.path.join("keep.txt"), b"y").unwrap();

        let report = purge(&RealFs, &[s1, s2], "secret.txt").unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(dir.path().join("s2/keep.txt").exists());
    }

    #[test]
    fn move_backup_preserves_intra_range_hard_link_sharing() {
        let dir = tempfile::tempdir().unwrap();
        let shared_src = dir.path().join("original.txt");
        fs::write(&shared_src, b"shared").unwrap();
        let s1 = make_snap(dir.path(), "s1");
        let s2 = make_snap(dir.path(), "s2");
        fs::hard_link(&shared_src, s1.path.join("f.txt")).unwrap();
        fs::hard_link(&shared_src, s2.path.join("f.txt")).unwrap();

        let new_root = dir.path().join("moved");
        let report = move_backup(&RealFs, &[s1.clone(), s2.clone()], &new_root).unwrap();
        assert_eq!(report.snapshots_moved, 2);
        assert_eq!(report.files_copied, 1);
        assert_eq!(report.files_linked, 1);

        let moved_s1 = new_root.join(s1.timestamp.format("%Y").to_string()).join("s1").join("f.txt");
        let moved_s2 = new_root.join(s2.timestamp.format("%Y").to_string()).join("s2").join("f.txt");
        assert!(RealFs.same_inode(&moved_s1, &moved_s2).unwrap());
    }
}
