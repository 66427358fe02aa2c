//! # Integrity engine
//!
//! Checksum manifests over a snapshot's files: SHA3-256 digests
//! keyed by forward-slash relative path, written as `checksums.sha3` (or a
//! numbered sibling if one already exists, mirroring the catalog's
//! collision-avoidance scheme). Three operations read these manifests back:
//! verifying a snapshot against its own manifest, live-verifying a manifest
//! against the current source tree, and finding files that exist in backups
//! but have since vanished from the source.

use crate::error::IntegrityMismatch;
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MANIFEST_STEM: &str = "checksums";
const MANIFEST_EXT: &str = "sha3";
const HASH_BUF_SIZE: usize = 64 * 1024;

/// One manifest entry: relative path (forward slashes, always) to hex digest.
pub type Manifest = BTreeMap<String, String>;

fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha3_256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Recursively lists regular files under `root`, relative paths only.
fn list_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Picks the next free manifest filename under `snapshot_root`:
/// `checksums.sha3`, then `checksums.2.sha3`, `checksums.3.sha3`, …
pub fn next_manifest_path(snapshot_root: &Path) -> PathBuf {
    let first = snapshot_root.join(format!("{MANIFEST_STEM}.{MANIFEST_EXT}"));
    if !first.exists() {
        return first;
    }
    let mut n = 2;
    loop {
        let candidate = snapshot_root.join(format!("{MANIFEST_STEM}.{n}.{MANIFEST_EXT}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Finds the most recently written manifest under `snapshot_root`, if any.
pub fn latest_manifest_path(snapshot_root: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<(u32, PathBuf)> = Vec::new();
    let first = snapshot_root.join(format!("{MANIFEST_STEM}.{MANIFEST_EXT}"));
    if first.exists() {
        candidates.push((1, first));
    }
    if let Ok(entries) = std::fs::read_dir(snapshot_root) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&format!("{MANIFEST_STEM}.")) {
                if let Some(digits) = rest.strip_suffix(&format!(".{MANIFEST_EXT}")) {
                    if let Ok(n) = digits.parse::<u32>() {
                        candidates.push((n, entry.path()));
                    }
                }
            }
        }
    }
    candidates.into_iter().max_by_key(|(n, _)| *n).map(|(_, p)| p)
}

/// Whether checksum creation should run for the `run_index`-th backup
/// (1-based), given a `--checksum-every N` cadence. `None` means "always".
pub fn should_checksum(run_index: u64, every: Option<u64>) -> bool {
    match every {
        None => true,
        Some(0) => false,
        Some(n) => run_index % n == 0,
    }
}

/// Walks `snapshot_root` and writes a fresh manifest, returning its path and
/// entry count. Per-file read failures are skipped silently — a checksum
/// pass is diagnostic, not a backup; a file unreadable here would already
/// have been logged as a [`crate::error::FileSkipError`] during the build.
pub fn create_manifest(snapshot_root: &Path) -> io::Result<(PathBuf, usize)> {
    let mut manifest = Manifest::new();
    for path in list_files(snapshot_root) {
        if path.file_name().map(|n| n.to_string_lossy().starts_with(MANIFEST_STEM)).unwrap_or(false) {
            continue;
        }
        if let Ok(digest) = hash_file(&path) {
            manifest.insert(relative_slash_path(snapshot_root, &path), digest);
        }
    }
    let path = next_manifest_path(snapshot_root);
    write_manifest(&path, &manifest)?;
    Ok((path, manifest.len()))
}

fn write_manifest(path: &Path, manifest: &Manifest) -> io::Result<()> {
    let mut file = File::create(path)?;
    for (rel, digest) in manifest {
        writeln!(file, "{rel} {digest}")?;
    }
    Ok(())
}

pub fn read_manifest(path: &Path) -> io::Result<Manifest> {
    let text = std::fs::read_to_string(path)?;
    let mut manifest = Manifest::new();
    for line in text.lines() {
        if let Some((rel, digest)) = line.rsplit_once(' ') {
            manifest.insert(rel.to_string(), digest.to_string());
        }
    }
    Ok(manifest)
}

/// Result of re-hashing a snapshot against its own manifest.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: usize,
    pub mismatches: Vec<IntegrityMismatch>,
    pub missing: Vec<String>,
}

/// Re-hashes every file the manifest lists and compares against the stored
/// digest. A result file recording the mismatches is written
/// only when there are any — a clean verify leaves no trace.
pub fn verify_manifest(snapshot_root: &Path, manifest_path: &Path) -> io::Result<VerifyReport> {
    let manifest = read_manifest(manifest_path)?;
    let mut report = VerifyReport::default();
    for (rel, expected) in &manifest {
        let path = snapshot_root.join(rel);
        match hash_file(&path) {
            Ok(actual) if &actual == expected => report.checked += 1,
            Ok(actual) => {
                report.mismatches.push(IntegrityMismatch {
                    path: path.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
            Err(_) => report.missing.push(rel.clone()),
        }
    }
    if !report.mismatches.is_empty() {
        let result_path = manifest_path.with_extension(format!("{MANIFEST_EXT}.mismatches"));
        let mut file = File::create(result_path)?;
        for m in &report.mismatches {
            writeln!(file, "{}  expected={} actual={}", m.path.display(), m.expected, m.actual)?;
        }
    }
    Ok(report)
}

/// One outcome of comparing a manifest entry against the live source tree.
#[derive(Debug)]
pub enum LiveOutcome {
    Matching(String),
    Mismatching(String),
    Errored(String, String),
}

#[derive(Debug, Default)]
pub struct LiveVerifyReport {
    pub outcomes: Vec<LiveOutcome>,
}

impl LiveVerifyReport {
    pub fn matching_count(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, LiveOutcome::Matching(_))).count()
    }
    pub fn mismatching_count(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, LiveOutcome::Mismatching(_))).count()
    }
    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, LiveOutcome::Errored(..))).count()
    }
}

/// Walks every file under `source_root` and compares it against its
/// counterpart in `snapshot_root` — answers "has this file drifted since it
/// was last backed up" independent of any checksum manifest. A source file
/// whose snapshot counterpart is missing or unreadable falls in the error
/// partition, not silently dropped.
pub fn live_verify(source_root: &Path, snapshot_root: &Path) -> io::Result<LiveVerifyReport> {
    let mut report = LiveVerifyReport::default();
    for path in list_files(source_root) {
        let rel = relative_slash_path(source_root, &path);
        let counterpart = snapshot_root.join(&rel);
        let source_digest = match hash_file(&path) {
            Ok(d) => d,
            Err(e) => {
                report.outcomes.push(LiveOutcome::Errored(rel, e.to_string()));
                continue;
            }
        };
        match hash_file(&counterpart) {
            Ok(expected) if expected == source_digest => report.outcomes.push(LiveOutcome::Matching(rel)),
            Ok(_) => report.outcomes.push(LiveOutcome::Mismatching(rel)),
            Err(e) => report.outcomes.push(LiveOutcome::Errored(rel, e.to_string())),
        }
    }
    Ok(report)
}

/// Every relative path that appears in at least one snapshot under
/// `backup_root` but no longer exists under `source_root` — files the
/// backup still remembers that the live source has since deleted.
pub fn find_missing(backup_root: &Path, source_root: &Path, snapshot_dirs: &[PathBuf]) -> HashSet<String> {
    let mut ever_backed_up = HashSet::new();
    for snapshot_dir in snapshot_dirs {
        for path in list_files(snapshot_dir) {
            if path.file_name().map(|n| n.to_string_lossy().starts_with(MANIFEST_STEM)).unwrap_or(false) {
                continue;
            }
            if path.file_name().map(|n| n == ".snapkeep-complete").unwrap_or(false) {
                continue;
            }
            ever_backed_up.insert(relative_slash_path(snapshot_dir, &path));
        }
    }
    let _ = backup_root;
    ever_backed_up
        .into_iter()
        .filter(|rel| !source_root.join(rel).exists())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn create_and_verify_round_trip_with_no_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join("a.txt"), b"hello").unwrap();

        let (manifest_path, count) = create_manifest(&snap).unwrap();
        assert_eq!(count, 1);

        let report = verify_manifest(&snap, &manifest_path).unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.mismatches.is_empty());
        assert!(!manifest_path.with_extension("sha3.mismatches").exists());
    }

    #[test]
    fn verify_detects_mismatch_and_writes_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join("a.txt"), b"hello").unwrap();
        let (manifest_path, _) = create_manifest(&snap).unwrap();

        fs::write(snap.join("a.txt"), b"tampered").unwrap();
        let report = verify_manifest(&snap, &manifest_path).unwrap();
        assert_eq!(report.mismatches.len(), 1);
        assert!(manifest_path.with_extension("sha3.mismatches").exists());
    }

    #[test]
    fn next_manifest_path_numbers_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join("checksums.sha3"), "").unwrap();
        let path = next_manifest_path(&snap);
        assert_eq!(path.file_name().unwrap(), "checksums.2.sha3");
    }

    #[test]
    fn live_verify_triages_matching_mismatching_and_errored() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&snap).unwrap();
        fs::write(source.join("same.txt"), b"same").unwrap();
        fs::write(source.join("changed.txt"), b"drifted").unwrap();
        fs::write(source.join("never_backed_up.txt"), b"new").unwrap();
        fs::write(snap.join("same.txt"), b"same").unwrap();
        fs::write(snap.join("changed.txt"), b"original").unwrap();

        let report = live_verify(&source, &snap).unwrap();
        assert_eq!(report.matching_count(), 1);
        assert_eq!(report.mismatching_count(), 1);
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn live_verify_does_not_require_a_checksum_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&snap).unwrap();
        fs::write(source.join("a.txt"), b"hello").unwrap();
        fs::write(snap.join("a.txt"), b"hello").unwrap();

        let report = live_verify(&source, &snap).unwrap();
        assert_eq!(report.matching_count(), 1);
    }

    #[test]
    fn find_missing_reports_files_no_longer_in_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let snap = dir.path().join("snap1");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&snap).unwrap();
        fs::write(source.join("keep.txt"), b"keep").unwrap();
        fs::write(snap.join("keep.txt"), b"keep").unwrap();
        fs::write(snap.join("removed.txt"), b"removed").unwrap();

        let missing = find_missing(dir.path(), &source, &[snap]);
        assert_eq!(missing, HashSet::from(["removed.txt".to_string()]));
    }

    #[test]
    fn should_checksum_respects_cadence() {
        assert!(should_checksum(1, None));
        assert!(!should_checksum(1, Some(3)));
        assert!(should_checksum(3, Some(3)));
        assert!(!should_checksum(2, Some(3)));
    }
}
