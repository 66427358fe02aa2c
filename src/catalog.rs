//! # Snapshot catalog
//!
//! The on-disk naming scheme and directory layout through which snapshots
//! are discovered, ordered, and identified:
//!
//! ```text
//! <backup-root>/
//!   YYYY/
//!     YYYY-MM-DD HH-MM-SS (<os-label>)/
//! ```
//!
//! Snapshots are totally ordered by the timestamp embedded in the name; the
//! os-label suffix is informational only. The catalog is cheap to
//! re-enumerate and is never cached across operations —
//! retention and integrity passes re-derive it every time they need it.

use crate::error::CatalogError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::path::{Path, PathBuf};

/// One discovered snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotRef {
    pub path: PathBuf,
    pub timestamp: DateTime<Local>,
    pub os_label: Option<String>,
}

impl SnapshotRef {
    /// The `YYYY/YYYY-MM-DD HH-MM-SS` sort key. Lexicographic order on this
    /// string matches timestamp order because the format is zero-padded.
    pub fn sort_key(&self) -> String {
        format!(
            "{:04}/{}",
            self.timestamp.format("%Y"),
            self.timestamp.format("%Y-%m-%d %H-%M-%S")
        )
    }

    pub fn completion_sentinel(&self) -> PathBuf {
        self.path.join(".snapkeep-complete")
    }

    pub fn is_complete(&self) -> bool {
        self.completion_sentinel().exists()
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

/// Extracts the leading `YYYY-MM-DD HH-MM-SS` from a directory name,
/// tolerating a trailing ` (label)` suffix. Returns `None` (not an error)
/// for anything that doesn't parse — unrecognized directories are ignored.
pub fn parse_timestamp(name: &str) -> Option<DateTime<Local>> {
    // A well-formed name is exactly 19 characters of timestamp, optionally
    // followed by " (label)". Try the full name first, then the 19-char
    // prefix, so both bare and labeled names parse identically.
    if let Ok(naive) = NaiveDateTime::parse_from_str(name, TIMESTAMP_FORMAT) {
        return to_local(naive);
    }
    if name.len() >= 19 {
        let prefix = &name[..19];
        if let Ok(naive) = NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT) {
            let rest = name[19..].trim();
            if rest.is_empty() || (rest.starts_with('(') && rest.ends_with(')')) {
                return to_local(naive);
            }
        }
    }
    None
}

fn to_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(dt, _) => Some(dt),
        chrono::LocalResult::None => None,
    }
}

fn extract_os_label(name: &str) -> Option<String> {
    if name.len() <= 19 {
        return None;
    }
    let rest = name[19..].trim();
    rest.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(|s| s.to_string())
}

/// Scans the backup root's year-bucket directories and returns every
/// snapshot found, ascending by timestamp. Unreadable or unparseable entries
/// (including unrelated content at the backup root) are skipped silently.
pub fn enumerate(root: &Path) -> Result<Vec<SnapshotRef>, CatalogError> {
    if !root.is_dir() {
        return Err(CatalogError::Unreadable(root.to_path_buf()));
    }
    let mut snapshots = Vec::new();
    let year_buckets = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return Err(CatalogError::Unreadable(root.to_path_buf())),
    };
    for bucket_entry in year_buckets.filter_map(|e| e.ok()) {
        let bucket_path = bucket_entry.path();
        if !bucket_path.is_dir() {
            continue;
        }
        let bucket_name = bucket_entry.file_name();
        let bucket_name = bucket_name.to_string_lossy();
        if bucket_name.len() != 4 || !bucket_name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&bucket_path) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(timestamp) = parse_timestamp(&name) {
                snapshots.push(SnapshotRef {
                    path,
                    timestamp,
                    os_label: extract_os_label(&name),
                });
            }
        }
    }
    snapshots.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    Ok(snapshots)
}

/// The most recent snapshot, or `None` if the catalog is empty.
///
/// Per the resolved open question in DESIGN.md, this returns the
/// newest snapshot directory regardless of whether a prior run completed
/// successfully — a failed-and-left-behind snapshot (no
/// `--delete-on-error`) is still eligible as "previous".
pub fn previous(root: &Path) -> Result<Option<SnapshotRef>, CatalogError> {
    Ok(enumerate(root)?.into_iter().last())
}

/// As [`previous`], but only considers snapshots carrying the completion
/// sentinel written by a successful build. Additive — callers that want the
/// stronger guarantee opt into this instead of `previous`.
pub fn previous_complete(root: &Path) -> Result<Option<SnapshotRef>, CatalogError> {
    Ok(enumerate(root)?.into_iter().filter(|s| s.is_complete()).last())
}

/// Computes the path for a new snapshot, appending " (2)", " (3)", … on
/// collision with an existing directory of the same second-precision name.
pub fn allocate(root: &Path, now: DateTime<Local>, os_label: Option<&str>) -> PathBuf {
    let year_bucket = root.join(now.format("%Y").to_string());
    let base_name = match os_label {
        Some(label) if !label.is_empty() => {
            format!("{} ({})", now.format(TIMESTAMP_FORMAT), label)
        }
        _ => now.format(TIMESTAMP_FORMAT).to_string(),
    };
    let mut candidate = year_bucket.join(&base_name);
    let mut n = 2;
    while candidate.exists() {
        let name = match os_label {
            Some(label) if !label.is_empty() => {
                format!("{} ({}) ({})", now.format(TIMESTAMP_FORMAT), label, n)
            }
            _ => format!("{} ({})", now.format(TIMESTAMP_FORMAT), n),
        };
        candidate = year_bucket.join(name);
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    #[test]
    fn parse_timestamp_accepts_bare_and_labeled_names() {
        assert!(parse_timestamp("2024-03-01 12-30-00").is_some());
        assert!(parse_timestamp("2024-03-01 12-30-00 (linux)").is_some());
        assert!(parse_timestamp("not-a-snapshot").is_none());
        assert!(parse_timestamp("2024-13-99 99-99-99").is_none());
    }

    #[test]
    fn enumerate_skips_unrelated_and_unparseable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("2024");
        fs::create_dir_all(&bucket).unwrap();
        fs::create_dir_all(bucket.join("2024-01-01 00-00-00")).unwrap();
        fs::create_dir_all(bucket.join("garbage-dir")).unwrap();
        fs::write(dir.path().join("README.txt"), "not a bucket").unwrap();
        fs::create_dir_all(dir.path().join("notayear")).unwrap();

        let found = enumerate(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].timestamp.format("%Y-%m-%d").to_string(), "2024-01-01");
    }

    #[test]
    fn enumerate_is_ascending_and_previous_is_last() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("2024");
        fs::create_dir_all(&bucket).unwrap();
        fs::create_dir_all(bucket.join("2024-01-01 00-00-00")).unwrap();
        fs::create_dir_all(bucket.join("2024-06-01 00-00-00")).unwrap();
        fs::create_dir_all(bucket.join("2024-03-01 00-00-00")).unwrap();

        let found = enumerate(dir.path()).unwrap();
        let timestamps: Vec<_> = found.iter().map(|s| s.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);

        let prev = previous(dir.path()).unwrap().unwrap();
        assert_eq!(prev.timestamp.format("%m").to_string(), "06");
    }

    #[test]
    fn allocate_avoids_collision() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let first = allocate(dir.path(), now, None);
        fs::create_dir_all(&first).unwrap();
        let second = allocate(dir.path(), now, None);
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("(2)"));
    }

    #[test]
    fn allocate_places_under_year_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2030, 12, 31, 23, 59, 59).unwrap();
        let path = allocate(dir.path(), now, Some("linux"));
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "2030");
        assert!(path.file_name().unwrap().to_string_lossy().contains("(linux)"));
    }
}
