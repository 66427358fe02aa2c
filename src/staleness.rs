//! # Staleness comparator
//!
//! Decides whether a source file is "the same" as its counterpart in the
//! previous snapshot — the decision the builder uses to choose hard-link
//! over copy. Two independently selectable modes: a cheap
//! size/mtime check, and a full byte-for-byte comparison.

use crate::error::FileSkipError;
use crate::fsops::{EntryKind, FileSystem};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessMode {
    /// Equal iff same kind, same size, same mtime (second precision).
    Quick,
    /// Equal iff same kind, same size, and byte-for-byte equal contents.
    /// Mtime is ignored.
    Deep,
}

const COMPARE_BUF_SIZE: usize = 64 * 1024;

impl StalenessMode {
    /// Compares a source path against its previous-snapshot counterpart.
    /// Returns `Ok(false)` (not equivalent) rather than propagating an error
    /// for read failures against the previous counterpart — a
    /// `CompareError` is treated as "not equivalent" and logged by the
    /// caller via the returned [`FileSkipError`].
    pub fn equivalent(
        &self,
        fs_ops: &dyn FileSystem,
        source_path: &Path,
        previous_path: &Path,
    ) -> Result<bool, FileSkipError> {
        let src_stat = fs_ops.stat(source_path).map_err(|e| FileSkipError::CompareFailed {
            path: source_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let prev_stat = match fs_ops.stat(previous_path) {
            Ok(stat) => stat,
            Err(_) => return Ok(false),
        };

        if src_stat.kind != EntryKind::File || prev_stat.kind != EntryKind::File {
            return Ok(false);
        }
        if src_stat.size != prev_stat.size {
            return Ok(false);
        }

        match self {
            StalenessMode::Quick => Ok(src_stat.mtime_secs == prev_stat.mtime_secs),
            StalenessMode::Deep => {
                compare_contents(source_path, previous_path).map_err(|e| FileSkipError::CompareFailed {
                    path: previous_path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn compare_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    let mut reader_a = BufReader::new(File::open(a)?);
    let mut reader_b = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; COMPARE_BUF_SIZE];
    let mut buf_b = [0u8; COMPARE_BUF_SIZE];
    loop {
        let n_a = reader_a.read(&mut buf_a)?;
        let n_b = reader_b.read(&mut buf_b)?;
        if n_a != n_b {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
        if buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::RealFs;
    use std::fs;

    #[test]
    fn quick_mode_ignores_content_equal_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"aaaa").unwrap();
        fs::write(&b, b"bbbb").unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&a, mtime).unwrap();
        filetime::set_file_mtime(&b, mtime).unwrap();

        let equivalent = StalenessMode::Quick.equivalent(&RealFs, &a, &b).unwrap();
        assert!(equivalent);
    }

    #[test]
    fn quick_mode_detects_mtime_difference() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"aaaa").unwrap();
        fs::write(&b, b"aaaa").unwrap();
        filetime::set_file_mtime(&a, filetime::FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        filetime::set_file_mtime(&b, filetime::FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let equivalent = StalenessMode::Quick.equivalent(&RealFs, &a, &b).unwrap();
        assert!(!equivalent);
    }

    #[test]
    fn deep_mode_ignores_mtime_but_detects_content_difference() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"same content").unwrap();
        fs::write(&b, b"same content").unwrap();
        filetime::set_file_mtime(&a, filetime::FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        filetime::set_file_mtime(&b, filetime::FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        assert!(StalenessMode::Deep.equivalent(&RealFs, &a, &b).unwrap());

        fs::write(&b, b"different!!!").unwrap();
        assert!(!StalenessMode::Deep.equivalent(&RealFs, &a, &b).unwrap());
    }

    #[test]
    fn missing_previous_counterpart_is_not_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, b"aaaa").unwrap();
        let missing = dir.path().join("missing.txt");
        assert!(!StalenessMode::Quick.equivalent(&RealFs, &a, &missing).unwrap());
    }
}
