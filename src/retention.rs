//! # Retention engine
//!
//! Decides which existing snapshots to delete. Multiple
//! policies can be active at once; a snapshot is deleted only if *every*
//! active policy marks it for deletion (AND semantics) — never if any policy
//! alone would keep it. The newest snapshot is never a deletion candidate,
//! and the caller-imposed `--max-deletions` cap is applied last, oldest
//! snapshot first.

use crate::catalog::SnapshotRef;
use crate::fsops::{remove_tree, FileSystem};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::PathBuf;

/// One retention rule. Each implementation answers, for a single snapshot
/// in the context of the full catalog, whether *this policy* would delete
/// it — the engine only deletes where every active policy agrees.
pub trait RetentionPolicy {
    fn marks_for_deletion(&self, snapshots: &[SnapshotRef], index: usize) -> bool;
    fn describe(&self) -> String;
}

/// Deletes anything older than `now - span`.
pub struct AgeCutoff {
    pub cutoff: DateTime<Local>,
}

impl RetentionPolicy for AgeCutoff {
    fn marks_for_deletion(&self, snapshots: &[SnapshotRef], index: usize) -> bool {
        snapshots[index].timestamp < self.cutoff
    }

    fn describe(&self) -> String {
        format!("age cutoff before {}", self.cutoff.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Deletes oldest-first until free space would reach `target_free_bytes`,
/// estimated from each snapshot's on-disk size as reported by the caller
/// (computing exact post-deletion free space up front isn't attempted; the
/// engine re-checks after each actual deletion in practice).
pub struct FreeSpaceTarget {
    pub target_free_bytes: u64,
    pub current_free_bytes: u64,
    pub snapshot_sizes: Vec<u64>,
}

impl RetentionPolicy for FreeSpaceTarget {
    fn marks_for_deletion(&self, snapshots: &[SnapshotRef], index: usize) -> bool {
        if self.current_free_bytes >= self.target_free_bytes {
            return false;
        }
        // Mark the oldest snapshots first until the cumulative reclaimed
        // size would close the gap.
        let needed = self.target_free_bytes - self.current_free_bytes;
        let mut reclaimed = 0u64;
        for i in 0..snapshots.len() {
            if reclaimed >= needed {
                break;
            }
            reclaimed += self.snapshot_sizes.get(i).copied().unwrap_or(0);
            if i == index {
                return true;
            }
        }
        false
    }

    fn describe(&self) -> String {
        format!("free space target {} bytes", self.target_free_bytes)
    }
}

/// A single period/span pair for tiered thinning, e.g. "daily for 1 month",
/// "weekly for 1 year". `span` is the cutoff instant: a snapshot older than
/// `span` (`timestamp < span`) is in scope for this tier.
pub struct Tier {
    pub period: chrono::Duration,
    pub span: DateTime<Local>,
}

/// Within each tier, only the oldest snapshot in each period-sized bucket is
/// kept; the rest are marked for deletion — the oldest member of a period is
/// the one most likely to have completed and to stay retained reliably.
pub struct TieredThinning {
    pub tiers: Vec<Tier>,
}

impl RetentionPolicy for TieredThinning {
    fn marks_for_deletion(&self, snapshots: &[SnapshotRef], index: usize) -> bool {
        let subject = &snapshots[index];
        // A snapshot can be old enough to qualify for more than one tier's
        // cutoff (e.g. both the monthly and yearly cutoffs are in the past
        // relative to it); the coarsest applicable tier — the one whose
        // cutoff is furthest back — governs its bucket.
        let Some(tier) = self.tiers.iter().filter(|t| subject.timestamp < t.span).min_by_key(|t| t.span) else {
            return false;
        };

        let bucket = bucket_key(subject.timestamp, tier.period);
        // Find the oldest snapshot sharing this tier+bucket across the whole
        // catalog; keep only that one.
        let kept_index = snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.timestamp < tier.span)
            .filter(|(_, s)| bucket_key(s.timestamp, tier.period) == bucket)
            .min_by_key(|(_, s)| s.timestamp)
            .map(|(i, _)| i);

        kept_index != Some(index)
    }

    fn describe(&self) -> String {
        format!("tiered thinning across {} tier(s)", self.tiers.len())
    }
}

fn bucket_key(ts: DateTime<Local>, period: chrono::Duration) -> i64 {
    let period_secs = period.num_seconds().max(1);
    ts.timestamp().div_euclid(period_secs)
}

/// Report of what retention did (or would do, for a dry run).
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
    pub capped_at_max_deletions: bool,
}

/// Runs the active policies over the catalog and deletes the intersection,
/// oldest first, honoring `max_deletions` and never touching the newest
/// snapshot.
pub fn run(
    fs_ops: &dyn FileSystem,
    snapshots: &[SnapshotRef],
    policies: &[Box<dyn RetentionPolicy>],
    max_deletions: Option<usize>,
    dry_run: bool,
) -> std::io::Result<RetentionReport> {
    let mut report = RetentionReport::default();
    if snapshots.is_empty() || policies.is_empty() {
        report.kept = snapshots.iter().map(|s| s.path.clone()).collect();
        return Ok(report);
    }

    let newest_index = snapshots.len() - 1;
    let mut candidates: Vec<usize> = (0..snapshots.len())
        .filter(|&i| i != newest_index)
        .filter(|&i| policies.iter().all(|p| p.marks_for_deletion(snapshots, i)))
        .collect();
    candidates.sort_by_key(|&i| snapshots[i].timestamp);

    let capped = if let Some(max) = max_deletions {
        if candidates.len() > max {
            report.capped_at_max_deletions = true;
        }
        candidates.into_iter().take(max).collect::<Vec<_>>()
    } else {
        candidates
    };
    let to_delete: HashSet<usize> = capped.into_iter().collect();

    for (i, snap) in snapshots.iter().enumerate() {
        if to_delete.contains(&i) {
            if !dry_run {
                remove_tree(fs_ops, &snap.path)?;
            }
            report.deleted.push(snap.path.clone());
        } else {
            report.kept.push(snap.path.clone());
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::RealFs;
    use chrono::TimeZone;
    use std::fs;

    fn snap(dir: &std::path::Path, label: &str, days_ago: i64) -> SnapshotRef {
        let path = dir.join(label);
        fs::create_dir_all(&path).unwrap();
        let timestamp = Local::now() - chrono::Duration::days(days_ago);
        SnapshotRef { path, timestamp, os_label: None }
    }

    #[test]
    fn newest_snapshot_is_never_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = vec![snap(dir.path(), "old", 400), snap(dir.path(), "new", 0)];
        let policies: Vec<Box<dyn RetentionPolicy>> = vec![Box::new(AgeCutoff { cutoff: Local::now() + chrono::Duration::days(1) })];
        let report = run(&RealFs, &snaps, &policies, None, false).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(report.kept.iter().any(|p| p.ends_with("new")));
    }

    #[test]
    fn and_semantics_requires_all_policies_to_agree() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = vec![snap(dir.path(), "a", 400), snap(dir.path(), "b", 200), snap(dir.path(), "c", 0)];
        let age_policy: Box<dyn RetentionPolicy> = Box::new(AgeCutoff { cutoff: Local::now() - chrono::Duration::days(100) });
        let never_policy: Box<dyn RetentionPolicy> = Box::new(NeverMarks);
        let policies = vec![age_policy, never_policy];
        let report = run(&RealFs, &snaps, &policies, None, false).unwrap();
        assert!(report.deleted.is_empty());
    }

    struct NeverMarks;
    impl RetentionPolicy for NeverMarks {
        fn marks_for_deletion(&self, _snapshots: &[SnapshotRef], _index: usize) -> bool {
            false
        }
        fn describe(&self) -> String {
            "never".to_string()
        }
    }

    #[test]
    fn max_deletions_caps_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = vec![
            snap(dir.path(), "a", 400),
            snap(dir.path(), "b", 300),
            snap(dir.path(), "c", 200),
            snap(dir.path(), "d", 0),
        ];
        let policies: Vec<Box<dyn RetentionPolicy>> = vec![Box::new(AgeCutoff { cutoff: Local::now() - chrono::Duration::days(1) })];
        let report = run(&RealFs, &snaps, &policies, Some(1), false).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(report.capped_at_max_deletions);
        assert!(report.deleted[0].ends_with("a"));
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = vec![snap(dir.path(), "a", 400), snap(dir.path(), "b", 0)];
        let policies: Vec<Box<dyn RetentionPolicy>> = vec![Box::new(AgeCutoff { cutoff: Local::now() - chrono::Duration::days(1) })];
        let report = run(&RealFs, &snaps, &policies, None, true).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(report.deleted[0].exists());
    }

    #[test]
    fn tiered_thinning_keeps_only_oldest_per_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let base = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snaps = vec![
            SnapshotRef { path: dir.path().join("d1"), timestamp: base, os_label: None },
            SnapshotRef { path: dir.path().join("d2"), timestamp: base + chrono::Duration::hours(6), os_label: None },
            SnapshotRef { path: dir.path().join("d3"), timestamp: base + chrono::Duration::days(1), os_label: None },
        ];
        for s in &snaps {
            fs::create_dir_all(&s.path).unwrap();
        }
        // Cutoff is after every snapshot's timestamp, so all three qualify
        // as "old enough" for this tier.
        let tiered = TieredThinning { tiers: vec![Tier { period: chrono::Duration::days(1), span: base + chrono::Duration::days(2) }] };
        let policies: Vec<Box<dyn RetentionPolicy>> = vec![Box::new(tiered)];
        let report = run(&RealFs, &snaps, &policies, None, false).unwrap();
        // d2 shares d1's day-bucket and is not the oldest -> deleted.
        // d3 is the newest snapshot overall -> protected regardless of bucket.
        assert_eq!(report.deleted.len(), 1);
        assert!(report.deleted[0].ends_with("d2"));
    }

    #[test]
    fn tiered_thinning_leaves_snapshots_newer_than_every_cutoff_alone() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = vec![snap(dir.path(), "old", 400), snap(dir.path(), "new", 0)];
        // Cutoff is in the past relative to both snapshots -> neither qualifies.
        let tiered =
            TieredThinning { tiers: vec![Tier { period: chrono::Duration::days(1), span: Local::now() - chrono::Duration::days(1000) }] };
        let policies: Vec<Box<dyn RetentionPolicy>> = vec![Box::new(tiered)];
        let report = run(&RealFs, &snaps, &policies, None, false).unwrap();
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn tiered_thinning_picks_the_coarsest_applicable_tier() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local::now();
        // weekly cutoff: 7 days ago; yearly cutoff: 365 days ago.
        let weekly = Tier { period: chrono::Duration::days(7), span: now - chrono::Duration::days(7) };
        let yearly = Tier { period: chrono::Duration::days(365), span: now - chrono::Duration::days(365) };
        let snaps = vec![
            // 400 days old: qualifies for both tiers; yearly (coarser) should govern its bucket.
            snap(dir.path(), "ancient", 400),
            snap(dir.path(), "newest", 0),
        ];
        let tiered = TieredThinning { tiers: vec![weekly, yearly] };
        let policies: Vec<Box<dyn RetentionPolicy>> = vec![Box::new(tiered)];
        let report = run(&RealFs, &snaps, &policies, None, false).unwrap();
        // "ancient" is alone in its yearly bucket, so it's the kept one -> not deleted.
        assert!(report.deleted.is_empty());
        assert!(report.kept.iter().any(|p| p.ends_with("ancient")));
    }
}
