//! # Snapshot builder
//!
//! Walks the source tree once, depth-first, deciding file-by-file whether to
//! hard-link against the previous snapshot or copy fresh. A
//! single well-defined boundary separates per-file failures (logged, walk
//! continues) from structurally fatal failures (the whole run aborts).

use crate::error::{FatalIOError, FileSkipError, SnapkeepError};
use crate::filter::Filter;
use crate::fsops::{remove_tree, EntryKind, FileSystem};
use crate::rng::CopyDice;
use crate::staleness::StalenessMode;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Knobs controlling one backup run. Orchestration concerns that span
/// modules — running retention before the build, checking free space ahead
/// of time — live in the caller; this struct only carries what the walk
/// itself needs.
pub struct BuildOptions {
    pub source_root: PathBuf,
    pub staleness: StalenessMode,
    pub copy_probability: f64,
    pub delete_on_error: bool,
}

/// What happened during one build, returned rather than printed — the CLI
/// renders this; a library caller gets the same data.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub snapshot_path: PathBuf,
    pub files_linked: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub symlinks_created: u64,
    pub dirs_created: u64,
    /// Entries missing from the snapshot because of a logged failure.
    pub skipped: Vec<FileSkipError>,
    /// Entries that ended up copied (not skipped) despite a comparison
    /// failure against the previous snapshot — logged but not
    /// a coverage gap.
    pub compare_warnings: Vec<FileSkipError>,
    pub duration: Duration,
}

enum Decision {
    Copy,
    Link(PathBuf),
}

struct BuildCtx<'a> {
    fs_ops: &'a dyn FileSystem,
    dice: &'a mut dyn CopyDice,
    filter: &'a mut Filter,
    source_root: &'a Path,
    snapshot_root: &'a Path,
    previous_root: Option<&'a Path>,
    staleness: StalenessMode,
    copy_probability: f64,
    report: BuildReport,
    on_entry: Option<&'a mut dyn FnMut(&str)>,
}

/// Builds one new snapshot under `snapshot_root`, comparing against
/// `previous_root` (the most recent existing snapshot, if any).
/// `snapshot_root` must not already exist; the caller is responsible for
/// allocating it via [`crate::catalog::allocate`]. `on_entry`, if given, is
/// called with each entry's relative path as it's processed — a progress
/// hook the CLI can drive an indicatif bar from, without the builder itself
/// doing any terminal I/O.
pub fn build_snapshot(
    fs_ops: &dyn FileSystem,
    dice: &mut dyn CopyDice,
    filter: &mut Filter,
    snapshot_root: &Path,
    previous_root: Option<&Path>,
    opts: &BuildOptions,
    on_entry: Option<&mut dyn FnMut(&str)>,
) -> Result<BuildReport, SnapkeepError> {
    let started = Instant::now();

    if !opts.source_root.is_dir() {
        return Err(FatalIOError::SourceNotFound(opts.source_root.clone()).into());
    }
    fs_ops
        .create_dir_all(snapshot_root)
        .map_err(|source| FatalIOError::CannotCreateRoot {
            path: snapshot_root.to_path_buf(),
            source,
        })?;

    let mut ctx = BuildCtx {
        fs_ops,
        dice,
        filter,
        source_root: &opts.source_root,
        snapshot_root,
        previous_root,
        staleness: opts.staleness,
        copy_probability: opts.copy_probability,
        report: BuildReport {
            snapshot_path: snapshot_root.to_path_buf(),
            ..Default::default()
        },
        on_entry,
    };

    let walk_result = walk_dir(&mut ctx, &opts.source_root.clone(), "");

    let mut report = ctx.report;
    report.duration = started.elapsed();

    match walk_result {
        Ok(()) => {
            let sentinel = snapshot_root.join(".snapkeep-complete");
            let _ = std::fs::write(&sentinel, b"");
            Ok(report)
        }
        Err(err) => {
            if opts.delete_on_error {
                let _ = remove_tree(fs_ops, snapshot_root);
            }
            Err(err)
        }
    }
}

/// Recursively processes one source directory. Per-entry read/stat failures
/// are logged and skipped; a failure to list the directory itself is logged
/// once and stops recursion into that subtree (not the whole run).
fn walk_dir(ctx: &mut BuildCtx, src_dir: &Path, rel_prefix: &str) -> Result<(), SnapkeepError> {
    let entries = match ctx.fs_ops.list_dir(src_dir) {
        Ok(entries) => entries,
        Err(e) => {
            ctx.report.skipped.push(FileSkipError::ReadFailed {
                path: src_dir.to_path_buf(),
                reason: e.to_string(),
            });
            return Ok(());
        }
    };

    for entry_path in entries {
        let Some(name) = entry_path.file_name() else {
            continue;
        };
        let name = name.to_string_lossy();
        let rel = if rel_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{rel_prefix}/{name}")
        };

        let stat = match ctx.fs_ops.stat(&entry_path) {
            Ok(s) => s,
            Err(e) => {
                ctx.report.skipped.push(stat_failure(&entry_path, e));
                continue;
            }
        };

        match stat.kind {
            EntryKind::Directory => {
                walk_dir(ctx, &entry_path, &rel)?;
            }
            EntryKind::Symlink => {
                let default_included = !ctx.fs_ops.is_reparse_point(&entry_path);
                if !ctx.filter.included_from(&rel, default_included) {
                    continue;
                }
                if let Some(cb) = ctx.on_entry.as_mut() {
                    cb(&rel);
                }
                create_symlink(ctx, &entry_path, &rel);
            }
            EntryKind::File => {
                let default_included = !ctx.fs_ops.is_reparse_point(&entry_path);
                if !ctx.filter.included_from(&rel, default_included) {
                    continue;
                }
                if let Some(cb) = ctx.on_entry.as_mut() {
                    cb(&rel);
                }
                place_file(ctx, &entry_path, &rel);
            }
            EntryKind::Other => {}
        }
    }
    Ok(())
}

fn stat_failure(path: &Path, e: std::io::Error) -> FileSkipError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        FileSkipError::PermissionDenied { path: path.to_path_buf() }
    } else {
        FileSkipError::ReadFailed { path: path.to_path_buf(), reason: e.to_string() }
    }
}

fn target_path(ctx: &BuildCtx, rel: &str) -> PathBuf {
    let mut target = ctx.snapshot_root.to_path_buf();
    for component in rel.split('/') {
        target.push(component);
    }
    target
}

fn ensure_parent(ctx: &BuildCtx, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        ctx.fs_ops.create_dir_all(parent)?;
    }
    Ok(())
}

fn create_symlink(ctx: &mut BuildCtx, src_path: &Path, rel: &str) {
    let target = target_path(ctx, rel);
    let link_target = match ctx.fs_ops.read_link(src_path) {
        Ok(t) => t,
        Err(_) => {
            ctx.report.skipped.push(FileSkipError::BrokenSymlink { path: src_path.to_path_buf() });
            return;
        }
    };
    if let Err(e) = ensure_parent(ctx, &target) {
        ctx.report.skipped.push(FileSkipError::WriteFailed {
            path: src_path.to_path_buf(),
            reason: e.to_string(),
        });
        return;
    }
    match ctx.fs_ops.symlink(&link_target, &target) {
        Ok(()) => ctx.report.symlinks_created += 1,
        Err(e) => ctx.report.skipped.push(FileSkipError::WriteFailed {
            path: src_path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

fn place_file(ctx: &mut BuildCtx, src_path: &Path, rel: &str) {
    let target = target_path(ctx, rel);
    let decision = decide(ctx, src_path, rel);

    if let Err(e) = ensure_parent(ctx, &target) {
        ctx.report.skipped.push(FileSkipError::WriteFailed {
            path: src_path.to_path_buf(),
            reason: e.to_string(),
        });
        return;
    }

    match decision {
        Decision::Link(previous_path) => match ctx.fs_ops.hard_link(&previous_path, &target) {
            Ok(()) => ctx.report.files_linked += 1,
            Err(e) => ctx.report.skipped.push(FileSkipError::LinkFailed {
                path: src_path.to_path_buf(),
                reason: e.to_string(),
            }),
        },
        Decision::Copy => match ctx.fs_ops.copy_file(src_path, &target) {
            Ok(bytes) => {
                ctx.report.files_copied += 1;
                ctx.report.bytes_copied += bytes;
            }
            Err(e) => ctx.report.skipped.push(FileSkipError::WriteFailed {
                path: src_path.to_path_buf(),
                reason: e.to_string(),
            }),
        },
    }
}

/// The link-or-copy decision:
///
/// ```text
/// if no previous snapshot:             copy
/// elif counterpart missing:            copy
/// elif not staleness.equivalent:       copy
/// elif dice.roll(p):                   copy
/// else:                                link
/// ```
fn decide(ctx: &mut BuildCtx, src_path: &Path, rel: &str) -> Decision {
    let Some(previous_root) = ctx.previous_root else {
        return Decision::Copy;
    };
    let mut previous_path = previous_root.to_path_buf();
    for component in rel.split('/') {
        previous_path.push(component);
    }

    match ctx.staleness.equivalent(ctx.fs_ops, src_path, &previous_path) {
        Ok(true) => {
            if ctx.dice.roll(ctx.copy_probability) {
                Decision::Copy
            } else {
                Decision::Link(previous_path)
            }
        }
        Ok(false) => Decision::Copy,
        Err(e) => {
            ctx.report.compare_warnings.push(e);
            Decision::Copy
        }
    }
}

/// `true` if free space under `backup_root` is currently below `threshold`.
/// A pre-flight check the caller runs before `build_snapshot` —
/// estimating exact post-build usage up front isn't attempted, so
/// this only gates whether a retention pass should run first.
pub fn preflight_below_threshold(
    fs_ops: &dyn FileSystem,
    backup_root: &Path,
    threshold: u64,
) -> bool {
    fs_ops
        .free_space(backup_root)
        .map(|free| free < threshold)
        .unwrap_or(false)
}
