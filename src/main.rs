//! # snapkeep
//!
//! A hard-link snapshot backup engine: every run produces a new, dated,
//! self-contained backup directory under the backup root, sharing unchanged
//! file content with the previous snapshot through hard links instead of
//! copying it again.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌─────────────┐
//!                 │  CLI (clap)  │
//!                 └──────┬──────┘
//!                        │
//!        ┌───────┬───────┼───────┬────────────┐
//!        ▼       ▼       ▼       ▼            ▼
//!   ┌────────┐┌──────┐┌───────┐┌──────────┐┌─────────┐
//!   │ Filter ││Catalog││Builder││ Retention ││Integrity│
//!   └────────┘└──────┘└───┬───┘└──────────┘└─────────┘
//!                         │
//!                  ┌──────┴──────┐
//!                  │  Recovery   │
//!                  │(restore/    │
//!                  │ purge/move) │
//!                  └─────────────┘
//! ```
//!
//! The engine modules return structured reports; this file is the thin
//! rendering layer that turns those reports into terminal output.

mod builder;
mod catalog;
mod config;
mod error;
mod filter;
mod fsops;
mod integrity;
mod parse;
mod recovery;
mod retention;
mod rng;
mod staleness;

use catalog::SnapshotRef;
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{BackupConfig, ConfigEntry};
use error::{CatalogError, Result};
use filter::{Filter, FilterOptions};
use fsops::{FileSystem as _, RealFs};
use indicatif::{ProgressBar, ProgressStyle};
use rng::TimeSeededDice;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "snapkeep",
    version,
    about = "A hard-link snapshot backup engine",
    long_about = "snapkeep produces dated, self-contained backup snapshots that share \
                  unchanged file content with one another through hard links, so a full \
                  tree of every backed-up file exists at every snapshot without the \
                  storage cost of copying files that never change."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a config file (overrides the default search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter configuration file
    Init {
        #[arg(short, long, default_value = "snapkeep.conf")]
        output: PathBuf,
    },

    /// Build a new snapshot
    Backup {
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        backup_root: Option<PathBuf>,
        #[arg(long)]
        staleness: Option<String>,
        #[arg(long)]
        hard_link_count: Option<u32>,
        #[arg(long)]
        copy_probability: Option<f64>,
        #[arg(long)]
        force_copy: bool,
        #[arg(long)]
        delete_on_error: bool,
        #[arg(long)]
        delete_first: bool,
        #[arg(long)]
        free_up: Option<String>,
        #[arg(long)]
        max_age: Option<String>,
        #[arg(long)]
        keep_weekly_after: Option<String>,
        #[arg(long)]
        keep_monthly_after: Option<String>,
        #[arg(long)]
        keep_yearly_after: Option<String>,
        #[arg(long)]
        max_deletions: Option<usize>,
        #[arg(long)]
        checksum_every: Option<u64>,
        #[arg(long)]
        os_label: Option<String>,
        #[arg(long = "include")]
        includes: Vec<String>,
        #[arg(long = "exclude")]
        excludes: Vec<String>,
    },

    /// Copy a whole snapshot out to a fresh location
    Restore {
        backup_root: PathBuf,
        destination: PathBuf,
        #[arg(long)]
        snapshot: Option<String>,
        #[arg(long, conflicts_with = "keep_extra")]
        delete_extra: bool,
        #[arg(long, conflicts_with = "delete_extra")]
        keep_extra: bool,
    },

    /// Recover one file's history, or pull a specific version back out
    Recover {
        backup_root: PathBuf,
        path: String,
        #[arg(long)]
        snapshot: Option<String>,
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// List every distinct path ever backed up under a directory
    List { backup_root: PathBuf, dir: String },

    /// Remove a path from every snapshot that has it
    Purge { backup_root: PathBuf, path: String },

    /// Re-materialize a snapshot range at a new root
    MoveBackup {
        backup_root: PathBuf,
        new_root: PathBuf,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },

    /// Apply retention policy, deleting snapshots that every active rule agrees on
    Prune {
        backup_root: PathBuf,
        #[arg(long)]
        max_age: Option<String>,
        #[arg(long)]
        keep_weekly_after: Option<String>,
        #[arg(long)]
        keep_monthly_after: Option<String>,
        #[arg(long)]
        keep_yearly_after: Option<String>,
        #[arg(long)]
        free_up: Option<String>,
        #[arg(long)]
        max_deletions: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a checksum manifest for a snapshot
    Checksum {
        backup_root: PathBuf,
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Re-hash a snapshot and compare against its checksum manifest
    VerifyChecksum {
        backup_root: PathBuf,
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Compare a snapshot against the live source tree, file by file
    Verify {
        source: PathBuf,
        backup_root: PathBuf,
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// List files that exist in backups but have since been removed from the source
    FindMissing { source: PathBuf, backup_root: PathBuf },

    /// Show which files a filter would include or exclude, without backing up
    PreviewFilter {
        source: PathBuf,
        #[arg(long = "include")]
        includes: Vec<String>,
        #[arg(long = "exclude")]
        excludes: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Init { output } => cmd_init(output),
        Command::Backup { .. } => cmd_backup(&cli),
        Command::Restore { backup_root, destination, snapshot, delete_extra, .. } => {
            cmd_restore(backup_root, destination, snapshot.as_deref(), *delete_extra)
        }
        Command::Recover { backup_root, path, snapshot, destination } => {
            cmd_recover(backup_root, path, snapshot.as_deref(), destination.as_deref())
        }
        Command::List { backup_root, dir } => cmd_list(backup_root, dir),
        Command::Purge { backup_root, path } => cmd_purge(backup_root, path),
        Command::MoveBackup { backup_root, new_root, from, to } => {
            cmd_move_backup(backup_root, new_root, from.as_deref(), to.as_deref())
        }
        Command::Prune { backup_root, max_age, keep_weekly_after, keep_monthly_after, keep_yearly_after, free_up, max_deletions, dry_run } => {
            cmd_prune(
                backup_root,
                max_age.as_deref(),
                keep_weekly_after.as_deref(),
                keep_monthly_after.as_deref(),
                keep_yearly_after.as_deref(),
                free_up.as_deref(),
                *max_deletions,
                *dry_run,
            )
        }
        Command::Checksum { backup_root, snapshot } => cmd_checksum(backup_root, snapshot.as_deref()),
        Command::VerifyChecksum { backup_root, snapshot } => cmd_verify_checksum(backup_root, snapshot.as_deref()),
        Command::Verify { source, backup_root, snapshot } => cmd_verify_live(source, backup_root, snapshot.as_deref()),
        Command::FindMissing { source, backup_root } => cmd_find_missing(source, backup_root),
        Command::PreviewFilter { source, includes, excludes } => cmd_preview_filter(source, includes, excludes),
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn cmd_init(output: &Path) -> Result<()> {
    config::init_config(output)?;
    eprintln!("{} wrote {}", "✓".green(), output.display());
    eprintln!("  edit it, then run: {} snapkeep backup --config {}", "$".bold(), output.display());
    Ok(())
}

fn cmd_backup(cli: &Cli) -> Result<()> {
    let Command::Backup {
        source, backup_root, staleness, hard_link_count, copy_probability, force_copy,
        delete_on_error, delete_first, free_up, max_age, keep_weekly_after, keep_monthly_after,
        keep_yearly_after, max_deletions, checksum_every, os_label, includes, excludes,
    } = &cli.command else { unreachable!() };

    let file_entries = read_config_entries(cli.config.as_deref()).unwrap_or_default();
    let mut cli_entries = Vec::new();
    push_opt(&mut cli_entries, "source", source.as_ref().map(|p| p.display().to_string()));
    push_opt(&mut cli_entries, "backup-root", backup_root.as_ref().map(|p| p.display().to_string()));
    push_opt(&mut cli_entries, "staleness", staleness.clone());
    push_opt(&mut cli_entries, "hard-link-count", hard_link_count.map(|n| n.to_string()));
    push_opt(&mut cli_entries, "copy-probability", copy_probability.map(|p| p.to_string()));
    push_opt(&mut cli_entries, "free-up", free_up.clone());
    push_opt(&mut cli_entries, "max-age", max_age.clone());
    push_opt(&mut cli_entries, "keep-weekly-after", keep_weekly_after.clone());
    push_opt(&mut cli_entries, "keep-monthly-after", keep_monthly_after.clone());
    push_opt(&mut cli_entries, "keep-yearly-after", keep_yearly_after.clone());
    push_opt(&mut cli_entries, "max-deletions", max_deletions.map(|n| n.to_string()));
    push_opt(&mut cli_entries, "checksum-every", checksum_every.map(|n| n.to_string()));
    push_opt(&mut cli_entries, "os-label", os_label.clone());
    if *force_copy {
        cli_entries.push(ConfigEntry { key: "force-copy".to_string(), value: None });
    }
    if *delete_on_error {
        cli_entries.push(ConfigEntry { key: "delete-on-error".to_string(), value: None });
    }
    if *delete_first {
        cli_entries.push(ConfigEntry { key: "delete-first".to_string(), value: None });
    }
    for pattern in excludes {
        cli_entries.push(ConfigEntry { key: "exclude".to_string(), value: Some(pattern.clone()) });
    }
    for pattern in includes {
        cli_entries.push(ConfigEntry { key: "include".to_string(), value: Some(pattern.clone()) });
    }

    let merged = config::merge(&file_entries, &cli_entries);
    let backup_cfg = BackupConfig::from_merged(&merged)?;

    print_header("Backup");
    eprintln!("  source:      {}", backup_cfg.source.display());
    eprintln!("  backup root: {}", backup_cfg.backup_root.display());

    let snapshots = if backup_cfg.backup_root.is_dir() {
        catalog::enumerate(&backup_cfg.backup_root)?
    } else {
        Vec::new()
    };

    let should_run_retention_first = backup_cfg.delete_first
        || (backup_cfg.backup_root.is_dir()
            && backup_cfg
                .free_up
                .map(|threshold| builder::preflight_below_threshold(&RealFs, &backup_cfg.backup_root, threshold))
                .unwrap_or(false));

    let has_tiers = backup_cfg.keep_weekly_after.is_some() || backup_cfg.keep_monthly_after.is_some() || backup_cfg.keep_yearly_after.is_some();
    if should_run_retention_first && !snapshots.is_empty() && (backup_cfg.max_age.is_some() || backup_cfg.free_up.is_some() || has_tiers) {
        run_retention(
            &backup_cfg.backup_root,
            backup_cfg.max_age,
            backup_cfg.keep_weekly_after,
            backup_cfg.keep_monthly_after,
            backup_cfg.keep_yearly_after,
            backup_cfg.free_up,
            backup_cfg.max_deletions,
            false,
        )?;
    }

    let previous = snapshots.last().cloned();
    let now = chrono::Local::now();
    let snapshot_path = catalog::allocate(&backup_cfg.backup_root, now, backup_cfg.os_label.as_deref());

    let mut filter = Filter::compile(&backup_cfg.filter_rules, &backup_cfg.source, FilterOptions::default())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut dice = TimeSeededDice::new();
    let copy_probability = rng::effective_probability(
        backup_cfg.hard_link_count,
        backup_cfg.copy_probability,
        backup_cfg.force_copy,
    );
    let opts = builder::BuildOptions {
        source_root: backup_cfg.source.clone(),
        staleness: backup_cfg.staleness,
        copy_probability,
        delete_on_error: backup_cfg.delete_on_error,
    };

    let total_files = WalkDir::new(&backup_cfg.source)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count() as u64;
    let pb = create_progress_bar(total_files, &backup_cfg.source);
    let mut on_entry = |rel: &str| {
        pb.set_message(rel.to_string());
        pb.inc(1);
    };

    let report = builder::build_snapshot(
        &RealFs,
        &mut dice,
        &mut filter,
        &snapshot_path,
        previous.as_ref().map(|s| s.path.as_path()),
        &opts,
        Some(&mut on_entry),
    )?;
    pb.finish_and_clear();

    print_build_report(&report);
    let filter_report = filter.report();
    for rule in &filter_report.unused_rules {
        eprintln!("  {} unused filter rule: {rule}", "!".yellow());
    }

    if let Some(every) = backup_cfg.checksum_every {
        let run_index = snapshots.len() as u64 + 1;
        if integrity::should_checksum(run_index, Some(every)) {
            let (manifest_path, count) = integrity::create_manifest(&snapshot_path)?;
            eprintln!("  {} checksummed {count} file(s) -> {}", "✓".green(), manifest_path.display());
        }
    }

    Ok(())
}

fn cmd_restore(backup_root: &Path, destination: &Path, selector: Option<&str>, delete_extra: bool) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let snap = resolve_snapshot(&snapshots, selector)?;
    print_header("Restore");
    eprintln!("  snapshot: {}", snap.path.display());
    eprintln!("  destination: {}", destination.display());

    let policy = if delete_extra { recovery::ExtraPolicy::DeleteExtra } else { recovery::ExtraPolicy::KeepExtra };
    let report = recovery::restore_snapshot(&RealFs, &snap.path, destination, policy)?;
    eprintln!(
        "  {} restored {} file(s), {} symlink(s), removed {} extra(s)",
        "✓".green(), report.files_copied, report.symlinks_created, report.extras_removed
    );
    Ok(())
}

fn cmd_recover(backup_root: &Path, path: &str, selector: Option<&str>, destination: Option<&Path>) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;

    if let Some(selector) = selector {
        let snap = resolve_snapshot(&snapshots, Some(selector))?;
        let candidate_path = snap.path.join(path);
        let destination = destination.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(path));
        let written = recovery::recover_copy(&RealFs, &candidate_path, &destination)?;
        eprintln!("{} recovered {} -> {}", "✓".green(), path, written.display());
        return Ok(());
    }

    let candidates = recovery::recover_candidates(&RealFs, &snapshots, path);
    if candidates.is_empty() {
        eprintln!("no version of {path:?} found in any snapshot");
        return Ok(());
    }
    print_header("Recover — versions found");
    for c in &candidates {
        eprintln!("  {:30}  {:>10} bytes", c.snapshot_label, c.size);
    }
    eprintln!("  pass --snapshot <label> to pick one");
    Ok(())
}

fn cmd_list(backup_root: &Path, dir: &str) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let paths = recovery::list_paths(&snapshots, dir);
    for path in &paths {
        println!("{path}");
    }
    eprintln!("  {} distinct path(s) ever backed up under {dir:?}", paths.len());
    Ok(())
}

fn cmd_purge(backup_root: &Path, path: &str) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let candidates = recovery::purge_candidates(&RealFs, &snapshots, path);
    let kinds: std::collections::HashSet<_> = candidates.iter().map(|c| c.kind).collect();
    if kinds.len() > 1 {
        eprintln!("{} {path:?} is not the same kind in every snapshot; resolve manually:", "!".yellow());
        for c in &candidates {
            eprintln!("  {:30} {:?}", c.snapshot_label, c.kind);
        }
        return Ok(());
    }
    let report = recovery::purge(&RealFs, &snapshots, path)?;
    eprintln!("{} removed {:?} from {} snapshot(s)", "✓".green(), path, report.removed.len());
    Ok(())
}

fn cmd_move_backup(backup_root: &Path, new_root: &Path, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let range = select_range(&snapshots, from, to)?;
    print_header("Move backup");
    eprintln!("  moving {} snapshot(s) to {}", range.len(), new_root.display());
    let report = recovery::move_backup(&RealFs, &range, new_root)?;
    eprintln!(
        "  {} moved {} snapshot(s): {} file(s) copied, {} hard-linked",
        "✓".green(), report.snapshots_moved, report.files_copied, report.files_linked
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_prune(
    backup_root: &Path,
    max_age: Option<&str>,
    keep_weekly_after: Option<&str>,
    keep_monthly_after: Option<&str>,
    keep_yearly_after: Option<&str>,
    free_up: Option<&str>,
    max_deletions: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let max_age = max_age.map(parse::TimeSpan::parse).transpose()?;
    let keep_weekly_after = keep_weekly_after.map(parse::TimeSpan::parse).transpose()?;
    let keep_monthly_after = keep_monthly_after.map(parse::TimeSpan::parse).transpose()?;
    let keep_yearly_after = keep_yearly_after.map(parse::TimeSpan::parse).transpose()?;
    let free_up = free_up.map(parse::parse_byte_size).transpose()?;
    run_retention(
        backup_root,
        max_age,
        keep_weekly_after,
        keep_monthly_after,
        keep_yearly_after,
        free_up,
        max_deletions,
        dry_run,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_retention(
    backup_root: &Path,
    max_age: Option<parse::TimeSpan>,
    keep_weekly_after: Option<parse::TimeSpan>,
    keep_monthly_after: Option<parse::TimeSpan>,
    keep_yearly_after: Option<parse::TimeSpan>,
    free_up: Option<u64>,
    max_deletions: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let mut policies: Vec<Box<dyn retention::RetentionPolicy>> = Vec::new();
    if let Some(span) = max_age {
        policies.push(Box::new(retention::AgeCutoff { cutoff: span.before(chrono::Local::now()) }));
    }
    let now = chrono::Local::now();
    let mut tiers = Vec::new();
    if let Some(span) = keep_weekly_after {
        tiers.push(retention::Tier { period: chrono::Duration::weeks(1), span: span.before(now) });
    }
    if let Some(span) = keep_monthly_after {
        tiers.push(retention::Tier { period: chrono::Duration::days(30), span: span.before(now) });
    }
    if let Some(span) = keep_yearly_after {
        tiers.push(retention::Tier { period: chrono::Duration::days(365), span: span.before(now) });
    }
    if !tiers.is_empty() {
        policies.push(Box::new(retention::TieredThinning { tiers }));
    }
    if let Some(target_free) = free_up {
        let current_free = RealFs.free_space(backup_root).unwrap_or(0);
        let sizes = vec![0u64; snapshots.len()];
        policies.push(Box::new(retention::FreeSpaceTarget {
            target_free_bytes: target_free,
            current_free_bytes: current_free,
            snapshot_sizes: sizes,
        }));
    }
    if policies.is_empty() {
        eprintln!("no retention policy specified; nothing to do");
        return Ok(());
    }
    let report = retention::run(&RealFs, &snapshots, &policies, max_deletions, dry_run)?;
    let verb = if dry_run { "would delete" } else { "deleted" };
    eprintln!("{} {verb} {} snapshot(s), kept {}", "✓".green(), report.deleted.len(), report.kept.len());
    if report.capped_at_max_deletions {
        eprintln!("  {} capped at --max-deletions", "!".yellow());
    }
    Ok(())
}

fn cmd_checksum(backup_root: &Path, selector: Option<&str>) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let snap = resolve_snapshot(&snapshots, selector)?;
    let (path, count) = integrity::create_manifest(&snap.path)?;
    eprintln!("{} checksummed {count} file(s) -> {}", "✓".green(), path.display());
    Ok(())
}

fn cmd_verify_checksum(backup_root: &Path, selector: Option<&str>) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let snap = resolve_snapshot(&snapshots, selector)?;
    let manifest_path = integrity::latest_manifest_path(&snap.path)
        .ok_or_else(|| anyhow::anyhow!("no checksum manifest found in {}", snap.path.display()))?;
    let report = integrity::verify_manifest(&snap.path, &manifest_path)?;
    eprintln!(
        "  checked {}, {} mismatch(es), {} missing",
        report.checked, report.mismatches.len(), report.missing.len()
    );
    if report.mismatches.is_empty() {
        eprintln!("{} integrity verified", "✓".green());
    } else {
        eprintln!("{} integrity mismatches found, see {}.mismatches", "✗".red(), manifest_path.display());
    }
    Ok(())
}

fn cmd_verify_live(source: &Path, backup_root: &Path, selector: Option<&str>) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let snap = resolve_snapshot(&snapshots, selector)?;
    let report = integrity::live_verify(source, &snap.path)?;
    eprintln!(
        "  {} matching, {} drifted since backup, {} missing or unreadable in backup",
        report.matching_count(), report.mismatching_count(), report.error_count()
    );
    Ok(())
}

fn cmd_find_missing(source: &Path, backup_root: &Path) -> Result<()> {
    let snapshots = catalog::enumerate(backup_root)?;
    let dirs: Vec<PathBuf> = snapshots.iter().map(|s| s.path.clone()).collect();
    let missing = integrity::find_missing(backup_root, source, &dirs);
    for path in &missing {
        println!("{path}");
    }
    eprintln!("  {} file(s) exist in backups but not in the source", missing.len());
    Ok(())
}

fn cmd_preview_filter(source: &Path, includes: &[String], excludes: &[String]) -> Result<()> {
    let mut rule_lines = Vec::new();
    for pattern in excludes {
        rule_lines.push(filter::RuleLine { sign: filter::Sign::Exclude, pattern: pattern.clone() });
    }
    for pattern in includes {
        rule_lines.push(filter::RuleLine { sign: filter::Sign::Include, pattern: pattern.clone() });
    }
    let filter = Filter::compile(&rule_lines, source, FilterOptions::default()).map_err(|e| anyhow::anyhow!("{e}"))?;

    for entry in walkdir_relative(source) {
        let included = filter.included_readonly(&entry);
        let marker = if included { "+".green() } else { "-".red() };
        println!("{marker} {entry}");
    }
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn create_progress_bar(total: u64, source: &Path) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| source.display().to_string());
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "  {{spinner:.green}} {name} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} {{msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
    );
    pb
}

fn walkdir_relative(root: &Path) -> Vec<String> {
    let mut out: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    out.sort();
    out
}

fn read_config_entries(explicit: Option<&Path>) -> Result<Vec<ConfigEntry>> {
    match explicit {
        Some(path) => config::read_config_from(path),
        None => config::read_config_file(),
    }
}

fn push_opt(entries: &mut Vec<ConfigEntry>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        entries.push(ConfigEntry { key: key.to_string(), value: Some(value) });
    }
}

fn resolve_snapshot<'a>(snapshots: &'a [SnapshotRef], selector: Option<&str>) -> Result<&'a SnapshotRef> {
    match selector {
        None | Some("latest") => snapshots
            .last()
            .ok_or_else(|| CatalogError::SnapshotNotFound("latest".to_string()).into()),
        Some(label) => {
            let matches: Vec<&SnapshotRef> = snapshots
                .iter()
                .filter(|s| s.path.file_name().map(|n| n.to_string_lossy().contains(label)).unwrap_or(false))
                .collect();
            match matches.len() {
                0 => Err(CatalogError::SnapshotNotFound(label.to_string()).into()),
                1 => Ok(matches[0]),
                count => Err(CatalogError::Ambiguous { selector: label.to_string(), count }.into()),
            }
        }
    }
}

fn select_range(snapshots: &[SnapshotRef], from: Option<&str>, to: Option<&str>) -> Result<Vec<SnapshotRef>> {
    let from_key = from.map(|f| resolve_snapshot(snapshots, Some(f))).transpose()?.map(|s| s.sort_key());
    let to_key = to.map(|t| resolve_snapshot(snapshots, Some(t))).transpose()?.map(|s| s.sort_key());
    Ok(snapshots
        .iter()
        .filter(|s| from_key.as_ref().map(|k| &s.sort_key() >= k).unwrap_or(true))
        .filter(|s| to_key.as_ref().map(|k| &s.sort_key() <= k).unwrap_or(true))
        .cloned()
        .collect())
}

fn print_build_report(report: &builder::BuildReport) {
    eprintln!("  {} {}", "snapshot:".bold(), report.snapshot_path.display());
    eprintln!(
        "  linked {} file(s), copied {} file(s) ({} bytes), {} symlink(s)",
        report.files_linked, report.files_copied, report.bytes_copied, report.symlinks_created
    );
    if !report.skipped.is_empty() {
        eprintln!("  {} {} entr(ies) skipped:", "!".yellow(), report.skipped.len());
        for skip in &report.skipped {
            eprintln!("    {skip}");
        }
    }
    if !report.compare_warnings.is_empty() {
        eprintln!("  {} {} comparison warning(s)", "!".yellow(), report.compare_warnings.len());
    }
    eprintln!("  took {:.2?}", report.duration);
}

fn print_header(action: &str) {
    eprintln!();
    eprintln!("  {} snapkeep v{} — {action}", "»".bold(), env!("CARGO_PKG_VERSION"));
}
