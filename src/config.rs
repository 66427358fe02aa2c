//! # Configuration
//!
//! Reads a small `key: value` text format — not TOML — because the fields
//! that matter here (paths, one flag per retention knob, an ordered list of
//! filter rules) read better as lines a user edits directly than as nested
//! tables. CLI flags layer on top of whatever the config file set, last one
//! in wins, with `--no-<flag>` as the negation form.

use crate::error::{ConfigError, Result};
use crate::filter::{RuleLine, Sign};
use crate::parse::{parse_byte_size, TimeSpan};
use crate::staleness::StalenessMode;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// One parsed line from a config file or CLI override: a normalized key and
/// an optional value. `value: None` means a bare flag line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Option<String>,
}

/// Normalizes a raw key: lowercased, underscores folded to dashes, so
/// `Free_Up`, `free-up`, and `FREE-UP` all resolve to the same setting.
fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('_', "-")
}

/// Strips exactly one matching pair of leading/trailing double quotes —
/// `"a value"` becomes `a value`; `""nested""` is left alone, since only one
/// layer of quoting is ever stripped.
fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parses the textual body of a config file into entries, one per
/// non-blank, non-`#`-comment line. A line with no `:` is a bare flag; a
/// line with `:` splits on the first occurrence only, so values may contain
/// colons (e.g. a Windows drive path).
pub fn parse_lines(path: &Path, text: &str) -> Result<Vec<ConfigEntry>> {
    let mut entries = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                let key = normalize_key(key);
                if key.is_empty() {
                    return Err(ConfigError::MalformedLine {
                        path: path.to_path_buf(),
                        line_no,
                        text: raw_line.to_string(),
                    }
                    .into());
                }
                let value = unquote(value);
                entries.push(ConfigEntry {
                    key,
                    value: if value.is_empty() { None } else { Some(value) },
                });
            }
            None => {
                let key = normalize_key(line);
                entries.push(ConfigEntry { key, value: None });
            }
        }
    }
    Ok(entries)
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/snapkeep.conf")];
    if let Ok(home) = env::var("HOME") {
        paths.push(PathBuf::from(format!("{home}/.config/snapkeep.conf")));
    }
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(format!("{xdg}/snapkeep.conf")));
    }
    paths.push(PathBuf::from("snapkeep.conf"));
    paths
}

/// Reads the first config file found on the standard search path.
pub fn read_config_file() -> Result<Vec<ConfigEntry>> {
    let search = config_search_paths();
    for path in &search {
        if path.exists() {
            return read_config_from(path);
        }
    }
    Err(ConfigError::NotFound { searched: search }.into())
}

/// Reads and parses a specific config file. A `config:` key inside the file
/// is rejected rather than followed — config files do not chain.
pub fn read_config_from(path: &Path) -> Result<Vec<ConfigEntry>> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_lines(path, &text)?;
    if entries.iter().any(|e| e.key == "config") {
        return Err(ConfigError::Validation {
            message: format!("{}: a config file may not itself set 'config'", path.display()),
        }
        .into());
    }
    Ok(entries)
}

/// File entries merged with CLI-supplied overrides, last occurrence wins per
/// key. Filter rules (`include`/`exclude`) are the exception — they are
/// ordered and append-only, since their relative order determines the
/// last-match-wins filter semantics downstream.
#[derive(Debug, Default)]
pub struct MergedConfig {
    pub scalars: BTreeMap<String, String>,
    pub flags: BTreeMap<String, bool>,
    pub filter_rules: Vec<RuleLine>,
}

/// Merges config-file entries and CLI-override entries, in that order, so a
/// CLI flag always wins over the file when both set the same key.
pub fn merge(file_entries: &[ConfigEntry], cli_entries: &[ConfigEntry]) -> MergedConfig {
    let mut merged = MergedConfig::default();
    for entry in file_entries.iter().chain(cli_entries.iter()) {
        apply_entry(&mut merged, entry);
    }
    merged
}

fn apply_entry(merged: &mut MergedConfig, entry: &ConfigEntry) {
    if let Some(base) = entry.key.strip_prefix("no-") {
        merged.flags.insert(base.to_string(), false);
        return;
    }
    match entry.key.as_str() {
        "include" | "exclude" => {
            if let Some(pattern) = &entry.value {
                merged.filter_rules.push(RuleLine {
                    sign: if entry.key == "include" { Sign::Include } else { Sign::Exclude },
                    pattern: pattern.clone(),
                });
            }
        }
        _ => match &entry.value {
            Some(value) => {
                merged.scalars.insert(entry.key.clone(), value.clone());
            }
            None => {
                merged.flags.insert(entry.key.clone(), true);
            }
        },
    }
}

/// The fully validated, typed configuration for one backup run.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub source: PathBuf,
    pub backup_root: PathBuf,
    pub os_label: Option<String>,
    pub staleness: StalenessMode,
    pub hard_link_count: Option<u32>,
    pub copy_probability: Option<f64>,
    pub force_copy: bool,
    pub delete_on_error: bool,
    pub delete_first: bool,
    pub free_up: Option<u64>,
    pub checksum_every: Option<u64>,
    pub max_deletions: Option<usize>,
    pub max_age: Option<TimeSpan>,
    pub keep_weekly_after: Option<TimeSpan>,
    pub keep_monthly_after: Option<TimeSpan>,
    pub keep_yearly_after: Option<TimeSpan>,
    pub filter_rules: Vec<RuleLine>,
}

impl BackupConfig {
    /// Builds and validates a [`BackupConfig`] from merged raw entries.
    pub fn from_merged(merged: &MergedConfig) -> Result<Self> {
        let source = require_path(merged, "source")?;
        let backup_root = require_path(merged, "backup-root")?;

        let staleness = match merged.scalars.get("staleness").map(String::as_str) {
            None | Some("quick") => StalenessMode::Quick,
            Some("deep") => StalenessMode::Deep,
            Some(other) => {
                return Err(ConfigError::Validation {
                    message: format!("staleness must be 'quick' or 'deep', got {other:?}"),
                }
                .into())
            }
        };

        let hard_link_count = optional_u32(merged, "hard-link-count")?;
        let copy_probability = optional_f64(merged, "copy-probability")?;
        if hard_link_count.is_some() && copy_probability.is_some() {
            return Err(ConfigError::Conflicting {
                a: "hard-link-count".to_string(),
                b: "copy-probability".to_string(),
            }
            .into());
        }

        let force_copy = merged.flags.get("force-copy").copied().unwrap_or(false);
        let delete_on_error = merged.flags.get("delete-on-error").copied().unwrap_or(false);
        let delete_first = merged.flags.get("delete-first").copied().unwrap_or(false);

        let free_up = match merged.scalars.get("free-up") {
            Some(v) => Some(parse_byte_size(v)?),
            None => None,
        };
        let checksum_every = optional_u64(merged, "checksum-every")?;
        let max_deletions = optional_u64(merged, "max-deletions")?.map(|n| n as usize);
        let max_age = match merged.scalars.get("max-age") {
            Some(v) => Some(TimeSpan::parse(v)?),
            None => None,
        };

        let keep_weekly_after = optional_time_span(merged, "keep-weekly-after")?;
        let keep_monthly_after = optional_time_span(merged, "keep-monthly-after")?;
        let keep_yearly_after = optional_time_span(merged, "keep-yearly-after")?;
        check_tier_order("keep-weekly-after", keep_weekly_after, "keep-monthly-after", keep_monthly_after)?;
        check_tier_order("keep-monthly-after", keep_monthly_after, "keep-yearly-after", keep_yearly_after)?;
        check_tier_order("keep-weekly-after", keep_weekly_after, "keep-yearly-after", keep_yearly_after)?;

        Ok(BackupConfig {
            source,
            backup_root,
            os_label: merged.scalars.get("os-label").cloned(),
            staleness,
            hard_link_count,
            copy_probability,
            force_copy,
            delete_on_error,
            delete_first,
            free_up,
            checksum_every,
            max_deletions,
            max_age,
            keep_weekly_after,
            keep_monthly_after,
            keep_yearly_after,
            filter_rules: merged.filter_rules.clone(),
        })
    }
}

fn optional_time_span(merged: &MergedConfig, key: &str) -> Result<Option<TimeSpan>> {
    match merged.scalars.get(key) {
        Some(v) => Ok(Some(TimeSpan::parse(v)?)),
        None => Ok(None),
    }
}

/// Approximate day count for ordering two tiered-thinning spans against each
/// other — only used to check `A <= B` at config time, never for cutoff math.
fn approx_days(span: &TimeSpan) -> u64 {
    let per_unit = match span.unit {
        crate::parse::TimeUnit::Days => 1,
        crate::parse::TimeUnit::Weeks => 7,
        crate::parse::TimeUnit::Months => 30,
        crate::parse::TimeUnit::Years => 365,
    };
    span.count as u64 * per_unit
}

fn check_tier_order(a_key: &str, a: Option<TimeSpan>, b_key: &str, b: Option<TimeSpan>) -> Result<()> {
    if let (Some(a), Some(b)) = (a, b) {
        if approx_days(&a) > approx_days(&b) {
            return Err(ConfigError::Validation {
                message: format!("{a_key} must be less than or equal to {b_key}"),
            }
            .into());
        }
    }
    Ok(())
}

fn require_path(merged: &MergedConfig, key: &str) -> Result<PathBuf> {
    merged
        .scalars
        .get(key)
        .map(PathBuf::from)
        .ok_or_else(|| ConfigError::Validation { message: format!("missing required setting: {key}") }.into())
}

fn optional_u32(merged: &MergedConfig, key: &str) -> Result<Option<u32>> {
    match merged.scalars.get(key) {
        Some(v) => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ConfigError::Validation { message: format!("{key} must be a non-negative integer, got {v:?}") }.into()),
        None => Ok(None),
    }
}

fn optional_u64(merged: &MergedConfig, key: &str) -> Result<Option<u64>> {
    match merged.scalars.get(key) {
        Some(v) => v
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Validation { message: format!("{key} must be a non-negative integer, got {v:?}") }.into()),
        None => Ok(None),
    }
}

fn optional_f64(merged: &MergedConfig, key: &str) -> Result<Option<f64>> {
    match merged.scalars.get(key) {
        Some(v) => v
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::Validation { message: format!("{key} must be a number, got {v:?}") }.into()),
        None => Ok(None),
    }
}

/// Writes a commented, editable starter config to `path`.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(ConfigError::Validation {
            message: format!("config file already exists: {}", path.display()),
        }
        .into());
    }
    let template = r#"# snapkeep configuration
# Lines are "key: value"; a bare key with no value is a flag (e.g. `force-copy`).
# Wrap a value in double quotes if it needs leading/trailing whitespace preserved.

source: /home/user/Documents
backup-root: /backup/Documents

# staleness: quick | deep
staleness: quick

# Uncomment one of these (they are mutually exclusive):
# hard-link-count: 20
# copy-probability: 0.05

# delete-on-error
# delete-first
# free-up: 5GB
# max-age: 6m
# max-deletions: 50
# checksum-every: 7

# Tiered thinning (keep-weekly-after <= keep-monthly-after <= keep-yearly-after):
# keep-weekly-after: 1m
# keep-monthly-after: 1y
# keep-yearly-after: 5y

# include/exclude rules are evaluated in order; the last match wins.
exclude: *.tmp
exclude: *.cache
include: important.tmp
"#;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lines_handles_comments_blanks_and_bare_flags() {
        let text = "# comment\n\nforce-copy\nsource: /a/b\n";
        let entries = parse_lines(Path::new("test.conf"), text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ConfigEntry { key: "force-copy".to_string(), value: None });
        assert_eq!(entries[1], ConfigEntry { key: "source".to_string(), value: Some("/a/b".to_string()) });
    }

    #[test]
    fn parse_lines_normalizes_keys_and_strips_one_layer_of_quotes() {
        let text = "Free_Up: \"5 GB\"\n";
        let entries = parse_lines(Path::new("test.conf"), text).unwrap();
        assert_eq!(entries[0].key, "free-up");
        assert_eq!(entries[0].value, Some("5 GB".to_string()));
    }

    #[test]
    fn cli_override_wins_over_file_value() {
        let file = parse_lines(Path::new("f"), "staleness: quick\n").unwrap();
        let cli = parse_lines(Path::new("f"), "staleness: deep\n").unwrap();
        let merged = merge(&file, &cli);
        assert_eq!(merged.scalars.get("staleness"), Some(&"deep".to_string()));
    }

    #[test]
    fn no_prefixed_cli_flag_negates_file_flag() {
        let file = parse_lines(Path::new("f"), "force-copy\n").unwrap();
        let cli = parse_lines(Path::new("f"), "no-force-copy\n").unwrap();
        let merged = merge(&file, &cli);
        assert_eq!(merged.flags.get("force-copy"), Some(&false));
    }

    #[test]
    fn filter_rules_append_in_order_across_file_and_cli() {
        let file = parse_lines(Path::new("f"), "exclude: *.tmp\n").unwrap();
        let cli = parse_lines(Path::new("f"), "include: keep.tmp\n").unwrap();
        let merged = merge(&file, &cli);
        assert_eq!(merged.filter_rules.len(), 2);
        assert_eq!(merged.filter_rules[1].pattern, "keep.tmp");
    }

    #[test]
    fn from_merged_rejects_conflicting_hard_link_settings() {
        let file = parse_lines(
            Path::new("f"),
            "source: /a\nbackup-root: /b\nhard-link-count: 5\ncopy-probability: 0.1\n",
        )
        .unwrap();
        let merged = merge(&file, &[]);
        assert!(BackupConfig::from_merged(&merged).is_err());
    }

    #[test]
    fn from_merged_builds_valid_config() {
        let file = parse_lines(Path::new("f"), "source: /a\nbackup-root: /b\n").unwrap();
        let merged = merge(&file, &[]);
        let cfg = BackupConfig::from_merged(&merged).unwrap();
        assert_eq!(cfg.source, PathBuf::from("/a"));
        assert_eq!(cfg.staleness, StalenessMode::Quick);
    }

    #[test]
    fn from_merged_rejects_out_of_order_tiers() {
        let file = parse_lines(
            Path::new("f"),
            "source: /a\nbackup-root: /b\nkeep-weekly-after: 1y\nkeep-monthly-after: 1m\n",
        )
        .unwrap();
        let merged = merge(&file, &[]);
        assert!(BackupConfig::from_merged(&merged).is_err());
    }

    #[test]
    fn from_merged_accepts_ordered_tiers() {
        let file = parse_lines(
            Path::new("f"),
            "source: /a\nbackup-root: /b\nkeep-weekly-after: 1m\nkeep-monthly-after: 1y\nkeep-yearly-after: 5y\n",
        )
        .unwrap();
        let merged = merge(&file, &[]);
        let cfg = BackupConfig::from_merged(&merged).unwrap();
        assert!(cfg.keep_weekly_after.is_some());
        assert!(cfg.keep_monthly_after.is_some());
        assert!(cfg.keep_yearly_after.is_some());
    }

    #[test]
    fn config_file_cannot_set_config_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapkeep.conf");
        std::fs::write(&path, "config: other.conf\n").unwrap();
        assert!(read_config_from(&path).is_err());
    }
}
