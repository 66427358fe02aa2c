//! # Error Types
//!
//! Defines a structured error hierarchy for the backup engine using `thiserror`.
//! Each variant carries enough context for meaningful diagnostics without
//! exposing internal implementation details to the caller. `ConfigError`,
//! `CatalogError`, and `FatalIOError` abort a run; `FileSkipError` and
//! `IntegrityMismatch` are recorded in a report and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes in the backup system.
#[derive(Error, Debug)]
pub enum SnapkeepError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    FatalIo(#[from] FatalIOError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration parsing and validation errors. Abort before any I/O.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config line {line_no} in {path}: {text:?}")]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        text: String,
    },

    #[error("invalid config: {message}")]
    Validation { message: String },

    #[error("mutually exclusive options specified: {a} and {b}")]
    Conflicting { a: String, b: String },

    #[error("could not parse time span {0:?}")]
    TimeSpan(String),

    #[error("could not parse byte size {0:?}")]
    ByteSize(String),

    #[error("could not parse date {0:?}")]
    Date(String),
}

/// Backup-root / catalog structure errors. Abort.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("backup root is not a readable directory: {0}")]
    Unreadable(PathBuf),

    #[error("no writable year bucket could be created under {0}")]
    NoWritableBucket(PathBuf),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("ambiguous snapshot selector {selector:?}: matched {count} snapshots")]
    Ambiguous { selector: String, count: usize },
}

/// A single non-fatal per-file failure: logged, counted, and the walk continues.
#[derive(Error, Debug, Clone)]
pub enum FileSkipError {
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("could not read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("could not write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("could not hard-link {path}: {reason}")]
    LinkFailed { path: PathBuf, reason: String },

    #[error("broken symlink target unreadable: {path}")]
    BrokenSymlink { path: PathBuf },

    #[error("comparison against previous snapshot failed for {path}: {reason}")]
    CompareFailed { path: PathBuf, reason: String },
}

/// A detected checksum mismatch between a manifest entry and the live file.
#[derive(Error, Debug, Clone)]
#[error("checksum mismatch: {path}")]
pub struct IntegrityMismatch {
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

/// Structurally fatal errors. Abort; honor `--delete-on-error`.
#[derive(Error, Debug)]
pub enum FatalIOError {
    #[error("source directory does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("cannot create snapshot root {path}: {source}")]
    CannotCreateRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("destination is full or unwritable: {path}: {source}")]
    DestinationFull {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to finalize snapshot (rename {from} -> {to}): {source}")]
    FinalizeFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SnapkeepError>;
