//! Crate-wide error types.
//!
//! Per-file problems (a missing source, an occupied destination, a
//! permission failure) are never surfaced as errors: they are recorded as
//! per-file outcomes on the operation record and aggregated into counts.
//! `EngineError` covers only the hard failures (invalid preconditions and
//! ledger durability) that abort the whole operation.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The target base directory does not exist or is not a directory.
    #[error("invalid base path {path}: {source}")]
    InvalidBasePath {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The durable ledger could not be written. Files may already have been
    /// physically moved; the operation must not be reported as successful.
    #[error("failed to persist operation ledger at {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The ledger file exists but could not be read.
    #[error("failed to read operation ledger at {path}: {source}")]
    LedgerRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The ledger file is present but not parseable.
    #[error("operation ledger at {path} is corrupt: {reason}")]
    LedgerFormat { path: PathBuf, reason: String },

    /// No record with this id exists in the directory's ledger.
    #[error("no operation record {0} in this directory's history")]
    RecordNotFound(Uuid),

    /// Undo requested on a record that cannot be reversed (already
    /// reversed, a compensating record, or a dry run).
    #[error("record {0} cannot be undone in its current state")]
    NotUndoable(Uuid),

    /// Redo requested on a record that is not currently reversed.
    #[error("record {0} is not reversed, nothing to redo")]
    NotRedoable(Uuid),

    /// Redo requested on a record with a later, still-applied operation in
    /// the same directory. Replaying over newer state is rejected rather
    /// than guessed at.
    #[error("record {0} is superseded by a later applied operation; undo that one first")]
    RecordSuperseded(Uuid),

    /// The file id is not present anywhere in the plan.
    #[error("file {0} is not part of this plan")]
    FileNotInPlan(Uuid),

    /// The referenced plan node does not exist.
    #[error("plan node {0} does not exist")]
    NodeNotFound(Uuid),

    /// A structural edit would make a node its own ancestor.
    #[error("cannot move node {0} underneath its own descendant")]
    CycleRejected(Uuid),

    /// Restore was pointed at a record that is currently reversed; the
    /// state right after it cannot be reached by undoing later records.
    #[error("cannot restore to record {0}: it is currently reversed")]
    RestoreUnreachable(Uuid),

    /// Safe deletion was asked to delete the file designated as survivor.
    #[error("survivor {0} is listed among the files to delete")]
    SurvivorTargeted(PathBuf),

    /// A plan document could not be parsed or violates plan invariants.
    #[error("invalid plan: {0}")]
    PlanFormat(String),

    /// Configuration could not be loaded or compiled.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient crate-wide result type.
pub type Result<T> = std::result::Result<T, EngineError>;
