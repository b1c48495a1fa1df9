//! Durable, append-only operation history, scoped per target directory.
//!
//! The ledger is the source of truth for everything the engine has done to a
//! directory: one [`OperationRecord`] per batch apply, learnings job, safe
//! deletion, undo, or redo. Records carry enough per-file detail to reverse
//! themselves, so the undo/redo and restore controllers operate purely on the
//! ledger plus the filesystem, never on the long-gone plan.
//!
//! Records are append-only with two sanctioned exceptions: flipping a
//! record's reversed-flag, and sealing a record left `in_progress` by a
//! crashed process. Everything else is expressed by appending compensating
//! records. Field names are stable snake_case so histories written by older
//! sessions keep replaying.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BackupPolicy;
use crate::error::{EngineError, Result};

/// History file kept at the root of every managed directory.
pub const LEDGER_FILE_NAME: &str = ".refolder_history.json";

/// Bumped only for incompatible envelope changes.
const LEDGER_FORMAT_VERSION: u32 = 1;

/// Outcome of one file within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Dry run: the move was computed but not executed.
    Planned,
    /// The file was moved to its destination.
    Moved,
    /// Deliberately not moved (below the confidence threshold, or already
    /// where the reversal would put it).
    Skipped,
    /// Destination occupied; the file was left untouched.
    Conflict,
    /// Source missing when the engine reached it.
    Missing,
    /// The filesystem refused the move.
    Denied,
}

/// Aggregate outcome of a whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Batch is still running. Found on disk only after a crash; sealed to
    /// `cancelled` the next time the ledger is opened for writing.
    InProgress,
    /// Every file that should move did move.
    Succeeded,
    /// At least one per-file failure occurred.
    Failed,
    /// Cancellation was requested between files; the partial batch stands.
    Cancelled,
    /// Dry run; nothing touched the filesystem.
    Skipped,
    /// Compensating record appended by an undo or redo.
    Reversed,
    /// Safe-deletion cleanup batch.
    BulkCleanup,
}

/// What kind of batch produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Full plan application.
    Apply,
    /// Explicit move list applied on behalf of a learning profile.
    LearningsApply,
    /// Safe deletion into the vault.
    Cleanup,
    /// Compensating reversal of an earlier record.
    Undo,
    /// Compensating re-application of a reversed record.
    Redo,
}

/// One file's journey within a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMove {
    /// Where the file was before the batch.
    pub original_path: PathBuf,
    /// Where the batch put (or meant to put) it.
    pub destination_path: PathBuf,
    /// Where a displaced occupant of the destination was preserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Content digest carried over from the scan, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub outcome: MoveOutcome,
    /// Human-readable reason for a non-moved outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counters surfaced to callers and the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    #[serde(default)]
    pub moved: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub skipped: usize,
    /// Files the plan left unassigned; they produce no moves.
    #[serde(default)]
    pub unassigned: usize,
    #[serde(default)]
    pub folders_created: usize,
    /// Files moved into the vault by safe deletion.
    #[serde(default)]
    pub deleted: usize,
    /// Bytes reclaimed by safe deletion.
    #[serde(default)]
    pub bytes_freed: u64,
}

/// One ledger entry: a batch apply, learnings job, cleanup, undo, or redo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub target_dir: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub outcome: OperationOutcome,
    #[serde(default)]
    pub moves: Vec<FileMove>,
    #[serde(default)]
    pub counts: OperationCounts,
    /// Free-form notes: seal events, stop reasons, per-file error digests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    /// Two-state toggle: false = applied, true = reversed.
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub backup_policy: BackupPolicy,
    /// Plan this record materialized, for apply records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    /// Owning project for learnings jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// For compensating records, the record they reverse or re-apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<Uuid>,
    /// Directories this batch itself created, deepest last. Consulted by
    /// the empty-folder prune policy on undo.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<PathBuf>,
}

impl OperationRecord {
    /// Whether undo may target this record: not yet reversed, not itself a
    /// compensating record, and the outcome left real moves behind.
    /// Compensating records and dry runs are audit entries, never undo
    /// targets; a cancelled compensation is finished by retrying the undo
    /// or redo of its original record.
    pub fn is_undoable(&self) -> bool {
        !self.reversed
            && !matches!(self.kind, OperationKind::Undo | OperationKind::Redo)
            && matches!(
                self.outcome,
                OperationOutcome::Succeeded
                    | OperationOutcome::Failed
                    | OperationOutcome::Cancelled
                    | OperationOutcome::BulkCleanup
            )
    }

    /// Whether redo may target this record (superseding is checked at the
    /// ledger level).
    pub fn is_redoable(&self) -> bool {
        self.reversed
    }

    /// Moves that physically relocated a file.
    pub fn effective_moves(&self) -> impl Iterator<Item = &FileMove> {
        self.moves
            .iter()
            .filter(|m| m.outcome == MoveOutcome::Moved)
    }

    pub fn has_effective_moves(&self) -> bool {
        self.effective_moves().next().is_some()
    }
}

/// Envelope written to disk. `version` guards future format changes.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerEnvelope {
    version: u32,
    #[serde(default)]
    records: Vec<OperationRecord>,
}

/// The persisted history of one directory, oldest record first.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    path: PathBuf,
    records: Vec<OperationRecord>,
}

impl Ledger {
    /// Load a directory's history read-only. A missing history file means an
    /// empty ledger, not an error.
    ///
    /// # Errors
    ///
    /// `InvalidBasePath` if `dir` is not a directory; `LedgerRead` /
    /// `LedgerFormat` if the file exists but cannot be read or parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(EngineError::InvalidBasePath {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }
        let dir = dir.canonicalize().map_err(|e| EngineError::InvalidBasePath {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = dir.join(LEDGER_FILE_NAME);

        let records = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| EngineError::LedgerRead {
                path: path.clone(),
                source: e,
            })?;
            let envelope: LedgerEnvelope =
                serde_json::from_str(&content).map_err(|e| EngineError::LedgerFormat {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            envelope.records
        } else {
            Vec::new()
        };

        debug!(dir = %dir.display(), records = records.len(), "ledger loaded");
        Ok(Self { dir, path, records })
    }

    /// Load a directory's history for writing, sealing any record a crashed
    /// process left `in_progress`: such a record becomes `cancelled`, making
    /// the partial batch visible and undoable exactly like a cooperative
    /// cancellation.
    pub fn open_for_write(dir: &Path) -> Result<Self> {
        let mut ledger = Self::load(dir)?;

        let mut sealed = 0;
        for record in &mut ledger.records {
            if record.outcome == OperationOutcome::InProgress {
                record.outcome = OperationOutcome::Cancelled;
                record
                    .diagnostics
                    .push("sealed: interrupted by process exit".to_string());
                sealed += 1;
            }
        }
        if sealed > 0 {
            warn!(dir = %ledger.dir.display(), sealed, "sealed interrupted operation records");
            ledger.flush()?;
        }

        Ok(ledger)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in append order, oldest first.
    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    /// Records newest-first, the order histories are displayed in.
    pub fn newest_first(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter().rev()
    }

    pub fn get(&self, id: Uuid) -> Option<&OperationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn index_of(&self, id: Uuid) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .ok_or(EngineError::RecordNotFound(id))
    }

    /// Append a record and durably flush.
    pub fn append(&mut self, record: OperationRecord) -> Result<()> {
        self.records.push(record);
        self.flush()
    }

    /// Mutate one record in place and durably flush. This is the single
    /// writer path for per-file progress, flag flips, and outcome sealing.
    pub fn update<F>(&mut self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut OperationRecord),
    {
        let idx = self.index_of(id)?;
        mutate(&mut self.records[idx]);
        self.flush()
    }

    /// The most recent record undo could target right now.
    pub fn latest_applied(&self) -> Option<&OperationRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.is_undoable() && r.has_effective_moves())
    }

    /// Whether any record appended after `id` is currently applied. Such a
    /// record supersedes `id` for redo purposes: replaying over newer state
    /// is rejected, not guessed at.
    pub fn has_applied_after(&self, id: Uuid) -> Result<bool> {
        let idx = self.index_of(id)?;
        Ok(self.records[idx + 1..]
            .iter()
            .any(|r| r.is_undoable() && r.has_effective_moves()))
    }

    /// Drop every record and persist the empty history.
    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.flush()
    }

    /// Persist the whole ledger. Written to a sibling temp file first so a
    /// crash mid-write never leaves a truncated history.
    ///
    /// # Errors
    ///
    /// `LedgerWrite`, fatal for the surrounding operation: physically moved
    /// files must not be reported as success if their bookkeeping is gone.
    pub fn flush(&self) -> Result<()> {
        let envelope = LedgerEnvelope {
            version: LEDGER_FORMAT_VERSION,
            records: self.records.clone(),
        };
        let json =
            serde_json::to_string_pretty(&envelope).map_err(|e| EngineError::LedgerWrite {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| EngineError::LedgerWrite {
            path: self.path.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| EngineError::LedgerWrite {
            path: self.path.clone(),
            source: e,
        })
    }
}
