//! Generalized batch executor: backup, move each file, record the outcome.
//!
//! One runner serves full-plan application, learnings batch jobs, and
//! safe-deletion cleanups; the batch spec's kind and backup policy are the
//! only things that differ. Batches are deliberately NOT atomic across
//! files: every per-file outcome is flushed to the ledger the moment it is
//! known, so a crash mid-batch leaves a record describing exactly what
//! happened instead of an all-or-nothing mystery.
//!
//! Per-file problems never abort the batch and never become errors; they
//! are recorded on the move list and aggregated into counts. Only ledger
//! durability failures abort.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chrono::Utc;

use crate::config::BackupPolicy;
use crate::error::Result;
use crate::ledger::{
    FileMove, Ledger, MoveOutcome, OperationCounts, OperationKind, OperationOutcome,
    OperationRecord,
};
use crate::mover;
use crate::plan::Plan;
use crate::progress::{CancelToken, ProgressReporter};

/// One file the batch should relocate.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Content digest carried from the scan, recorded for auditability.
    pub checksum: Option<String>,
    pub size: Option<u64>,
    /// Proposer confidence; entries without one are never threshold-skipped.
    pub confidence: Option<f32>,
}

/// Everything the runner needs to execute one batch.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub kind: OperationKind,
    pub entries: Vec<BatchEntry>,
    pub backup_policy: BackupPolicy,
    /// Compute a would-be record without touching any file.
    pub dry_run: bool,
    /// Entries with a confidence strictly below this are recorded as
    /// skipped. 0.0 applies everything.
    pub confidence_threshold: f32,
    pub plan_id: Option<Uuid>,
    /// Owning project, for learnings jobs.
    pub origin: Option<String>,
    /// Files the plan left unassigned; carried into the record's counts.
    pub unassigned: usize,
}

impl BatchSpec {
    /// Lower a plan into a batch: destination is the target directory, the
    /// node's folder path, then the file's display name. Files already at
    /// their destination produce no entry; unassigned files only count.
    pub fn from_plan(plan: &Plan, target_dir: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        let mut stack: Vec<Uuid> = plan.root_ids.iter().rev().copied().collect();
        while let Some(node_id) = stack.pop() {
            let folder = target_dir.join(plan.node_path(node_id)?);
            if let Some(node) = plan.node(node_id) {
                for file in &node.files {
                    let destination = folder.join(&file.display_name);
                    if destination == file.source_path {
                        continue;
                    }
                    entries.push(BatchEntry {
                        source: file.source_path.clone(),
                        destination,
                        checksum: file.checksum.clone(),
                        size: Some(file.size),
                        confidence: file.confidence,
                    });
                }
                stack.extend(node.child_ids.iter().rev().copied());
            }
        }

        Ok(Self {
            kind: OperationKind::Apply,
            entries,
            backup_policy: BackupPolicy::None,
            dry_run: false,
            confidence_threshold: 0.0,
            plan_id: Some(plan.id),
            origin: None,
            unassigned: plan.unassigned.len(),
        })
    }

    /// Batch over an explicit move list, as the learnings feature supplies.
    pub fn from_move_list(pairs: Vec<(PathBuf, PathBuf)>, origin: &str) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(source, destination)| BatchEntry {
                source,
                destination,
                checksum: None,
                size: None,
                confidence: None,
            })
            .collect();
        Self {
            kind: OperationKind::LearningsApply,
            entries,
            backup_policy: BackupPolicy::None,
            dry_run: false,
            confidence_threshold: 0.0,
            plan_id: None,
            origin: Some(origin.to_string()),
            unassigned: 0,
        }
    }
}

/// Map an I/O failure onto a per-file outcome.
pub(crate) fn classify_failure(e: &io::Error) -> MoveOutcome {
    match e.kind() {
        io::ErrorKind::NotFound => MoveOutcome::Missing,
        io::ErrorKind::AlreadyExists => MoveOutcome::Conflict,
        _ => MoveOutcome::Denied,
    }
}

/// Result of replaying one stored move in either direction.
pub(crate) struct ReplayStep {
    pub outcome: MoveOutcome,
    pub error: Option<String>,
    pub created_dirs: Vec<PathBuf>,
}

/// The shared reversal/re-application matrix. `from` is where the file
/// should currently be, `to` where it should end up:
/// - both present: conflict, nothing touched;
/// - only `from`: move it (recreating missing parent folders);
/// - only `to`: the step already holds, skip;
/// - neither: the file is lost to this ledger, a per-file failure.
pub(crate) fn replay_transfer(from: &Path, to: &Path) -> ReplayStep {
    match (from.exists(), to.exists()) {
        (true, true) => ReplayStep {
            outcome: MoveOutcome::Conflict,
            error: Some(format!("target occupied: {}", to.display())),
            created_dirs: Vec::new(),
        },
        (false, true) => ReplayStep {
            outcome: MoveOutcome::Skipped,
            error: Some("already at target".to_string()),
            created_dirs: Vec::new(),
        },
        (false, false) => ReplayStep {
            outcome: MoveOutcome::Missing,
            error: Some(format!(
                "missing from both {} and {}",
                from.display(),
                to.display()
            )),
            created_dirs: Vec::new(),
        },
        (true, false) => {
            let mut created_dirs = Vec::new();
            if let Some(parent) = to.parent() {
                match mover::create_dir_all_tracked(parent) {
                    Ok(dirs) => created_dirs = dirs,
                    Err(e) => {
                        return ReplayStep {
                            outcome: MoveOutcome::Denied,
                            error: Some(format!("creating parent folder: {e}")),
                            created_dirs,
                        };
                    }
                }
            }
            match mover::transfer(from, to) {
                Ok(()) => ReplayStep {
                    outcome: MoveOutcome::Moved,
                    error: None,
                    created_dirs,
                },
                Err(e) => ReplayStep {
                    outcome: classify_failure(&e),
                    error: Some(e.to_string()),
                    created_dirs,
                },
            }
        }
    }
}

/// Execute one forward entry against the filesystem.
fn execute_entry(
    entry: &BatchEntry,
    policy: BackupPolicy,
    backup_root: &Path,
) -> (FileMove, Vec<PathBuf>) {
    let mut mv = FileMove {
        original_path: entry.source.clone(),
        destination_path: entry.destination.clone(),
        backup_path: None,
        checksum: entry.checksum.clone(),
        size: entry.size,
        outcome: MoveOutcome::Moved,
        error: None,
    };
    let mut created_dirs = Vec::new();

    if !entry.source.exists() {
        mv.outcome = MoveOutcome::Missing;
        mv.error = Some("source no longer exists".to_string());
        return (mv, created_dirs);
    }

    if let Some(parent) = entry.destination.parent() {
        match mover::create_dir_all_tracked(parent) {
            Ok(dirs) => created_dirs = dirs,
            Err(e) => {
                mv.outcome = MoveOutcome::Denied;
                mv.error = Some(format!("creating destination folder: {e}"));
                return (mv, created_dirs);
            }
        }
    }

    if entry.destination.exists() {
        if policy == BackupPolicy::None {
            mv.outcome = MoveOutcome::Conflict;
            mv.error = Some("destination occupied".to_string());
            return (mv, created_dirs);
        }
        match mover::backup_occupant(&entry.destination, policy, backup_root) {
            Ok(backup) => mv.backup_path = backup,
            Err(e) => {
                mv.outcome = MoveOutcome::Denied;
                mv.error = Some(format!("backing up destination occupant: {e}"));
                return (mv, created_dirs);
            }
        }
    }

    if let Err(e) = mover::transfer(&entry.source, &entry.destination) {
        mv.outcome = classify_failure(&e);
        mv.error = Some(e.to_string());
    }
    (mv, created_dirs)
}

fn base_record(spec: &BatchSpec, target_dir: &Path, outcome: OperationOutcome) -> OperationRecord {
    OperationRecord {
        id: Uuid::new_v4(),
        target_dir: target_dir.to_path_buf(),
        timestamp: Utc::now(),
        kind: spec.kind,
        outcome,
        moves: Vec::new(),
        counts: OperationCounts {
            unassigned: spec.unassigned,
            ..Default::default()
        },
        diagnostics: Vec::new(),
        reversed: false,
        backup_policy: spec.backup_policy,
        plan_id: spec.plan_id,
        origin: spec.origin.clone(),
        reverses: None,
        created_dirs: Vec::new(),
    }
}

fn below_threshold(entry: &BatchEntry, threshold: f32) -> bool {
    threshold > 0.0 && entry.confidence.is_some_and(|c| c < threshold)
}

/// Run one batch against the ledger's directory and return the final
/// record. The ledger must be opened for writing; the caller holds the
/// directory's serialization lock.
///
/// # Errors
///
/// Only ledger durability failures (and poisoned preconditions inside the
/// ledger) surface here; per-file problems are data in the record.
pub fn run_batch(
    ledger: &mut Ledger,
    spec: &BatchSpec,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<OperationRecord> {
    let total = spec.entries.len();
    info!(
        dir = %ledger.dir().display(),
        kind = ?spec.kind,
        entries = total,
        dry_run = spec.dry_run,
        "starting batch"
    );
    reporter.on_batch_start(total);

    if spec.dry_run {
        return run_dry(ledger, spec, reporter);
    }

    let backup_root = ledger.dir().join(mover::BACKUP_DIR_NAME);
    let mut record = base_record(spec, ledger.dir(), OperationOutcome::InProgress);
    let record_id = record.id;
    record.backup_policy = spec.backup_policy;
    ledger.append(record)?;

    let mut cancelled = false;
    let mut done = 0;
    for entry in &spec.entries {
        // Cooperative cancellation: between files only, never mid-move.
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let (mv, created_dirs) = if below_threshold(entry, spec.confidence_threshold) {
            (
                FileMove {
                    original_path: entry.source.clone(),
                    destination_path: entry.destination.clone(),
                    backup_path: None,
                    checksum: entry.checksum.clone(),
                    size: entry.size,
                    outcome: MoveOutcome::Skipped,
                    error: Some(format!(
                        "confidence {:.2} below threshold {:.2}",
                        entry.confidence.unwrap_or(0.0),
                        spec.confidence_threshold
                    )),
                },
                Vec::new(),
            )
        } else {
            execute_entry(entry, spec.backup_policy, &backup_root)
        };

        match mv.outcome {
            MoveOutcome::Moved => debug!(
                from = %mv.original_path.display(),
                to = %mv.destination_path.display(),
                "moved"
            ),
            MoveOutcome::Skipped => debug!(
                file = %mv.original_path.display(),
                "skipped"
            ),
            _ => warn!(
                file = %mv.original_path.display(),
                outcome = ?mv.outcome,
                error = mv.error.as_deref().unwrap_or(""),
                "per-file failure"
            ),
        }

        // Durable flush after every file: the window in which a physically
        // moved file is untracked must stay as small as possible.
        let is_cleanup = spec.kind == OperationKind::Cleanup;
        ledger.update(record_id, move |r| {
            match mv.outcome {
                MoveOutcome::Moved => {
                    r.counts.moved += 1;
                    if is_cleanup {
                        r.counts.deleted += 1;
                        r.counts.bytes_freed += mv.size.unwrap_or(0);
                    }
                }
                MoveOutcome::Skipped => r.counts.skipped += 1,
                MoveOutcome::Conflict | MoveOutcome::Missing | MoveOutcome::Denied => {
                    r.counts.failed += 1;
                }
                MoveOutcome::Planned => {}
            }
            r.counts.folders_created += created_dirs.len();
            r.created_dirs.extend(created_dirs);
            r.moves.push(mv);
        })?;

        done += 1;
        let name = entry
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.on_entry_done(done, total, &name);
    }

    ledger.update(record_id, |r| {
        r.outcome = if cancelled {
            r.diagnostics
                .push(format!("cancelled after {done} of {total} entries"));
            OperationOutcome::Cancelled
        } else if r.counts.failed > 0 {
            OperationOutcome::Failed
        } else if spec.kind == OperationKind::Cleanup {
            OperationOutcome::BulkCleanup
        } else {
            OperationOutcome::Succeeded
        };
    })?;

    let record = ledger
        .get(record_id)
        .cloned()
        .ok_or(crate::error::EngineError::RecordNotFound(record_id))?;
    info!(
        dir = %ledger.dir().display(),
        outcome = ?record.outcome,
        moved = record.counts.moved,
        failed = record.counts.failed,
        skipped = record.counts.skipped,
        "batch finished"
    );
    reporter.on_batch_complete(record.counts.moved, record.counts.failed);
    Ok(record)
}

/// Dry run: predict each entry's outcome without touching any file, then
/// persist a single would-be record with outcome `skipped`.
fn run_dry(
    ledger: &mut Ledger,
    spec: &BatchSpec,
    reporter: &dyn ProgressReporter,
) -> Result<OperationRecord> {
    let mut record = base_record(spec, ledger.dir(), OperationOutcome::Skipped);
    record
        .diagnostics
        .push("dry run: no files were touched".to_string());

    let total = spec.entries.len();
    for (i, entry) in spec.entries.iter().enumerate() {
        let (outcome, error) = if below_threshold(entry, spec.confidence_threshold) {
            (
                MoveOutcome::Skipped,
                Some(format!(
                    "confidence {:.2} below threshold {:.2}",
                    entry.confidence.unwrap_or(0.0),
                    spec.confidence_threshold
                )),
            )
        } else if !entry.source.exists() {
            (
                MoveOutcome::Missing,
                Some("source no longer exists".to_string()),
            )
        } else if entry.destination.exists() && spec.backup_policy == BackupPolicy::None {
            (
                MoveOutcome::Conflict,
                Some("destination occupied".to_string()),
            )
        } else {
            (MoveOutcome::Planned, None)
        };

        match outcome {
            MoveOutcome::Skipped => record.counts.skipped += 1,
            MoveOutcome::Missing | MoveOutcome::Conflict => record.counts.failed += 1,
            _ => {}
        }
        record.moves.push(FileMove {
            original_path: entry.source.clone(),
            destination_path: entry.destination.clone(),
            backup_path: None,
            checksum: entry.checksum.clone(),
            size: entry.size,
            outcome,
            error,
        });

        let name = entry
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.on_entry_done(i + 1, total, &name);
    }

    ledger.append(record.clone())?;
    reporter.on_batch_complete(0, record.counts.failed);
    Ok(record)
}
