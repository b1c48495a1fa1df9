//! Undo, redo, and restore-to-point over the operation ledger.
//!
//! Each record is a two-state toggle: `applied -undo-> reversed -redo->
//! applied`. There is no LIFO stack; the timeline experience comes from
//! targeting a specific record, and restore-to-point is a compensating
//! chain of undos, not a snapshot.
//!
//! Reversal works from the ledger and the filesystem alone. Every stored
//! move is replayed through one four-case matrix (see
//! [`crate::runner::replay_transfer`]): a file found where the reversal
//! expects it moves back, a file already at the target is skipped, a file
//! at neither path or at an occupied target is a per-file failure.
//! Failures never relocate unrelated files and never overwrite.

use tracing::{info, warn};
use uuid::Uuid;

use chrono::Utc;

use crate::config::BackupPolicy;
use crate::error::{EngineError, Result};
use crate::ledger::{
    FileMove, Ledger, MoveOutcome, OperationCounts, OperationKind, OperationOutcome,
    OperationRecord,
};
use crate::mover;
use crate::progress::{CancelToken, ProgressReporter};
use crate::runner::replay_transfer;

/// Direction of a toggle pass over a record's stored moves.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// destination → original, newest move first.
    Reverse,
    /// original → destination, stored order.
    Replay,
}

/// Outcome of a restore-to-point chain.
#[derive(Debug)]
pub struct RestoreReport {
    /// Records fully reversed by this chain, newest first.
    pub reversed: Vec<Uuid>,
    /// Record whose undo had per-file failures or was cancelled, halting
    /// the chain. `None` when the chain ran to completion.
    pub halted_at: Option<Uuid>,
    /// Compensating records appended along the way, in execution order.
    pub compensations: Vec<OperationRecord>,
}

impl RestoreReport {
    pub fn completed(&self) -> bool {
        self.halted_at.is_none()
    }
}

/// Reverse an applied record: move each effectively moved file back from
/// its destination to its original path, append a compensating record, and
/// flip the record's reversed-flag if every file came back.
///
/// A record with per-file failures keeps its reversed-flag clear so the
/// undo can be retried; files already restored are skipped on retry, so
/// repeated undos converge.
///
/// # Errors
///
/// `RecordNotFound` for an unknown id; `NotUndoable` when the record is
/// already reversed, a compensating record, or a dry run; `LedgerWrite` if
/// bookkeeping cannot be persisted.
pub fn undo(
    ledger: &mut Ledger,
    record_id: Uuid,
    prune_empty_folders: bool,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<OperationRecord> {
    let record = ledger
        .get(record_id)
        .cloned()
        .ok_or(EngineError::RecordNotFound(record_id))?;
    if !record.is_undoable() {
        return Err(EngineError::NotUndoable(record_id));
    }

    info!(record = %record_id, dir = %ledger.dir().display(), "undoing record");
    let comp = toggle_pass(
        ledger,
        &record,
        Direction::Reverse,
        OperationKind::Undo,
        reporter,
        cancel,
    )?;

    let clean = comp.counts.failed == 0 && comp.outcome != OperationOutcome::Cancelled;
    if clean {
        ledger.update(record_id, |r| r.reversed = true)?;
        if prune_empty_folders && !record.created_dirs.is_empty() {
            let pruned = mover::prune_empty_dirs(&record.created_dirs);
            if pruned > 0 {
                ledger.update(comp.id, |r| {
                    r.diagnostics.push(format!("pruned {pruned} empty folders"));
                })?;
            }
        }
    } else if comp.counts.failed > 0 {
        warn!(
            record = %record_id,
            failed = comp.counts.failed,
            "partial undo; record remains applied for retry"
        );
        ledger.update(comp.id, |r| {
            r.diagnostics.push(format!(
                "partial undo: {} file(s) not restored; original record remains applied",
                r.counts.failed
            ));
        })?;
    }

    ledger
        .get(comp.id)
        .cloned()
        .ok_or(EngineError::RecordNotFound(comp.id))
}

/// Re-apply a reversed record: move each originally moved file from its
/// original path back to its destination and clear the reversed-flag if
/// every file made it.
///
/// # Errors
///
/// `NotRedoable` when the record is not currently reversed;
/// `RecordSuperseded` when a later record is still applied in the same
/// directory; replaying underneath newer state is rejected, not guessed
/// at.
pub fn redo(
    ledger: &mut Ledger,
    record_id: Uuid,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<OperationRecord> {
    let record = ledger
        .get(record_id)
        .cloned()
        .ok_or(EngineError::RecordNotFound(record_id))?;
    if !record.is_redoable() {
        return Err(EngineError::NotRedoable(record_id));
    }
    if ledger.has_applied_after(record_id)? {
        return Err(EngineError::RecordSuperseded(record_id));
    }

    info!(record = %record_id, dir = %ledger.dir().display(), "redoing record");
    let comp = toggle_pass(
        ledger,
        &record,
        Direction::Replay,
        OperationKind::Redo,
        reporter,
        cancel,
    )?;

    let clean = comp.counts.failed == 0 && comp.outcome != OperationOutcome::Cancelled;
    if clean {
        ledger.update(record_id, |r| r.reversed = false)?;
    } else if comp.counts.failed > 0 {
        warn!(
            record = %record_id,
            failed = comp.counts.failed,
            "partial redo; record remains reversed for retry"
        );
        ledger.update(comp.id, |r| {
            r.diagnostics.push(format!(
                "partial redo: {} file(s) not re-applied; record remains reversed",
                r.counts.failed
            ));
        })?;
    }

    ledger
        .get(comp.id)
        .cloned()
        .ok_or(EngineError::RecordNotFound(comp.id))
}

/// Walk each effectively moved file of `record` through the four-case
/// matrix, appending and incrementally flushing a compensating record.
fn toggle_pass(
    ledger: &mut Ledger,
    record: &OperationRecord,
    direction: Direction,
    kind: OperationKind,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<OperationRecord> {
    let mut steps: Vec<&FileMove> = record.effective_moves().collect();
    if direction == Direction::Reverse {
        // Compensate newest-first so chained moves unwind cleanly.
        steps.reverse();
    }
    let total = steps.len();
    reporter.on_batch_start(total);

    let comp = OperationRecord {
        id: Uuid::new_v4(),
        target_dir: record.target_dir.clone(),
        timestamp: Utc::now(),
        kind,
        outcome: OperationOutcome::InProgress,
        moves: Vec::new(),
        counts: OperationCounts::default(),
        diagnostics: Vec::new(),
        reversed: false,
        backup_policy: BackupPolicy::None,
        plan_id: record.plan_id,
        origin: record.origin.clone(),
        reverses: Some(record.id),
        created_dirs: Vec::new(),
    };
    let comp_id = comp.id;
    ledger.append(comp)?;

    let mut cancelled = false;
    let mut done = 0;
    for step in steps {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let (from, to) = match direction {
            Direction::Reverse => (&step.destination_path, &step.original_path),
            Direction::Replay => (&step.original_path, &step.destination_path),
        };
        let replay = replay_transfer(from, to);
        if replay.outcome != MoveOutcome::Moved && replay.outcome != MoveOutcome::Skipped {
            warn!(
                from = %from.display(),
                to = %to.display(),
                outcome = ?replay.outcome,
                "per-file failure during toggle"
            );
        }

        let mv = FileMove {
            original_path: from.clone(),
            destination_path: to.clone(),
            backup_path: None,
            checksum: step.checksum.clone(),
            size: step.size,
            outcome: replay.outcome,
            error: replay.error,
        };
        ledger.update(comp_id, move |r| {
            match mv.outcome {
                MoveOutcome::Moved => r.counts.moved += 1,
                MoveOutcome::Skipped => r.counts.skipped += 1,
                MoveOutcome::Conflict | MoveOutcome::Missing | MoveOutcome::Denied => {
                    r.counts.failed += 1;
                }
                MoveOutcome::Planned => {}
            }
            r.counts.folders_created += replay.created_dirs.len();
            r.created_dirs.extend(replay.created_dirs);
            r.moves.push(mv);
        })?;

        done += 1;
        let name = to
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.on_entry_done(done, total, &name);
    }

    ledger.update(comp_id, |r| {
        if cancelled {
            r.diagnostics
                .push(format!("cancelled after {done} of {total} entries"));
            r.outcome = OperationOutcome::Cancelled;
        } else {
            r.outcome = OperationOutcome::Reversed;
        }
    })?;

    let comp = ledger
        .get(comp_id)
        .cloned()
        .ok_or(EngineError::RecordNotFound(comp_id))?;
    reporter.on_batch_complete(comp.counts.moved, comp.counts.failed);
    Ok(comp)
}

/// Undo back to the state that held right after `target_record_id` was
/// applied: reverse every later still-applied record, newest first, the
/// target itself excluded.
///
/// The chain halts at the first undo with per-file failures or a
/// cancellation, leaving earlier reversals in place; the directory is still
/// fully described by the ledger. Records that are not currently applied
/// (compensations, dry runs, already-reversed entries) are passed over.
///
/// # Errors
///
/// `RecordNotFound` for an unknown target; `RestoreUnreachable` when the
/// target itself is currently reversed.
pub fn restore_to(
    ledger: &mut Ledger,
    target_record_id: Uuid,
    prune_empty_folders: bool,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<RestoreReport> {
    let target = ledger
        .get(target_record_id)
        .ok_or(EngineError::RecordNotFound(target_record_id))?;
    if target.reversed {
        return Err(EngineError::RestoreUnreachable(target_record_id));
    }

    // Later still-applied records, newest first.
    let mut chain: Vec<Uuid> = ledger
        .records()
        .iter()
        .skip_while(|r| r.id != target_record_id)
        .skip(1)
        .filter(|r| r.is_undoable() && r.has_effective_moves())
        .map(|r| r.id)
        .collect();
    chain.reverse();

    info!(
        target = %target_record_id,
        chain = chain.len(),
        dir = %ledger.dir().display(),
        "restoring to point"
    );

    let mut report = RestoreReport {
        reversed: Vec::new(),
        halted_at: None,
        compensations: Vec::new(),
    };
    for record_id in chain {
        let comp = undo(ledger, record_id, prune_empty_folders, reporter, cancel)?;
        let clean = comp.counts.failed == 0 && comp.outcome != OperationOutcome::Cancelled;
        report.compensations.push(comp);
        if clean {
            report.reversed.push(record_id);
        } else {
            warn!(record = %record_id, "restore chain halted");
            report.halted_at = Some(record_id);
            break;
        }
    }
    Ok(report)
}
