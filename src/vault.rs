//! Safe deletion: files are vaulted, never unlinked.
//!
//! Duplicate cleanup moves each targeted file into the directory's vault
//! and runs through the standard batch runner, so a cleanup appears in the
//! ledger as one `bulk_cleanup` record and the whole group is restorable
//! with a plain undo. Individual files come back through their
//! [`RestorableItem`], which is consumed on restore.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::ledger::{Ledger, MoveOutcome, OperationKind, OperationRecord};
use crate::mover;
use crate::progress::{CancelToken, ProgressReporter};
use crate::record;
use crate::runner::{BatchEntry, BatchSpec, run_batch};

/// Vault directory kept at the root of every managed directory.
pub const VAULT_DIR_NAME: &str = ".refolder_vault";

/// Claim ticket for one safely-deleted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorableItem {
    /// Where the bytes sit now, inside the vault.
    pub deleted_path: PathBuf,
    /// Where the file lived before deletion.
    pub original_path: PathBuf,
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

/// Move each targeted file into the vault instead of unlinking it.
///
/// The survivor is the duplicate-group member being kept; it is never
/// touched, and listing it among the targets is rejected outright. Returns
/// the appended cleanup record together with one claim ticket per file that
/// actually reached the vault.
///
/// # Errors
///
/// `SurvivorTargeted` when the survivor appears in `files`; otherwise only
/// ledger durability failures. Per-file problems (missing targets and the
/// like) are recorded on the cleanup record, not raised.
pub fn delete_safely(
    ledger: &mut Ledger,
    files: &[PathBuf],
    survivor: &Path,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<(OperationRecord, Vec<RestorableItem>)> {
    for file in files {
        if same_file(file, survivor) {
            return Err(EngineError::SurvivorTargeted(survivor.to_path_buf()));
        }
    }

    let vault_dir = ledger.dir().join(VAULT_DIR_NAME);
    let entries = files
        .iter()
        .map(|file| BatchEntry {
            source: file.clone(),
            destination: vault_dir.join(mover::unique_name(file)),
            checksum: record::hash_file(file).ok(),
            size: fs::metadata(file).map(|m| m.len()).ok(),
            confidence: None,
        })
        .collect();
    let spec = BatchSpec {
        kind: OperationKind::Cleanup,
        entries,
        backup_policy: crate::config::BackupPolicy::None,
        dry_run: false,
        confidence_threshold: 0.0,
        plan_id: None,
        origin: None,
        unassigned: 0,
    };

    let record = run_batch(ledger, &spec, reporter, cancel)?;
    let items = record
        .moves
        .iter()
        .filter(|m| m.outcome == MoveOutcome::Moved)
        .map(|m| RestorableItem {
            deleted_path: m.destination_path.clone(),
            original_path: m.original_path.clone(),
        })
        .collect();
    info!(
        dir = %ledger.dir().display(),
        deleted = record.counts.deleted,
        bytes = record.counts.bytes_freed,
        "safe deletion finished"
    );
    Ok((record, items))
}

/// Bring one vaulted file back to its original path, consuming the vault
/// copy. An occupied original path fails; nothing is overwritten and the
/// vault copy stays claimable.
///
/// # Errors
///
/// I/O errors from the move, including `AlreadyExists` for an occupied
/// original path and `NotFound` for an already-consumed item.
pub fn restore(item: &RestorableItem) -> Result<()> {
    if let Some(parent) = item.original_path.parent() {
        fs::create_dir_all(parent)?;
    }
    mover::transfer(&item.deleted_path, &item.original_path)?;
    info!(path = %item.original_path.display(), "restored from vault");
    Ok(())
}

/// Drop every vaulted file in a directory. Returns how many files and
/// bytes were let go. Used by the explicit purge operation only.
pub fn purge_vault(dir: &Path) -> Result<(usize, u64)> {
    let vault_dir = dir.join(VAULT_DIR_NAME);
    if !vault_dir.exists() {
        return Ok((0, 0));
    }

    let mut files = 0;
    let mut bytes = 0;
    for entry in fs::read_dir(&vault_dir)? {
        let entry = entry?;
        if let Ok(metadata) = entry.metadata()
            && metadata.is_file()
        {
            files += 1;
            bytes += metadata.len();
        }
    }
    fs::remove_dir_all(&vault_dir)?;
    info!(dir = %dir.display(), files, bytes, "vault purged");
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history;
    use crate::progress::SilentReporter;

    fn delete_quiet(
        ledger: &mut Ledger,
        files: &[PathBuf],
        survivor: &Path,
    ) -> Result<(OperationRecord, Vec<RestorableItem>)> {
        delete_safely(ledger, files, survivor, &SilentReporter, &CancelToken::new())
    }

    #[test]
    fn test_delete_and_restore_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x1.jpg"), b"same bytes").unwrap();
        fs::write(dir.path().join("x2.jpg"), b"same bytes").unwrap();
        let mut ledger = Ledger::open_for_write(dir.path()).unwrap();

        let (record, items) = delete_quiet(
            &mut ledger,
            &[dir.path().join("x2.jpg")],
            &dir.path().join("x1.jpg"),
        )
        .unwrap();

        assert_eq!(items.len(), 1);
        assert!(!dir.path().join("x2.jpg").exists());
        assert!(dir.path().join("x1.jpg").exists());
        assert_eq!(record.counts.deleted, 1);
        assert_eq!(record.counts.bytes_freed, 10);
        assert_eq!(fs::read(&items[0].deleted_path).unwrap(), b"same bytes");

        restore(&items[0]).unwrap();
        assert_eq!(fs::read(dir.path().join("x2.jpg")).unwrap(), b"same bytes");
        assert!(!items[0].deleted_path.exists());
    }

    #[test]
    fn test_survivor_is_never_a_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x1.jpg"), b"same").unwrap();
        fs::write(dir.path().join("x2.jpg"), b"same").unwrap();
        let mut ledger = Ledger::open_for_write(dir.path()).unwrap();

        let err = delete_quiet(
            &mut ledger,
            &[dir.path().join("x2.jpg"), dir.path().join("x1.jpg")],
            &dir.path().join("x1.jpg"),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::SurvivorTargeted(_)));

        // Nothing was vaulted.
        assert!(dir.path().join("x1.jpg").exists());
        assert!(dir.path().join("x2.jpg").exists());
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn test_restore_refuses_occupied_original_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x1.jpg"), b"same").unwrap();
        fs::write(dir.path().join("x2.jpg"), b"same").unwrap();
        let mut ledger = Ledger::open_for_write(dir.path()).unwrap();

        let (_, items) = delete_quiet(
            &mut ledger,
            &[dir.path().join("x2.jpg")],
            &dir.path().join("x1.jpg"),
        )
        .unwrap();

        fs::write(dir.path().join("x2.jpg"), b"newcomer").unwrap();
        assert!(restore(&items[0]).is_err());
        // Both files intact.
        assert_eq!(fs::read(dir.path().join("x2.jpg")).unwrap(), b"newcomer");
        assert!(items[0].deleted_path.exists());
    }

    #[test]
    fn test_undo_restores_whole_cleanup_group() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.jpg"), b"same").unwrap();
        fs::write(dir.path().join("dup1.jpg"), b"same").unwrap();
        fs::write(dir.path().join("dup2.jpg"), b"same").unwrap();
        let mut ledger = Ledger::open_for_write(dir.path()).unwrap();

        let (record, _) = delete_quiet(
            &mut ledger,
            &[dir.path().join("dup1.jpg"), dir.path().join("dup2.jpg")],
            &dir.path().join("keep.jpg"),
        )
        .unwrap();
        assert!(!dir.path().join("dup1.jpg").exists());

        let comp = history::undo(
            &mut ledger,
            record.id,
            false,
            &SilentReporter,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(comp.counts.moved, 2);
        assert!(dir.path().join("dup1.jpg").exists());
        assert!(dir.path().join("dup2.jpg").exists());
        assert!(ledger.get(record.id).unwrap().reversed);
    }

    #[test]
    fn test_missing_target_is_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.jpg"), b"k").unwrap();
        let mut ledger = Ledger::open_for_write(dir.path()).unwrap();

        let (record, items) = delete_quiet(
            &mut ledger,
            &[dir.path().join("ghost.jpg")],
            &dir.path().join("keep.jpg"),
        )
        .unwrap();
        assert!(items.is_empty());
        assert_eq!(record.counts.failed, 1);
    }

    #[test]
    fn test_purge_vault_counts_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x1.jpg"), b"same").unwrap();
        fs::write(dir.path().join("x2.jpg"), b"same").unwrap();
        let mut ledger = Ledger::open_for_write(dir.path()).unwrap();
        delete_quiet(
            &mut ledger,
            &[dir.path().join("x2.jpg")],
            &dir.path().join("x1.jpg"),
        )
        .unwrap();

        let (files, bytes) = purge_vault(dir.path()).unwrap();
        assert_eq!(files, 1);
        assert_eq!(bytes, 4);
        assert!(!dir.path().join(VAULT_DIR_NAME).exists());

        // Purging an empty vault is a quiet no-op.
        assert_eq!(purge_vault(dir.path()).unwrap(), (0, 0));
    }
}
