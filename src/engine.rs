//! Engine facade: configuration plus per-directory serialization.
//!
//! Every public operation (apply, undo, redo, restore, safe deletion,
//! purge) goes through the engine so that exactly one of them runs per
//! target directory at a time. The engine keeps an `Arc<Mutex<()>>` per
//! canonicalized directory and holds the guard for the whole operation;
//! operations on distinct directories proceed concurrently. All operations
//! are blocking and I/O bound, intended for worker threads, with progress
//! and cancellation flowing through [`ProgressReporter`] and
//! [`CancelToken`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::history::{self, RestoreReport};
use crate::ledger::{Ledger, OperationRecord};
use crate::plan::Plan;
use crate::progress::{CancelToken, ProgressReporter};
use crate::record::{self, FileRecord};
use crate::runner::{BatchSpec, run_batch};
use crate::vault::{self, RestorableItem};

/// Outcome summary of a whole-directory dedupe.
#[derive(Debug, Default)]
pub struct DedupeSummary {
    /// Duplicate groups found (each had two or more identical files).
    pub groups: usize,
    pub deleted: usize,
    pub bytes_freed: u64,
    /// One cleanup record per group, in execution order.
    pub records: Vec<OperationRecord>,
    /// Claim tickets for every vaulted file.
    pub items: Vec<RestorableItem>,
}

/// The reversible-operation engine.
pub struct Engine {
    config: EngineConfig,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The serialization lock for one directory. Distinct spellings of the
    /// same directory share a lock; distinct directories never contend.
    fn dir_lock(&self, dir: &Path) -> Result<Arc<Mutex<()>>> {
        let key = dir
            .canonicalize()
            .map_err(|e| EngineError::InvalidBasePath {
                path: dir.to_path_buf(),
                source: e,
            })?;
        let mut registry = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(registry.entry(key).or_default().clone())
    }

    /// Scan a directory's top-level files through the configured filters.
    /// Read-only; runs without the directory lock.
    pub fn scan(&self, dir: &Path, with_checksums: bool) -> Result<Vec<FileRecord>> {
        let filters = self.config.compile_filters()?;
        record::scan_directory(dir, &filters, with_checksums)
    }

    /// Apply a plan to its target directory. `dry_run` forces a would-be
    /// record even when the configuration does not.
    pub fn apply_plan(
        &self,
        plan: &Plan,
        target_dir: &Path,
        dry_run: bool,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<OperationRecord> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        let mut spec = BatchSpec::from_plan(plan, target_dir)?;
        spec.backup_policy = self.config.engine.backup_policy;
        spec.confidence_threshold = self.config.engine.confidence_threshold;
        spec.dry_run = dry_run || self.config.engine.dry_run;
        run_batch(&mut ledger, &spec, reporter, cancel)
    }

    /// Apply an explicit move list on behalf of a learning profile.
    pub fn apply_moves(
        &self,
        pairs: Vec<(PathBuf, PathBuf)>,
        origin: &str,
        target_dir: &Path,
        dry_run: bool,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<OperationRecord> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        let mut spec = BatchSpec::from_move_list(pairs, origin);
        spec.backup_policy = self.config.engine.backup_policy;
        spec.dry_run = dry_run || self.config.engine.dry_run;
        run_batch(&mut ledger, &spec, reporter, cancel)
    }

    /// Reverse one record by id; see [`history::undo`].
    pub fn undo(
        &self,
        target_dir: &Path,
        record_id: Uuid,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<OperationRecord> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        history::undo(
            &mut ledger,
            record_id,
            self.config.engine.prune_empty_folders,
            reporter,
            cancel,
        )
    }

    /// Re-apply one reversed record by id; see [`history::redo`].
    pub fn redo(
        &self,
        target_dir: &Path,
        record_id: Uuid,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<OperationRecord> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        history::redo(&mut ledger, record_id, reporter, cancel)
    }

    /// Undo back to the state right after `record_id` was applied; see
    /// [`history::restore_to`].
    pub fn restore_to(
        &self,
        target_dir: &Path,
        record_id: Uuid,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<RestoreReport> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        history::restore_to(
            &mut ledger,
            record_id,
            self.config.engine.prune_empty_folders,
            reporter,
            cancel,
        )
    }

    /// Vault the given files, keeping `survivor` untouched; see
    /// [`vault::delete_safely`].
    pub fn delete_safely(
        &self,
        target_dir: &Path,
        files: &[PathBuf],
        survivor: &Path,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<(OperationRecord, Vec<RestorableItem>)> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        vault::delete_safely(&mut ledger, files, survivor, reporter, cancel)
    }

    /// Bring one vaulted file back; see [`vault::restore`].
    pub fn restore_item(&self, item: &RestorableItem) -> Result<()> {
        vault::restore(item)
    }

    /// Group a directory's files by content hash and vault every duplicate,
    /// keeping the first of each group as survivor. One cleanup record per
    /// group, each independently undoable.
    pub fn dedupe(
        &self,
        target_dir: &Path,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<DedupeSummary> {
        let groups = self.find_duplicates(target_dir)?;

        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);
        let mut ledger = Ledger::open_for_write(target_dir)?;

        let mut summary = DedupeSummary {
            groups: groups.len(),
            ..Default::default()
        };
        for group in groups {
            if cancel.is_cancelled() {
                break;
            }
            let survivor = group[0].source_path.clone();
            let targets: Vec<PathBuf> =
                group[1..].iter().map(|r| r.source_path.clone()).collect();
            let (record, mut items) =
                vault::delete_safely(&mut ledger, &targets, &survivor, reporter, cancel)?;
            summary.deleted += record.counts.deleted;
            summary.bytes_freed += record.counts.bytes_freed;
            summary.records.push(record);
            summary.items.append(&mut items);
        }
        info!(
            dir = %target_dir.display(),
            groups = summary.groups,
            deleted = summary.deleted,
            "dedupe finished"
        );
        Ok(summary)
    }

    /// Duplicate groups by blake3 digest: every group holds two or more
    /// files with identical content, in scan (name) order.
    pub fn find_duplicates(&self, dir: &Path) -> Result<Vec<Vec<FileRecord>>> {
        let records = self.scan(dir, true)?;
        let mut by_digest: HashMap<String, Vec<FileRecord>> = HashMap::new();
        for record in records {
            if let Some(digest) = record.checksum.clone() {
                by_digest.entry(digest).or_default().push(record);
            }
        }
        let mut groups: Vec<Vec<FileRecord>> = by_digest
            .into_values()
            .filter(|group| group.len() > 1)
            .collect();
        groups.sort_by(|a, b| a[0].display_name.cmp(&b[0].display_name));
        Ok(groups)
    }

    /// A directory's history, newest first. Read-only: no sealing, no lock.
    pub fn history(&self, target_dir: &Path) -> Result<Vec<OperationRecord>> {
        let ledger = Ledger::load(target_dir)?;
        Ok(ledger.newest_first().cloned().collect())
    }

    /// The most recent record undo could target, if any.
    pub fn latest_applied(&self, target_dir: &Path) -> Result<Option<OperationRecord>> {
        let ledger = Ledger::load(target_dir)?;
        Ok(ledger.latest_applied().cloned())
    }

    /// Clear a directory's ledger and vault on explicit user request.
    /// Returns the vaulted file count and bytes let go.
    pub fn purge(&self, target_dir: &Path) -> Result<(usize, u64)> {
        let lock = self.dir_lock(target_dir)?;
        let _guard = hold(&lock);

        let mut ledger = Ledger::open_for_write(target_dir)?;
        ledger.clear()?;
        vault::purge_vault(ledger.dir())
    }
}

/// Take a directory guard, recovering from a poisoned lock: the ledger is
/// flushed per file, so state after a panicking operation is still exactly
/// what the ledger describes.
fn hold(lock: &Arc<Mutex<()>>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use std::fs;
    use std::thread;

    fn plan_moving_all(engine: &Engine, dir: &Path, folder: &str) -> Plan {
        let records = engine.scan(dir, false).unwrap();
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut plan = Plan::from_records(records);
        let node = plan.add_folder(folder, None).unwrap();
        for id in ids {
            plan.move_file(id, node).unwrap();
        }
        plan
    }

    #[test]
    fn test_facade_apply_undo_redo_cycle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let engine = Engine::with_defaults();
        let plan = plan_moving_all(&engine, dir.path(), "Docs");

        let record = engine
            .apply_plan(&plan, dir.path(), false, &SilentReporter, &CancelToken::new())
            .unwrap();
        assert!(dir.path().join("Docs").join("a.txt").exists());

        engine
            .undo(dir.path(), record.id, &SilentReporter, &CancelToken::new())
            .unwrap();
        assert!(dir.path().join("a.txt").exists());

        engine
            .redo(dir.path(), record.id, &SilentReporter, &CancelToken::new())
            .unwrap();
        assert!(dir.path().join("Docs").join("a.txt").exists());
    }

    #[test]
    fn test_same_directory_operations_serialize() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            fs::write(dir.path().join(format!("f{i}.txt")), b"x").unwrap();
        }
        let engine = Arc::new(Engine::with_defaults());

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = Arc::clone(&engine);
            let dir = dir.path().to_path_buf();
            handles.push(thread::spawn(move || {
                engine
                    .apply_moves(
                        vec![(dir.join(format!("f{i}.txt")), dir.join("Out").join(format!("f{i}.txt")))],
                        "worker",
                        &dir,
                        false,
                        &SilentReporter,
                        &CancelToken::new(),
                    )
                    .unwrap()
            }));
        }
        for handle in handles {
            let record = handle.join().unwrap();
            assert_eq!(record.counts.moved, 1);
        }

        // Interleaved writers would have corrupted this; serialized ones
        // leave four clean records.
        let history = engine.history(dir.path()).unwrap();
        assert_eq!(history.len(), 4);
        for i in 0..4 {
            assert!(dir.path().join("Out").join(format!("f{i}.txt")).exists());
        }
    }

    #[test]
    fn test_dir_lock_shared_across_path_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::with_defaults();
        let direct = engine.dir_lock(dir.path()).unwrap();
        let dotted = engine.dir_lock(&dir.path().join(".")).unwrap();
        assert!(Arc::ptr_eq(&direct, &dotted));
    }

    #[test]
    fn test_history_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        let engine = Engine::with_defaults();

        let first = engine
            .apply_moves(
                vec![(dir.path().join("a.txt"), dir.path().join("One/a.txt"))],
                "p",
                dir.path(),
                false,
                &SilentReporter,
                &CancelToken::new(),
            )
            .unwrap();
        let second = engine
            .apply_moves(
                vec![(dir.path().join("b.txt"), dir.path().join("Two/b.txt"))],
                "p",
                dir.path(),
                false,
                &SilentReporter,
                &CancelToken::new(),
            )
            .unwrap();

        let history = engine.history(dir.path()).unwrap();
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);
        assert_eq!(engine.latest_applied(dir.path()).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_dedupe_keeps_one_survivor_per_group() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a1.bin"), b"alpha").unwrap();
        fs::write(dir.path().join("a2.bin"), b"alpha").unwrap();
        fs::write(dir.path().join("a3.bin"), b"alpha").unwrap();
        fs::write(dir.path().join("solo.bin"), b"unique").unwrap();
        let engine = Engine::with_defaults();

        let summary = engine
            .dedupe(dir.path(), &SilentReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.items.len(), 2);

        // The alphabetically first file of the group survives.
        assert!(dir.path().join("a1.bin").exists());
        assert!(!dir.path().join("a2.bin").exists());
        assert!(!dir.path().join("a3.bin").exists());
        assert!(dir.path().join("solo.bin").exists());
    }

    #[test]
    fn test_purge_clears_ledger_and_vault() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x1.jpg"), b"same").unwrap();
        fs::write(dir.path().join("x2.jpg"), b"same").unwrap();
        let engine = Engine::with_defaults();
        engine
            .delete_safely(
                dir.path(),
                &[dir.path().join("x2.jpg")],
                &dir.path().join("x1.jpg"),
                &SilentReporter,
                &CancelToken::new(),
            )
            .unwrap();

        let (files, bytes) = engine.purge(dir.path()).unwrap();
        assert_eq!(files, 1);
        assert_eq!(bytes, 4);
        assert!(engine.history(dir.path()).unwrap().is_empty());
        assert!(!dir.path().join(vault::VAULT_DIR_NAME).exists());
    }

    #[test]
    fn test_config_threshold_flows_through_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let mut config = EngineConfig::default();
        config.engine.confidence_threshold = 0.8;
        let engine = Engine::new(config);

        let records = engine.scan(dir.path(), false).unwrap();
        let id = records[0].id;
        let mut plan = Plan::from_records(records);
        let node = plan.add_folder("Docs", None).unwrap();
        plan.move_file(id, node).unwrap();
        // Tag the entry with a low confidence.
        let mut plan_json: serde_json::Value =
            serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        plan_json["folders"][0]["files"][0]["confidence"] = serde_json::json!(0.3);
        let plan = Plan::from_json(&plan_json.to_string()).unwrap();

        let record = engine
            .apply_plan(&plan, dir.path(), false, &SilentReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(record.counts.skipped, 1);
        assert_eq!(record.counts.moved, 0);
        assert!(dir.path().join("a.txt").exists());
    }
}
