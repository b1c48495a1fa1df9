//! Single-file move primitives.
//!
//! Everything here operates on exactly one path and reports plain
//! `io::Result`s; translating failures into per-file outcomes and aggregate
//! counts is the batch runner's business. The one policy decision baked in
//! at this level: a transfer never overwrites an occupied destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::config::BackupPolicy;

/// Directory holding displaced destination occupants, per managed directory.
pub const BACKUP_DIR_NAME: &str = ".refolder_backup";

/// Move one file. Refuses an occupied destination; the caller decides
/// whether that is a conflict or a backup case before calling.
///
/// Uses a rename, falling back to copy-and-remove when the rename fails
/// (typically a cross-filesystem destination).
pub fn transfer(source: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination already exists: {}", dest.display()),
        ));
    }
    if !source.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source missing: {}", source.display()),
        ));
    }

    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // Rename cannot cross filesystems; copy then remove.
            debug!(
                source = %source.display(),
                dest = %dest.display(),
                error = %rename_err,
                "rename failed, falling back to copy"
            );
            fs::copy(source, dest)?;
            fs::remove_file(source)?;
            Ok(())
        }
    }
}

/// Collision-free name for a preserved file: `<uuid>__<original name>`.
pub(crate) fn unique_name(original: &Path) -> String {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    format!("{}__{}", Uuid::new_v4(), name)
}

/// Clear an occupied destination according to the backup policy, preserving
/// the occupant under `backup_root`. Returns the occupant's new location,
/// or `None` when the destination was already free.
///
/// With [`BackupPolicy::None`] an occupied destination is not this
/// function's problem; callers record a conflict instead of calling it.
pub fn backup_occupant(
    dest: &Path,
    policy: BackupPolicy,
    backup_root: &Path,
) -> io::Result<Option<PathBuf>> {
    if policy == BackupPolicy::None || !dest.exists() {
        return Ok(None);
    }

    fs::create_dir_all(backup_root)?;
    let backup_path = backup_root.join(unique_name(dest));
    match policy {
        BackupPolicy::None => unreachable!("handled above"),
        BackupPolicy::MoveToBackup => transfer(dest, &backup_path)?,
        BackupPolicy::CopyToBackup => {
            fs::copy(dest, &backup_path)?;
            fs::remove_file(dest)?;
        }
    }
    debug!(
        dest = %dest.display(),
        backup = %backup_path.display(),
        "displaced destination occupant"
    );
    Ok(Some(backup_path))
}

/// Create `dir` and any missing ancestors, reporting which directories this
/// call actually created, shallowest first. Lets a batch record exactly the
/// folders it brought into existence.
pub fn create_dir_all_tracked(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    while let Some(p) = cursor {
        if p.as_os_str().is_empty() || p.exists() {
            break;
        }
        missing.push(p.to_path_buf());
        cursor = p.parent();
    }
    missing.reverse();
    if !missing.is_empty() {
        fs::create_dir_all(dir)?;
    }
    Ok(missing)
}

/// Remove the given directories if they are empty, deepest first. Non-empty
/// and already-gone directories are left alone. Returns how many were
/// removed.
pub fn prune_empty_dirs(dirs: &[PathBuf]) -> usize {
    let mut pruned = 0;
    // Created shallowest-first, so prune in reverse.
    for dir in dirs.iter().rev() {
        // remove_dir refuses non-empty directories, which is the guarantee
        // this relies on.
        if fs::remove_dir(dir).is_ok() {
            debug!(dir = %dir.display(), "pruned empty directory");
            pruned += 1;
        }
    }
    pruned
}
