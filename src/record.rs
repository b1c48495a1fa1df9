//! File records produced by a directory scan.
//!
//! A [`FileRecord`] is the unit the proposal layer works with: a stable id
//! plus enough metadata (name, size, timestamps, optional content hash) to
//! build and review a reorganization plan. Identity is the id, never the
//! path; paths change the moment a plan is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::config::CompiledFilters;
use crate::error::{EngineError, Result};

/// A scanned file as seen by the proposal layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable identity of the file within a plan. Survives renames inside
    /// the plan; does not survive a new scan.
    pub id: Uuid,

    /// Absolute path of the file at scan time.
    pub source_path: PathBuf,

    /// File name shown to the user and reused as the destination name.
    pub display_name: String,

    /// Size in bytes at scan time.
    pub size: u64,

    /// Hex blake3 digest of the content, when checksums were requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Creation time, where the filesystem reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Last modification time, where the filesystem reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,

    /// Proposer-assigned confidence in [0.0, 1.0] that this file's plan
    /// placement is right. Drives the selective-apply threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl FileRecord {
    /// Build a record for one existing regular file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file's metadata cannot be read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            id: Uuid::new_v4(),
            source_path: path.to_path_buf(),
            display_name,
            size: metadata.len(),
            checksum: None,
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            confidence: None,
        })
    }

    /// Compute and attach the blake3 digest of the file's current content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn compute_checksum(&mut self) -> Result<()> {
        self.checksum = Some(hash_file(&self.source_path)?);
        Ok(())
    }
}

/// Hex blake3 digest of a file's content, streamed.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Internal artifacts the engine keeps inside a managed directory. A scan
/// never exposes these to the proposal layer, whatever the filter rules say.
pub(crate) fn is_engine_artifact(name: &str) -> bool {
    name == crate::ledger::LEDGER_FILE_NAME
        || name == crate::vault::VAULT_DIR_NAME
        || name == crate::mover::BACKUP_DIR_NAME
}

/// Scan the top level of a directory and build records for the files a plan
/// may reorganize.
///
/// Only regular files directly inside `dir` are considered; subdirectories
/// are left alone. Files are filtered through the compiled rules, engine
/// artifacts are always excluded, and the result is ordered by display name
/// so repeated scans of an unchanged directory agree.
///
/// # Errors
///
/// Returns an error if `dir` does not exist or is not a directory, or if the
/// directory cannot be read. Per-file metadata failures skip the file.
pub fn scan_directory(
    dir: &Path,
    filters: &CompiledFilters,
    with_checksums: bool,
) -> Result<Vec<FileRecord>> {
    if !dir.is_dir() {
        return Err(EngineError::InvalidBasePath {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if is_engine_artifact(&name) {
            continue;
        }
        if !filters.should_include(Path::new(&name)) {
            debug!(file = %name, "excluded by filter rules");
            continue;
        }

        let mut record = match FileRecord::from_path(&entry.path()) {
            Ok(record) => record,
            Err(e) => {
                debug!(file = %name, error = %e, "skipping unreadable file");
                continue;
            }
        };
        if with_checksums {
            record.compute_checksum()?;
        }
        records.push(record);
    }

    records.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(records)
}
