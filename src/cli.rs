//! Command-line interface module for refolder.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing and validation
//! - Plan and move-list loading
//! - Apply, undo, redo, and restore orchestration
//! - History rendering
//! - Vault maintenance (dedupe, purge)

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::output::{self, OutputFormatter, ProgressBarReporter};
use crate::plan::Plan;
use crate::progress::CancelToken;

#[derive(Debug, Parser)]
#[command(name = "refolder")]
#[command(about = "Reversible file organization with a durable history", long_about = None)]
pub struct Cli {
    /// Configuration file overriding the usual discovery cascade
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List a directory's top-level files through the configured filters
    Scan {
        dir: PathBuf,
        /// Compute content checksums while scanning
        #[arg(long)]
        checksums: bool,
    },
    /// Apply a plan document to a directory
    Apply {
        dir: PathBuf,
        /// Plan JSON produced by the planning frontend
        plan: PathBuf,
        /// Record what would happen without touching any file
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply an explicit move list on behalf of a learning profile
    ApplyMoves {
        dir: PathBuf,
        /// JSON array of {"from", "to"} pairs
        moves: PathBuf,
        /// Profile name recorded as the origin
        #[arg(long, default_value = "cli")]
        origin: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the operation history, newest first
    History { dir: PathBuf },
    /// Reverse one operation (the most recent when no id is given)
    Undo {
        dir: PathBuf,
        /// Record id, or any unique prefix of one
        id: Option<String>,
    },
    /// Re-apply one reversed operation
    Redo {
        dir: PathBuf,
        /// Record id, or any unique prefix of one
        id: String,
    },
    /// Undo every operation after the given record
    Restore {
        dir: PathBuf,
        /// Record id, or any unique prefix of one
        id: String,
    },
    /// Vault duplicate files, keeping one survivor per content group
    Dedupe { dir: PathBuf },
    /// Clear the history and empty the vault
    Purge {
        dir: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// One entry of an apply-moves document.
#[derive(Debug, Deserialize)]
struct MovePair {
    from: PathBuf,
    to: PathBuf,
}

/// Runs the CLI application with the given parsed arguments.
///
/// This is the main entry point for CLI operations. It loads the
/// configuration, builds the engine, and dispatches to the requested
/// command.
///
/// # Arguments
///
/// * `cli` - The parsed command line
pub fn run_cli(cli: Cli) -> Result<(), String> {
    let config = EngineConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Error loading configuration: {}", e))?;
    let engine = Engine::new(config);

    match cli.command {
        Commands::Scan { dir, checksums } => cmd_scan(&engine, &dir, checksums),
        Commands::Apply { dir, plan, dry_run } => cmd_apply(&engine, &dir, &plan, dry_run),
        Commands::ApplyMoves {
            dir,
            moves,
            origin,
            dry_run,
        } => cmd_apply_moves(&engine, &dir, &moves, &origin, dry_run),
        Commands::History { dir } => cmd_history(&engine, &dir),
        Commands::Undo { dir, id } => cmd_undo(&engine, &dir, id.as_deref()),
        Commands::Redo { dir, id } => cmd_redo(&engine, &dir, &id),
        Commands::Restore { dir, id } => cmd_restore(&engine, &dir, &id),
        Commands::Dedupe { dir } => cmd_dedupe(&engine, &dir),
        Commands::Purge { dir, yes } => cmd_purge(&engine, &dir, yes),
    }
}

/// Lists the files a plan would be allowed to touch.
fn cmd_scan(engine: &Engine, dir: &Path, checksums: bool) -> Result<(), String> {
    OutputFormatter::info(&format!("Scanning contents of: {}", dir.display()));

    let records = engine
        .scan(dir, checksums)
        .map_err(|e| format!("Error scanning {}: {}", dir.display(), e))?;
    if records.is_empty() {
        OutputFormatter::plain("No files found.");
        return Ok(());
    }

    for record in &records {
        let digest = match &record.checksum {
            Some(digest) => format!("  {}", &digest[..digest.len().min(12)]),
            None => String::new(),
        };
        println!(
            " - {} ({}){}",
            record.display_name,
            output::human_size(record.size),
            digest
        );
    }
    OutputFormatter::plain(&format!("\nTotal: {} file(s)", records.len()));
    Ok(())
}

/// Applies a plan document loaded from disk.
fn cmd_apply(engine: &Engine, dir: &Path, plan_path: &Path, dry_run: bool) -> Result<(), String> {
    let json = fs::read_to_string(plan_path)
        .map_err(|e| format!("Error reading plan {}: {}", plan_path.display(), e))?;
    let plan = Plan::from_json(&json).map_err(|e| format!("Error parsing plan: {}", e))?;

    if dry_run {
        OutputFormatter::dry_run_notice(&format!("Analyzing plan for: {}", dir.display()));
    } else {
        OutputFormatter::info(&format!("Applying plan to: {}", dir.display()));
    }

    let reporter = ProgressBarReporter::new();
    let record = engine
        .apply_plan(&plan, dir, dry_run, &reporter, &CancelToken::new())
        .map_err(|e| format!("Error applying plan: {}", e))?;

    OutputFormatter::operation_summary(&record);
    if dry_run {
        OutputFormatter::dry_run_notice("No files were modified.");
    } else {
        OutputFormatter::success(&format!(
            "Plan applied. Use 'refolder undo {}' to revert.",
            dir.display()
        ));
    }
    Ok(())
}

/// Applies an explicit move list on behalf of a learning profile.
fn cmd_apply_moves(
    engine: &Engine,
    dir: &Path,
    moves_path: &Path,
    origin: &str,
    dry_run: bool,
) -> Result<(), String> {
    let json = fs::read_to_string(moves_path)
        .map_err(|e| format!("Error reading move list {}: {}", moves_path.display(), e))?;
    let pairs: Vec<MovePair> =
        serde_json::from_str(&json).map_err(|e| format!("Error parsing move list: {}", e))?;
    // Relative paths in the document are taken relative to the target.
    let pairs: Vec<(PathBuf, PathBuf)> = pairs
        .into_iter()
        .map(|p| (resolve_against(dir, p.from), resolve_against(dir, p.to)))
        .collect();

    OutputFormatter::info(&format!(
        "Applying {} move(s) for profile '{}' to: {}",
        pairs.len(),
        origin,
        dir.display()
    ));

    let reporter = ProgressBarReporter::new();
    let record = engine
        .apply_moves(pairs, origin, dir, dry_run, &reporter, &CancelToken::new())
        .map_err(|e| format!("Error applying moves: {}", e))?;

    OutputFormatter::operation_summary(&record);
    if dry_run {
        OutputFormatter::dry_run_notice("No files were modified.");
    }
    Ok(())
}

fn cmd_history(engine: &Engine, dir: &Path) -> Result<(), String> {
    let records = engine
        .history(dir)
        .map_err(|e| format!("Error reading history: {}", e))?;
    OutputFormatter::history_table(&records);
    Ok(())
}

/// Reverses one operation. Without an id, targets the most recent record
/// undo can act on.
fn cmd_undo(engine: &Engine, dir: &Path, id: Option<&str>) -> Result<(), String> {
    let record_id = match id {
        Some(prefix) => resolve_record_id(engine, dir, prefix)?,
        None => engine
            .latest_applied(dir)
            .map_err(|e| format!("Error reading history: {}", e))?
            .map(|r| r.id)
            .ok_or_else(|| format!("Nothing to undo in {}", dir.display()))?,
    };

    let reporter = ProgressBarReporter::new();
    let record = engine
        .undo(dir, record_id, &reporter, &CancelToken::new())
        .map_err(|e| format!("Error undoing: {}", e))?;

    OutputFormatter::operation_summary(&record);
    if record.counts.failed == 0 {
        OutputFormatter::success("Undo complete.");
    } else {
        OutputFormatter::warning(
            "Some files could not be restored. Fix the issues and run undo again.",
        );
    }
    Ok(())
}

fn cmd_redo(engine: &Engine, dir: &Path, id: &str) -> Result<(), String> {
    let record_id = resolve_record_id(engine, dir, id)?;

    let reporter = ProgressBarReporter::new();
    let record = engine
        .redo(dir, record_id, &reporter, &CancelToken::new())
        .map_err(|e| format!("Error redoing: {}", e))?;

    OutputFormatter::operation_summary(&record);
    if record.counts.failed == 0 {
        OutputFormatter::success("Redo complete.");
    } else {
        OutputFormatter::warning("Some files could not be re-applied. Run redo again to retry.");
    }
    Ok(())
}

/// Rolls the directory back to the state right after the given record.
fn cmd_restore(engine: &Engine, dir: &Path, id: &str) -> Result<(), String> {
    let record_id = resolve_record_id(engine, dir, id)?;

    let reporter = ProgressBarReporter::new();
    let report = engine
        .restore_to(dir, record_id, &reporter, &CancelToken::new())
        .map_err(|e| format!("Error restoring: {}", e))?;

    if report.completed() {
        OutputFormatter::success(&format!(
            "Restored. {} operation(s) reversed.",
            report.reversed.len()
        ));
    } else {
        OutputFormatter::warning(&format!(
            "Restore halted after reversing {} operation(s). Fix the issues and run restore again.",
            report.reversed.len()
        ));
    }
    Ok(())
}

/// Vaults every duplicate file, keeping the first of each content group.
fn cmd_dedupe(engine: &Engine, dir: &Path) -> Result<(), String> {
    OutputFormatter::info(&format!("Looking for duplicates in: {}", dir.display()));

    let reporter = ProgressBarReporter::new();
    let summary = engine
        .dedupe(dir, &reporter, &CancelToken::new())
        .map_err(|e| format!("Error deduplicating: {}", e))?;

    if summary.groups == 0 {
        OutputFormatter::success("No duplicates found.");
        return Ok(());
    }
    for record in &summary.records {
        if let Some(first) = record.moves.first() {
            println!(
                " - kept one copy, vaulted {} ({})",
                first
                    .original_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| first.original_path.display().to_string()),
                output::human_size(record.counts.bytes_freed)
            );
        }
    }
    OutputFormatter::success(&format!(
        "Vaulted {} duplicate file(s) ({}). Use 'refolder undo' to bring a group back, or 'refolder purge' to reclaim the space.",
        summary.deleted,
        output::human_size(summary.bytes_freed)
    ));
    Ok(())
}

/// Clears the ledger and permanently deletes vaulted files.
fn cmd_purge(engine: &Engine, dir: &Path, yes: bool) -> Result<(), String> {
    if !yes && !confirm("This clears the history and permanently removes vaulted files. Continue?")?
    {
        OutputFormatter::plain("Aborted.");
        return Ok(());
    }

    let (files, bytes) = engine
        .purge(dir)
        .map_err(|e| format!("Error purging: {}", e))?;
    OutputFormatter::success(&format!(
        "Purged {} vaulted file(s), {} reclaimed. History cleared.",
        files,
        output::human_size(bytes)
    ));
    Ok(())
}

/// Resolves a full record id or a unique id prefix against the history.
fn resolve_record_id(engine: &Engine, dir: &Path, prefix: &str) -> Result<Uuid, String> {
    if let Ok(id) = Uuid::parse_str(prefix) {
        return Ok(id);
    }

    let records = engine
        .history(dir)
        .map_err(|e| format!("Error reading history: {}", e))?;
    let matches: Vec<Uuid> = records
        .iter()
        .map(|r| r.id)
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("No record matches id '{}'", prefix)),
        many => Err(format!(
            "Id '{}' is ambiguous ({} records match)",
            prefix,
            many.len()
        )),
    }
}

fn resolve_against(dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}

fn confirm(question: &str) -> Result<bool, String> {
    print!("{} [y/N] ", question);
    io::stdout()
        .flush()
        .map_err(|e| format!("Error writing prompt: {}", e))?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .map_err(|e| format!("Error reading answer: {}", e))?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
