//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored
//! output, progress tracking, and history tables. This module abstracts away
//! output details, making it easy to change formatting globally.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

use crate::ledger::{OperationCounts, OperationKind, OperationOutcome, OperationRecord};
use crate::progress::ProgressReporter;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars for operations
/// - History tables and operation summaries
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    ///
    /// # Example
    ///
    /// ```no_run
    /// use refolder::output::OutputFormatter;
    /// OutputFormatter::success("Plan applied successfully!");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    ///
    /// # Example
    ///
    /// ```no_run
    /// use refolder::output::OutputFormatter;
    /// OutputFormatter::error("Failed to apply plan");
    /// ```
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    ///
    /// # Example
    ///
    /// ```no_run
    /// use refolder::output::OutputFormatter;
    /// OutputFormatter::warning("Some files could not be restored");
    /// ```
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Prints a regular message without styling.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    ///
    /// # Arguments
    ///
    /// * `header` - The header text
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates and returns a progress bar for file operations.
    ///
    /// # Arguments
    ///
    /// * `total` - Total number of items to process
    ///
    /// # Returns
    ///
    /// A configured `ProgressBar` ready for use.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use refolder::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1); // Increment by 1
    /// pb.finish_with_message("Completed!");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("█▓░"),
        );
        pb
    }

    /// Prints the history table for a directory, newest record first.
    ///
    /// # Arguments
    ///
    /// * `records` - Records to render, in display order
    pub fn history_table(records: &[OperationRecord]) {
        Self::header("HISTORY");
        if records.is_empty() {
            println!("{}", "No operations recorded.".dimmed());
            return;
        }

        println!(
            "{:<10} {:<17} {:<11} {:<11} {}",
            "ID".bold(),
            "When".bold(),
            "Kind".bold(),
            "Outcome".bold(),
            "Summary".bold()
        );
        println!("{}", "-".repeat(72));
        for record in records {
            let marker = if record.reversed {
                " (undone)".yellow().to_string()
            } else {
                String::new()
            };
            println!(
                "{:<10} {:<17} {:<11} {:<11} {}{}",
                short_id(record),
                record.timestamp.format("%Y-%m-%d %H:%M"),
                kind_label(record.kind),
                outcome_label(record.outcome),
                describe_counts(&record.counts),
                marker
            );
        }
    }

    /// Prints a summary table for one finished operation.
    ///
    /// # Arguments
    ///
    /// * `record` - The record to summarize
    pub fn operation_summary(record: &OperationRecord) {
        Self::header("SUMMARY");

        let counts = &record.counts;
        let rows: Vec<(&str, String)> = [
            ("Moved", counts.moved.to_string()),
            ("Skipped", counts.skipped.to_string()),
            ("Failed", counts.failed.to_string()),
            ("Unassigned", counts.unassigned.to_string()),
            ("Folders created", counts.folders_created.to_string()),
            ("Deleted", counts.deleted.to_string()),
            ("Space freed", human_size(counts.bytes_freed)),
        ]
        .into_iter()
        .filter(|(_, value)| value != "0" && value != "0 B")
        .collect();

        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(8);
        for (name, value) in &rows {
            println!("{:<width$} | {}", name, value.green(), width = width);
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {}",
            "Outcome".bold(),
            outcome_label(record.outcome),
            width = width
        );
        for note in &record.diagnostics {
            println!("{}", note.dimmed());
        }
    }

    /// Prints a dry-run notice message.
    ///
    /// # Arguments
    ///
    /// * `message` - The dry-run message
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}

/// First hyphen group of the record id, enough to name it on the CLI.
pub fn short_id(record: &OperationRecord) -> String {
    record.id.to_string().chars().take(8).collect()
}

/// One-line counter digest, zero counters omitted.
pub fn describe_counts(counts: &OperationCounts) -> String {
    let mut parts = Vec::new();
    if counts.moved > 0 {
        parts.push(format!("{} moved", counts.moved));
    }
    if counts.deleted > 0 {
        parts.push(format!("{} deleted ({})", counts.deleted, human_size(counts.bytes_freed)));
    }
    if counts.skipped > 0 {
        parts.push(format!("{} skipped", counts.skipped));
    }
    if counts.failed > 0 {
        parts.push(format!("{} failed", counts.failed));
    }
    if counts.unassigned > 0 {
        parts.push(format!("{} unassigned", counts.unassigned));
    }
    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        parts.join(", ")
    }
}

/// Bytes rendered at a human scale, one decimal above bytes.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Apply => "apply",
        OperationKind::LearningsApply => "learnings",
        OperationKind::Cleanup => "cleanup",
        OperationKind::Undo => "undo",
        OperationKind::Redo => "redo",
    }
}

fn outcome_label(outcome: OperationOutcome) -> ColoredString {
    match outcome {
        OperationOutcome::InProgress => "in-progress".yellow(),
        OperationOutcome::Succeeded => "ok".green(),
        OperationOutcome::Failed => "failed".red(),
        OperationOutcome::Cancelled => "cancelled".yellow(),
        OperationOutcome::Skipped => "dry-run".dimmed(),
        OperationOutcome::Reversed => "reversal".cyan(),
        OperationOutcome::BulkCleanup => "cleanup".magenta(),
    }
}

/// Bridges engine progress callbacks onto an indicatif bar.
pub struct ProgressBarReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressBarReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl Default for ProgressBarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn on_batch_start(&self, total: usize) {
        let bar = OutputFormatter::create_progress_bar(total as u64);
        *self.bar.lock().unwrap_or_else(|e| e.into_inner()) = Some(bar);
    }

    fn on_entry_done(&self, done: usize, _total: usize, current: &str) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            bar.set_position(done as u64);
            bar.set_message(current.to_string());
        }
    }

    fn on_batch_complete(&self, moved: usize, failed: usize) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).take() {
            bar.finish_with_message(format!("{moved} moved, {failed} failed"));
        }
    }
}
