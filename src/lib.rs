//! refolder - Reversible file organization with a durable history
//!
//! This library applies proposed reorganization plans to real directories,
//! records every file move in a per-directory ledger, and can undo, redo, and
//! restore to any point of that history. Deletions are staged in a vault
//! instead of destroying data, and partially failed or cancelled operations
//! stay on the ledger where a retry can finish them.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod ledger;
pub mod mover;
pub mod output;
pub mod plan;
pub mod progress;
pub mod record;
pub mod runner;
pub mod vault;

pub use config::{BackupPolicy, CompiledFilters, ConfigError, EngineConfig};
pub use engine::{DedupeSummary, Engine};
pub use error::{EngineError, Result};
pub use history::RestoreReport;
pub use ledger::{Ledger, OperationCounts, OperationKind, OperationOutcome, OperationRecord};
pub use plan::{Plan, PlanNode, UNASSIGNED};
pub use progress::{CancelToken, ProgressReporter, SilentReporter};
pub use record::FileRecord;
pub use runner::BatchSpec;
pub use vault::RestorableItem;

pub use cli::{Cli, run_cli};
