//! Progress reporting and cooperative cancellation.
//!
//! Engine operations are long-running and I/O bound; callers run them on a
//! worker thread and observe them through these two small types instead of
//! blocking a UI thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for observing a running batch operation.
///
/// The CLI implements this with indicatif; embedders implement it with
/// whatever event channel their UI uses. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    /// A batch is starting with `total` file entries.
    fn on_batch_start(&self, _total: usize) {}
    /// One entry finished. `done` counts processed entries; the fraction
    /// `done as f64 / total as f64` is the batch's fractional progress.
    fn on_entry_done(&self, _done: usize, _total: usize, _current: &str) {}
    /// The batch finished (successfully, partially, or cancelled).
    fn on_batch_complete(&self, _moved: usize, _failed: usize) {}
}

/// No-op reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Cooperative cancellation flag shared between a caller and a running
/// operation. Checked only between files, never mid-move, so a file is
/// never left half-moved.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The running batch stops before the next file
    /// and seals a partial `cancelled` record.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
