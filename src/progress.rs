//! Progress-callback trait for per-item batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the scheduler dispatches and completes items. The CLI uses it to drive
//! an `indicatif` progress bar; a service could forward the same events to a
//! channel or a dashboard.
//!
//! # Example
//!
//! ```rust
//! use edgequake_batch2md::{BatchConfig, BatchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, rel_path: &str, pages: usize) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{n} {rel_path} ({pages} pages)");
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .input_root(".")
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the scheduler as it works through the task list.
///
/// Implementations must be `Send + Sync`: item events arrive from concurrently
/// running workers. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after planning, with the number of items that will be
    /// dispatched this run (at most) and the number skipped as up to date.
    fn on_run_start(&self, to_process: usize, skipped: usize) {
        let _ = (to_process, skipped);
    }

    /// Called when a worker picks up an item.
    fn on_item_start(&self, rel_path: &str) {
        let _ = rel_path;
    }

    /// Called when an item converted and its artifact was written.
    fn on_item_complete(&self, rel_path: &str, pages: usize) {
        let _ = (rel_path, pages);
    }

    /// Called when an item failed after exhausting retries.
    fn on_item_error(&self, rel_path: &str, error: &str) {
        let _ = (rel_path, error);
    }

    /// Called once when the wall-clock budget stops further dispatching.
    fn on_budget_exhausted(&self, remaining: usize) {
        let _ = remaining;
    }

    /// Called once after the last in-flight item finished.
    fn on_run_complete(&self, converted: usize, failed: usize) {
        let _ = (converted, failed);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
