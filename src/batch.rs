//! Top-level entry points: one full run, or a dry-run plan.
//!
//! A run is one bounded invocation against a possibly larger backlog. It
//! plans from the filesystem and the journal, journals the skips, converts
//! what remains until the budget (or item cap) is reached, and finally
//! rebuilds the snapshot. Whatever it leaves undone is picked up by the next
//! invocation because undispatched items have no journal record.

use crate::config::BatchConfig;
use crate::converter::PageConverter;
use crate::error::BatchError;
use crate::journal::{latest_by_key, Journal, JournalRecord, LatestView};
use crate::planner::{discover_inputs, plan, Plan};
use crate::scheduler::run_tasks;
use crate::snapshot::{rebuild_snapshot, SnapshotSummary};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Accepted documents found under the input root.
    pub discovered: usize,
    /// Items already up to date (journaled as `skipped`).
    pub skipped: usize,
    /// Items converted in this run.
    pub converted: usize,
    /// Items that failed in this run, artifact path conflicts included.
    pub failed: usize,
    /// Items left for a later run (budget or item cap).
    pub deferred: usize,
    /// Whether the wall-clock budget ended dispatching.
    pub budget_exhausted: bool,
    /// Wall-clock duration of the whole run.
    pub elapsed: Duration,
    /// Row counts of the rebuilt snapshot.
    pub snapshot: SnapshotSummary,
}

/// Compute the plan without writing anything.
pub async fn plan_only(config: &BatchConfig) -> Result<Plan, BatchError> {
    let view = load_view(config).await?;
    plan_blocking(config, view).await
}

/// Run one invocation end to end.
///
/// # Errors
/// Returns `Err(BatchError)` only for fatal conditions: missing input root,
/// unreadable journal, stat failure while planning, journal append failure,
/// or [`BatchError::Cancelled`]. Individual item failures are journaled and
/// counted in [`RunSummary::failed`].
pub async fn run_batch(
    config: &BatchConfig,
    converter: &dyn PageConverter,
    cancel: &CancellationToken,
) -> Result<RunSummary, BatchError> {
    let started = Instant::now();
    info!(
        "Starting batch run: {} → {} (W={}, budget {}s)",
        config.input_root.display(),
        config.output_root.display(),
        config.concurrency,
        config.budget.as_secs()
    );

    // ── Step 1: Plan ─────────────────────────────────────────────────────
    let view = load_view(config).await?;
    let Plan {
        mut tasks,
        skipped,
        conflicts,
    } = plan_blocking(config, view).await?;
    let discovered = tasks.len() + skipped.len() + conflicts.len();

    // ── Step 2: Journal the skips and conflicts ──────────────────────────
    let journal = Journal::open(&config.journal_path).await?;
    let settled_records: Vec<JournalRecord> = skipped
        .iter()
        .map(|s| s.to_result())
        .chain(conflicts.iter().map(|c| c.to_result()))
        .map(|r| JournalRecord::from_result(&r))
        .collect();
    journal.append_all(&settled_records).await?;

    // ── Step 3: Apply the per-invocation cap ─────────────────────────────
    let mut capped = 0;
    if let Some(max) = config.max_items {
        if tasks.len() > max {
            capped = tasks.len() - max;
            tasks.truncate(max);
            info!("Item cap {}: deferring {} item(s) to a later run", max, capped);
        }
    }

    if let Some(cb) = config.progress_callback.as_deref() {
        cb.on_run_start(tasks.len(), skipped.len());
    }

    // ── Step 4: Convert ──────────────────────────────────────────────────
    let scheduled = run_tasks(tasks, converter, &journal, config, cancel, started).await?;

    let failed = scheduled.failed + conflicts.len();
    if let Some(cb) = config.progress_callback.as_deref() {
        cb.on_run_complete(scheduled.converted, failed);
    }

    // ── Step 5: Snapshot ─────────────────────────────────────────────────
    let snapshot = rebuild_snapshot(&config.journal_path, &config.snapshot_path).await?;

    let summary = RunSummary {
        discovered,
        skipped: skipped.len(),
        converted: scheduled.converted,
        failed,
        deferred: scheduled.deferred + capped,
        budget_exhausted: scheduled.budget_exhausted,
        elapsed: started.elapsed(),
        snapshot,
    };
    info!(
        "Run finished in {:.1}s: {} converted, {} failed, {} skipped, {} deferred",
        summary.elapsed.as_secs_f64(),
        summary.converted,
        summary.failed,
        summary.skipped,
        summary.deferred
    );
    Ok(summary)
}

async fn load_view(config: &BatchConfig) -> Result<LatestView, BatchError> {
    let records = Journal::load(&config.journal_path).await?;
    Ok(latest_by_key(records))
}

async fn plan_blocking(config: &BatchConfig, view: LatestView) -> Result<Plan, BatchError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let items = discover_inputs(&config)?;
        plan(&items, &view, &config)
    })
    .await
    .map_err(|e| BatchError::Internal(format!("planning task panicked: {e}")))?
}
