//! Bounded-concurrency dispatch with a wall-clock budget.
//!
//! At most `concurrency` workers run at once. Each finished result is
//! appended to the journal before the freed slot is refilled, so nothing is
//! buffered beyond the in-flight set and every completed item is durable
//! before the process may exit.
//!
//! The budget is a cooperative check made before each dispatch: once
//! elapsed time reaches it, no new item starts, in-flight items run to
//! completion, and the run ends normally. Undispatched tasks have no journal
//! record and are replanned by the next invocation.

use crate::config::BatchConfig;
use crate::converter::PageConverter;
use crate::error::BatchError;
use crate::journal::{Journal, JournalRecord};
use crate::planner::Task;
use crate::worker::{convert_item, ItemOutcome, ItemResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counts for one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleSummary {
    /// Items dispatched to workers.
    pub dispatched: usize,
    /// Items whose artifact was written.
    pub converted: usize,
    /// Items that failed after exhausting retries.
    pub failed: usize,
    /// Tasks left for a later invocation because the budget ran out.
    pub deferred: usize,
    /// Whether the wall-clock budget stopped dispatching.
    pub budget_exhausted: bool,
    /// Wall-clock time spent in the scheduler.
    pub elapsed: Duration,
}

/// Run `tasks` through workers, journaling each result as it completes.
///
/// `started` is the run's start instant; time spent planning counts against
/// the budget.
pub async fn run_tasks(
    tasks: Vec<Task>,
    converter: &dyn PageConverter,
    journal: &Journal,
    config: &BatchConfig,
    cancel: &CancellationToken,
    started: Instant,
) -> Result<ScheduleSummary, BatchError> {
    let mut summary = ScheduleSummary::default();
    let mut pending = tasks.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let progress = config.progress_callback.as_deref();

    loop {
        if cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }

        while !summary.budget_exhausted && in_flight.len() < config.concurrency {
            if started.elapsed() >= config.budget {
                summary.budget_exhausted = true;
                let remaining = pending.len();
                info!(
                    "Reached wall-clock budget of {}s; stopping dispatch with {} item(s) pending",
                    config.budget.as_secs(),
                    remaining
                );
                if let Some(cb) = progress {
                    cb.on_budget_exhausted(remaining);
                }
                break;
            }
            let Some(task) = pending.next() else { break };
            if let Some(cb) = progress {
                cb.on_item_start(&task.item.rel_path);
            }
            summary.dispatched += 1;
            in_flight.push(convert_item(task, converter, &config.retry, cancel));
        }

        let Some(result) = in_flight.next().await else {
            break;
        };
        let result = result?;
        journal.append(&JournalRecord::from_result(&result)).await?;
        tally(&mut summary, &result, config);
    }

    summary.deferred = pending.len();
    summary.elapsed = started.elapsed();
    Ok(summary)
}

fn tally(summary: &mut ScheduleSummary, result: &ItemResult, config: &BatchConfig) {
    let progress = config.progress_callback.as_deref();
    match &result.outcome {
        ItemOutcome::Converted { pages, .. } => {
            summary.converted += 1;
            if let Some(cb) = progress {
                cb.on_item_complete(&result.rel_path, *pages);
            }
        }
        ItemOutcome::Failed { message, .. } => {
            summary.failed += 1;
            if let Some(cb) = progress {
                cb.on_item_error(&result.rel_path, message);
            }
        }
        ItemOutcome::Skipped => {}
    }
}
