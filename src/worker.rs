//! Conversion worker: turn one task into one artifact, or one error.
//!
//! Pages are converted strictly in order. Each page gets
//! `retry.max_retries + 1` attempts with exponential backoff and jitter
//! between them. If any page exhausts its attempts the whole item fails and
//! nothing is written: artifacts are all-or-nothing.
//!
//! A cancellation (user interrupt) aborts the current attempt or backoff
//! sleep immediately and surfaces as [`BatchError::Cancelled`]; it is never
//! retried and never turned into an item error.

use crate::artifact::{render_artifact, write_atomic, ArtifactHeader};
use crate::config::RetryPolicy;
use crate::converter::PageConverter;
use crate::error::{AttemptError, BatchError};
use crate::fingerprint::Fingerprint;
use crate::planner::Task;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one item ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Converted { pages: usize, duration: Duration },
    Failed { message: String, duration: Duration },
    Skipped,
}

/// The result record for one item, before it is journaled.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub rel_path: String,
    pub fingerprint: Fingerprint,
    pub artifact_path: PathBuf,
    pub outcome: ItemOutcome,
}

/// Convert one task end to end.
///
/// Returns `Ok` for both converted and failed items; `Err` only for
/// cancellation.
pub async fn convert_item(
    task: Task,
    converter: &dyn PageConverter,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ItemResult, BatchError> {
    let start = Instant::now();
    let rel = task.item.rel_path.as_str();

    let total = match converter.page_count(&task.item.path).await {
        Some(n) if n > 0 => n,
        _ => {
            debug!("{}: page count unavailable, assuming 1", rel);
            1
        }
    };
    info!("{}: converting {} page(s)", rel, total);

    let mut pages = Vec::with_capacity(total);
    for page in 1..=total {
        match convert_page_with_retry(converter, &task.item.path, page, retry, cancel).await? {
            Ok(markdown) => pages.push(markdown),
            Err(e) => {
                let message = format!("page {page}/{total}: {e}");
                warn!("{}: failed: {}", rel, message);
                return Ok(finish(
                    &task,
                    ItemOutcome::Failed {
                        message,
                        duration: start.elapsed(),
                    },
                ));
            }
        }
    }

    let header = ArtifactHeader {
        rel_path: task.item.rel_path.clone(),
        fingerprint: task.fingerprint.clone(),
        model: converter.model().to_string(),
    };
    let body = render_artifact(&header, &pages);
    if let Err(e) = write_artifact(&task.artifact_path, body).await {
        warn!("{}: artifact write failed: {}", rel, e);
        return Ok(finish(
            &task,
            ItemOutcome::Failed {
                message: e.to_string(),
                duration: start.elapsed(),
            },
        ));
    }

    let duration = start.elapsed();
    info!("{}: {} page(s) in {:.1}s", rel, total, duration.as_secs_f64());
    Ok(finish(
        &task,
        ItemOutcome::Converted {
            pages: total,
            duration,
        },
    ))
}

fn finish(task: &Task, outcome: ItemOutcome) -> ItemResult {
    ItemResult {
        rel_path: task.item.rel_path.clone(),
        fingerprint: task.fingerprint.clone(),
        artifact_path: task.artifact_path.clone(),
        outcome,
    }
}

async fn write_artifact(path: &Path, body: String) -> Result<(), BatchError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &body))
        .await
        .map_err(|e| BatchError::Internal(format!("artifact write task panicked: {e}")))?
}

/// Attempt one page until it succeeds or attempts run out.
///
/// Outer `Err` = cancelled; inner `Err` = the last attempt's error.
async fn convert_page_with_retry(
    converter: &dyn PageConverter,
    path: &Path,
    page: usize,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Result<String, AttemptError>, BatchError> {
    let attempts = retry.attempts();
    let mut last_err = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = retry.delay_with_jitter(attempt - 1);
            warn!(
                "{}: page {} retry {}/{} after {:.2}s",
                path.display(),
                page,
                attempt,
                retry.max_retries,
                backoff.as_secs_f64()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BatchError::Cancelled),
                _ = sleep(backoff) => {}
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BatchError::Cancelled),
            r = converter.convert_page(path, page) => r,
        };

        match result {
            Ok(markdown) => return Ok(Ok(markdown)),
            Err(e) => {
                debug!("{}: page {} attempt {} failed: {}", path.display(), page, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Ok(Err(last_err.unwrap_or_else(|| {
        AttemptError::Transport("no attempt was made".to_string())
    })))
}
