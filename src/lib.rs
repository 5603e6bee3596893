//! # edgequake-batch2md
//!
//! Idempotent, resumable batch conversion of a document collection to
//! Markdown through a remote OCR service.
//!
//! ## Why this crate?
//!
//! Converting tens of thousands of scanned PDFs is slow, costs money per
//! page, and fails transiently all the time. Runs get interrupted, and the
//! collection keeps changing underneath. This crate makes every invocation
//! safe to repeat: unchanged documents are never converted twice, progress
//! survives a kill at any point, one bad document never stalls the rest, and
//! a wall-clock budget lets an arbitrarily large backlog be worked off in
//! bounded chunks.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input root
//!  │
//!  ├─ 1. Discover   walk the tree, keep accepted extensions, sort
//!  ├─ 2. Plan       fingerprint (size + mtime), skip if the artifact header
//!  │                or the journal already covers this version
//!  ├─ 3. Schedule   ≤ W workers, stop dispatching once the budget is spent
//!  ├─ 4. Convert    page by page, retry with exponential backoff + jitter,
//!  │                write the artifact whole or not at all
//!  ├─ 5. Journal    one JSON line per outcome, appended as it happens
//!  └─ 6. Snapshot   latest record per item → Parquet
//! ```
//!
//! A separate indexing path lists remote partitions (`rclone lsjson`),
//! journals one status record per partition, and renders a coverage report
//! against the partition roster.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_batch2md::{run_batch, BatchConfig, OcrService, ServiceConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = OcrService::new(
//!         ServiceConfig::builder()
//!             .endpoint("https://api.opentyphoon.ai/v1")
//!             .api_key(std::env::var("BATCH2MD_API_KEY")?)
//!             .build()?,
//!     )?;
//!     let config = BatchConfig::builder()
//!         .input_root("data/raw")
//!         .concurrency(3)
//!         .build()?;
//!
//!     let summary = run_batch(&config, &service, &CancellationToken::new()).await?;
//!     eprintln!("{} converted, {} failed, {} deferred",
//!         summary.converted, summary.failed, summary.deferred);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `batch2md` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod batch;
pub mod config;
pub mod converter;
pub mod error;
pub mod fingerprint;
pub mod journal;
pub mod listing;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod roster;
pub mod scheduler;
pub mod snapshot;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{read_header, ArtifactHeader};
pub use batch::{plan_only, run_batch, RunSummary};
pub use config::{BatchConfig, BatchConfigBuilder, RetryPolicy, ServiceConfig, ServiceConfigBuilder};
pub use converter::{OcrService, PageConverter};
pub use error::{AttemptError, BatchError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use journal::{Journal, JournalRecord, JsonlLog, Status};
pub use listing::{index_roster, ListingTool, PartitionListing, PartitionStatus, RemoteItem};
pub use planner::{Conflict, InputItem, Plan, SkipReason, Task};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{build_report, write_report, ReportRow};
pub use roster::{load_roster, RosterEntry};
pub use snapshot::{rebuild_snapshot, SnapshotSummary};
pub use worker::{ItemOutcome, ItemResult};
