//! Error types for the edgequake-batch2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`]: **Fatal**: the run cannot proceed (bad configuration,
//!   journal not writable, user interrupt). Returned as `Err(BatchError)`
//!   from the top-level entry points and stops the whole invocation.
//!
//! * [`AttemptError`]: **Transient**: one conversion attempt of one page
//!   failed. The worker retries it with backoff; once retries are exhausted
//!   its message becomes the `error` field of the item's journal record and
//!   the run carries on with the next item.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-batch2md library.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The input root does not exist or is not a directory.
    #[error("Input root not found: '{path}'\nCheck the path exists and is a directory.")]
    InputRootMissing { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Generic filesystem failure outside the journal.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appending to (or opening) an append-only log failed.
    #[error("Failed to write journal '{path}': {source}")]
    JournalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialised to JSON.
    #[error("Failed to serialise journal record: {0}")]
    Serialise(#[from] serde_json::Error),

    /// The Parquet snapshot could not be built or written.
    #[error("Failed to build snapshot '{path}': {detail}")]
    Snapshot { path: PathBuf, detail: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The roster file is missing, has no header, or holds a bad row.
    #[error("Invalid roster '{path}': {detail}")]
    Roster { path: PathBuf, detail: String },

    /// The remote listing tool could not be started at all.
    #[error("Failed to launch listing tool '{program}': {source}\nIs it installed and on PATH?")]
    ListingSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a report file failed.
    #[error("Failed to write report '{path}': {detail}")]
    Report { path: PathBuf, detail: String },

    // ── Control flow ──────────────────────────────────────────────────────
    /// The user interrupted the run. In-flight items are not journaled.
    #[error("Run cancelled by user interrupt")]
    Cancelled,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BatchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failed attempt to convert a single page.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptError {
    /// Page rasterisation failed.
    #[error("rasterisation failed for page {page}: {detail}")]
    Render { page: usize, detail: String },

    /// The OCR service answered with a non-success HTTP status.
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Network/transport failure talking to the service.
    #[error("request to service failed: {0}")]
    Transport(String),

    /// The service call exceeded the per-call timeout.
    #[error("service call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered 2xx but the body was not what we expected.
    #[error("malformed service response: {0}")]
    MalformedResponse(String),
}
