//! Append-only, line-delimited JSON logs.
//!
//! The conversion journal is the single source of truth for what has been
//! attempted and how it ended. Every attempt produces exactly one line; lines
//! are never rewritten or deleted. Multiple records may exist for the same
//! `(rel_path, fingerprint)` key across runs; the last one in file order wins.
//!
//! [`JsonlLog`] is generic so the partition status log written by the remote
//! listing step shares the same append discipline.

use crate::error::BatchError;
use crate::fingerprint::Fingerprint;
use crate::worker::{ItemOutcome, ItemResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Outcome recorded for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Skipped,
}

impl Status {
    /// `ok` and `skipped` both mean a verified artifact existed at the time.
    pub fn is_settled(self) -> bool {
        matches!(self, Status::Ok | Status::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::Skipped => "skipped",
        }
    }
}

/// One immutable journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub rel_path: String,
    pub fingerprint: Fingerprint,
    pub status: Status,
    pub artifact_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl JournalRecord {
    /// Journal key: one logical item version.
    pub fn key(&self) -> (String, Fingerprint) {
        (self.rel_path.clone(), self.fingerprint.clone())
    }

    /// Build the record for an item result, stamped now.
    pub fn from_result(result: &ItemResult) -> Self {
        let (status, error, page_count, duration_secs) = match &result.outcome {
            ItemOutcome::Converted { pages, duration } => {
                (Status::Ok, None, Some(*pages), Some(round_secs(duration.as_secs_f64())))
            }
            ItemOutcome::Failed { message, duration } => (
                Status::Error,
                Some(message.clone()),
                None,
                Some(round_secs(duration.as_secs_f64())),
            ),
            ItemOutcome::Skipped => (Status::Skipped, None, None, None),
        };
        JournalRecord {
            rel_path: result.rel_path.clone(),
            fingerprint: result.fingerprint.clone(),
            status,
            artifact_path: result.artifact_path.to_string_lossy().into_owned(),
            error,
            page_count,
            duration_secs,
            timestamp: Utc::now(),
        }
    }
}

fn round_secs(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

/// Latest-record-per-key view of a journal.
pub type LatestView = HashMap<(String, Fingerprint), JournalRecord>;

/// Fold records (in file order) into the latest record per key.
pub fn latest_by_key(records: impl IntoIterator<Item = JournalRecord>) -> LatestView {
    let mut view = LatestView::new();
    for record in records {
        view.insert(record.key(), record);
    }
    view
}

/// An append-only JSONL file of `T` records.
///
/// Appends are serialised through an async mutex and each record is written
/// with a single `write_all` of one complete line on an `O_APPEND` handle, so
/// concurrent writers never interleave partial lines.
pub struct JsonlLog<T> {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    _record: PhantomData<fn(T)>,
}

impl<T> std::fmt::Debug for JsonlLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlLog").field("path", &self.path).finish()
    }
}

impl<T: Serialize + DeserializeOwned> JsonlLog<T> {
    /// Open (creating if needed) the log for appending.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BatchError::JournalWrite {
                    path: path.clone(),
                    source: e,
                })?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| BatchError::JournalWrite {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record as one line.
    pub async fn append(&self, record: &T) -> Result<(), BatchError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.write_durably(line.as_bytes()).await
    }

    /// Append several records, in order, with a single write and sync.
    pub async fn append_all<'a, I>(&self, records: I) -> Result<(), BatchError>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.write_durably(buf.as_bytes()).await
    }

    async fn write_durably(&self, bytes: &[u8]) -> Result<(), BatchError> {
        let mut file = self.file.lock().await;
        let write = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_data().await
        };
        write.await.map_err(|e| BatchError::JournalWrite {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Read every parseable record in file order.
    ///
    /// A missing file is an empty log. Blank lines are ignored; lines that do
    /// not parse (for example a torn final line after a power loss) are
    /// skipped with a warning.
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<T>, BatchError> {
        let path = path.as_ref();
        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BatchError::io(path, e)),
        };
        Ok(parse_lines(path, &text))
    }
}

fn parse_lines<T: DeserializeOwned>(path: &Path, text: &str) -> Vec<T> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("{}:{}: skipping unreadable line: {}", path.display(), n + 1, e);
                None
            }
        })
        .collect()
}

/// The conversion journal.
pub type Journal = JsonlLog<JournalRecord>;
