//! Remote-storage listing: one structured status record per partition.
//!
//! The listing tool (`rclone lsjson` by default) enumerates every file under
//! a partition's remote folder. Its output is never trusted blindly: a
//! nonzero exit, an empty stdout, and stdout that is not a JSON array are
//! three distinct failures, each recorded as a [`PartitionStatus`] with
//! `ok = false` and an error string naming which one happened. A failed
//! listing is never reported as an empty partition.

use crate::error::BatchError;
use crate::journal::JsonlLog;
use crate::roster::RosterEntry;
use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One entry of `lsjson` output. Unknown keys (`Metadata`, `Hashes`, …) are
/// kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteItem {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A listed item annotated with where and when it was listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedItem {
    #[serde(flatten)]
    pub item: RemoteItem,
    pub partition: String,
    pub folder_id: String,
    #[serde(default)]
    pub indexed_ts_utc: Option<DateTime<Utc>>,
}

/// Rolled-up result of listing one partition.
///
/// Only `partition` and `ok` are required when reading a status log; older
/// logs may lack the timestamp or the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStatus {
    #[serde(default)]
    pub ts_utc: Option<DateTime<Utc>>,
    #[serde(alias = "province")]
    pub partition: String,
    #[serde(default)]
    pub folder_id: String,
    pub ok: bool,
    #[serde(default, alias = "rclone_returncode")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub n_items: u64,
    #[serde(default)]
    pub n_dirs: u64,
    #[serde(default)]
    pub n_files: u64,
    #[serde(default, alias = "n_pdfs")]
    pub n_documents: u64,
    #[serde(default)]
    pub latest_modtime: Option<String>,
}

impl PartitionStatus {
    fn failed(
        partition: &str,
        folder_id: &str,
        ts: DateTime<Utc>,
        exit_code: Option<i32>,
        error: String,
    ) -> Self {
        PartitionStatus {
            ts_utc: Some(ts),
            partition: partition.to_string(),
            folder_id: folder_id.to_string(),
            ok: false,
            exit_code,
            error: Some(error),
            n_items: 0,
            n_dirs: 0,
            n_files: 0,
            n_documents: 0,
            latest_modtime: None,
        }
    }
}

/// Status plus the items of one listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionListing {
    pub status: PartitionStatus,
    pub items: Vec<RemoteItem>,
}

impl PartitionListing {
    /// Items annotated with partition, folder id and listing time.
    pub fn indexed_items(&self) -> Vec<IndexedItem> {
        self.items
            .iter()
            .map(|item| IndexedItem {
                item: item.clone(),
                partition: self.status.partition.clone(),
                folder_id: self.status.folder_id.clone(),
                indexed_ts_utc: self.status.ts_utc,
            })
            .collect()
    }
}

/// Captured result of one listing process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Turn a finished listing process into a status record and item list.
///
/// `document_extensions` (lower-case, no dot) decide which files count
/// towards `n_documents`.
pub fn summarize_listing(
    partition: &str,
    folder_id: &str,
    ts: DateTime<Utc>,
    output: &ProcessOutput,
    document_extensions: &[String],
) -> PartitionListing {
    let stdout = output.stdout.trim();
    let stderr = output.stderr.trim();
    let fail = |error: String| PartitionListing {
        status: PartitionStatus::failed(partition, folder_id, ts, output.exit_code, error),
        items: Vec::new(),
    };

    if !output.success {
        return fail(if stderr.is_empty() {
            match output.exit_code {
                Some(code) => format!("process failed: listing tool exited with code {code}"),
                None => "process failed: listing tool was terminated by a signal".to_string(),
            }
        } else {
            format!("process failed: {stderr}")
        });
    }
    if stdout.is_empty() {
        return fail("empty output: listing tool produced no JSON".to_string());
    }

    let value: serde_json::Value = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => return fail(format!("malformed output: json parse error: {e}")),
    };
    let serde_json::Value::Array(entries) = value else {
        return fail("malformed output: not a JSON array".to_string());
    };
    let items: Vec<RemoteItem> = match entries.into_iter().map(serde_json::from_value).collect() {
        Ok(items) => items,
        Err(e) => return fail(format!("malformed output: unexpected entry: {e}")),
    };

    let mut status = PartitionStatus {
        ts_utc: Some(ts),
        partition: partition.to_string(),
        folder_id: folder_id.to_string(),
        ok: true,
        exit_code: output.exit_code,
        error: None,
        n_items: items.len() as u64,
        n_dirs: 0,
        n_files: 0,
        n_documents: 0,
        latest_modtime: None,
    };
    for item in &items {
        if item.is_dir {
            status.n_dirs += 1;
        } else {
            status.n_files += 1;
            if is_document(&item.path, document_extensions) {
                status.n_documents += 1;
            }
        }
        if let Some(mt) = item.mod_time.as_deref().filter(|m| !m.is_empty()) {
            if status.latest_modtime.as_deref().is_none_or(|cur| mt > cur) {
                status.latest_modtime = Some(mt.to_string());
            }
        }
    }

    PartitionListing { status, items }
}

fn is_document(path: &str, extensions: &[String]) -> bool {
    let lower = path.to_lowercase();
    extensions
        .iter()
        .any(|ext| lower.rsplit_once('.').is_some_and(|(_, e)| e == ext))
}

static RE_FOLDER_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/folders/([A-Za-z0-9_-]+)").unwrap());
static RE_ID_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").unwrap());
static RE_BARE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{10,}$").unwrap());

/// Extract a remote folder id from a roster link.
///
/// Accepts `…/folders/<id>[?…]`, `…?id=<id>`, or a bare id.
pub fn folder_id_from_link(link: &str) -> Option<String> {
    let link = link.trim();
    if let Some(c) = RE_FOLDER_PATH.captures(link) {
        return Some(c[1].to_string());
    }
    if let Some(c) = RE_ID_PARAM.captures(link) {
        return Some(c[1].to_string());
    }
    RE_BARE_ID.is_match(link).then(|| link.to_string())
}

/// How to invoke the remote listing tool.
#[derive(Debug, Clone)]
pub struct ListingTool {
    /// Executable name or path.
    pub program: String,
    /// Remote name configured in the tool (without the trailing `:`).
    pub remote: String,
    /// Extensions counted as documents, lower-case without the dot.
    pub document_extensions: Vec<String>,
}

impl ListingTool {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            program: "rclone".to_string(),
            remote: remote.into(),
            document_extensions: vec!["pdf".to_string()],
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments for listing `folder_id` recursively.
    pub fn args(&self, folder_id: &str) -> Vec<String> {
        vec![
            "lsjson".to_string(),
            format!("{}:", self.remote),
            "--drive-root-folder-id".to_string(),
            folder_id.to_string(),
            "--recursive".to_string(),
            "--fast-list".to_string(),
            "--metadata".to_string(),
            "--drive-skip-gdocs".to_string(),
        ]
    }

    /// List one partition.
    ///
    /// Only a failure to start the tool is an `Err`; everything the tool
    /// itself reports becomes a status record.
    pub async fn list(
        &self,
        partition: &str,
        folder_id: &str,
    ) -> Result<PartitionListing, BatchError> {
        let ts = Utc::now().trunc_subsecs(0);
        debug!("{} {}", self.program, self.args(folder_id).join(" "));

        let out = Command::new(&self.program)
            .args(self.args(folder_id))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BatchError::ListingSpawn {
                program: self.program.clone(),
                source: e,
            })?;

        let output = ProcessOutput {
            success: out.status.success(),
            exit_code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        };
        Ok(summarize_listing(
            partition,
            folder_id,
            ts,
            &output,
            &self.document_extensions,
        ))
    }
}

/// Append-only log of partition status records.
pub type StatusLog = JsonlLog<PartitionStatus>;

/// Append-only log of listed items.
pub type ItemLog = JsonlLog<IndexedItem>;

/// List every roster partition in order, journaling each status (and its
/// items) as soon as the partition is done.
pub async fn index_roster(
    tool: &ListingTool,
    roster: &[RosterEntry],
    status_log: &StatusLog,
    item_log: &ItemLog,
    cancel: &CancellationToken,
) -> Result<Vec<PartitionStatus>, BatchError> {
    let mut statuses = Vec::with_capacity(roster.len());

    for entry in roster {
        let listing = match folder_id_from_link(&entry.link) {
            Some(folder_id) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(BatchError::Cancelled),
                    r = tool.list(&entry.partition, &folder_id) => r?,
                }
            }
            None => PartitionListing {
                status: PartitionStatus::failed(
                    &entry.partition,
                    "",
                    Utc::now().trunc_subsecs(0),
                    None,
                    format!("no folder id in roster link '{}'", entry.link),
                ),
                items: Vec::new(),
            },
        };

        item_log.append_all(&listing.indexed_items()).await?;
        status_log.append(&listing.status).await?;

        let s = &listing.status;
        if s.ok {
            info!(
                "{}: {} items ({} files, {} documents)",
                s.partition, s.n_items, s.n_files, s.n_documents
            );
        } else {
            warn!(
                "{}: listing failed: {}",
                s.partition,
                s.error.as_deref().unwrap_or("unknown error")
            );
        }
        statuses.push(listing.status);
    }
    Ok(statuses)
}
