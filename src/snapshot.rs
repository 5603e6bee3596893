//! Columnar snapshot of the journal's latest-record-per-key view.
//!
//! The snapshot is derived data: it is rebuilt from scratch after every run
//! (and on demand) and carries nothing the journal lacks. Rows are sorted by
//! `rel_path`, then fingerprint, so two builds from the same journal are
//! byte-for-byte comparable in content.

use crate::error::BatchError;
use crate::journal::{latest_by_key, Journal, JournalRecord, LatestView, Status};
use arrow_array::{
    ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMicrosecondArray, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const UTC: &str = "+00:00";

/// Row counts of one snapshot build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub rows: usize,
    pub ok: usize,
    pub error: usize,
    pub skipped: usize,
}

impl SnapshotSummary {
    fn of(rows: &[JournalRecord]) -> Self {
        let mut s = SnapshotSummary {
            rows: rows.len(),
            ..Default::default()
        };
        for r in rows {
            match r.status {
                Status::Ok => s.ok += 1,
                Status::Error => s.error += 1,
                Status::Skipped => s.skipped += 1,
            }
        }
        s
    }
}

/// Latest records in snapshot order.
pub fn snapshot_rows(view: LatestView) -> Vec<JournalRecord> {
    let mut rows: Vec<JournalRecord> = view.into_values().collect();
    rows.sort_by(|a, b| {
        a.rel_path
            .cmp(&b.rel_path)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    rows
}

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("rel_path", DataType::Utf8, false),
        Field::new("fingerprint", DataType::Utf8, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("artifact_path", DataType::Utf8, false),
        Field::new("error", DataType::Utf8, true),
        Field::new("page_count", DataType::UInt64, true),
        Field::new("duration_secs", DataType::Float64, true),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
            false,
        ),
    ])
}

fn to_batch(rows: &[JournalRecord]) -> Result<RecordBatch, arrow_schema::ArrowError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.rel_path.as_str()))),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.fingerprint.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.status.as_str()))),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.artifact_path.as_str()),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.error.as_deref()).collect::<Vec<_>>(),
        )),
        Arc::new(UInt64Array::from(
            rows.iter()
                .map(|r| r.page_count.map(|n| n as u64))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter().map(|r| r.duration_secs).collect::<Vec<_>>(),
        )),
        Arc::new(
            TimestampMicrosecondArray::from(
                rows.iter()
                    .map(|r| r.timestamp.timestamp_micros())
                    .collect::<Vec<_>>(),
            )
            .with_timezone(UTC),
        ),
    ];
    RecordBatch::try_new(Arc::new(schema()), columns)
}

/// Write `rows` to `path` as Parquet, replacing any previous snapshot
/// atomically.
pub fn write_snapshot(path: &Path, rows: &[JournalRecord]) -> Result<(), BatchError> {
    let fail = |detail: String| BatchError::Snapshot {
        path: path.to_path_buf(),
        detail,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| BatchError::io(&parent, e))?;

    let batch = to_batch(rows).map_err(|e| fail(e.to_string()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| BatchError::io(&parent, e))?;
    {
        let mut writer = ArrowWriter::try_new(tmp.as_file_mut(), batch.schema(), Some(props))
            .map_err(|e| fail(e.to_string()))?;
        writer.write(&batch).map_err(|e| fail(e.to_string()))?;
        writer.close().map_err(|e| fail(e.to_string()))?;
    }
    tmp.flush().map_err(|e| BatchError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| BatchError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| BatchError::io(path, e.error))?;
    Ok(())
}

/// Rebuild the snapshot at `snapshot_path` from the journal at
/// `journal_path`. A missing journal yields an empty snapshot.
pub async fn rebuild_snapshot(
    journal_path: &Path,
    snapshot_path: &Path,
) -> Result<SnapshotSummary, BatchError> {
    let records = Journal::load(journal_path).await?;
    let rows = snapshot_rows(latest_by_key(records));
    let summary = SnapshotSummary::of(&rows);

    let path = snapshot_path.to_path_buf();
    tokio::task::spawn_blocking(move || write_snapshot(&path, &rows))
        .await
        .map_err(|e| BatchError::Internal(format!("snapshot task panicked: {e}")))??;

    info!(
        "Snapshot {}: {} rows ({} ok, {} error, {} skipped)",
        snapshot_path.display(),
        summary.rows,
        summary.ok,
        summary.error,
        summary.skipped
    );
    Ok(summary)
}
