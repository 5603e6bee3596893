//! End-to-end behaviour of the batch pipeline with a scripted converter.
//!
//! Every test runs on Tokio's paused clock, so backoff sleeps, per-page
//! latency, and the wall-clock budget all advance virtually.

use async_trait::async_trait;
use edgequake_batch2md::{
    build_report, plan_only, read_header, run_batch, AttemptError, BatchConfig,
    BatchConfigBuilder, BatchError, Journal, JournalRecord, PageConverter, PartitionStatus,
    RosterEntry, SkipReason, Status,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ── Scripted converter ───────────────────────────────────────────────────────

/// Converter whose behaviour per file name is scripted up front.
#[derive(Default)]
struct Scripted {
    latency: Duration,
    pages: HashMap<String, usize>,
    /// Number of failing attempts per file before attempts succeed.
    fail_first: HashMap<String, u32>,
    calls: Mutex<HashMap<String, u32>>,
}

impl Scripted {
    fn new() -> Self {
        Self::default()
    }

    fn latency(mut self, d: Duration) -> Self {
        self.latency = d;
        self
    }

    fn pages(mut self, name: &str, n: usize) -> Self {
        self.pages.insert(name.to_string(), n);
        self
    }

    fn fail_first(mut self, name: &str, n: u32) -> Self {
        self.fail_first.insert(name.to_string(), n);
        self
    }

    fn calls(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[async_trait]
impl PageConverter for Scripted {
    fn model(&self) -> &str {
        "scripted-ocr"
    }

    async fn page_count(&self, path: &Path) -> Option<usize> {
        self.pages.get(&file_name(path)).copied()
    }

    async fn convert_page(&self, path: &Path, page: usize) -> Result<String, AttemptError> {
        let name = file_name(path);
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if n <= self.fail_first.get(&name).copied().unwrap_or(0) {
            return Err(AttemptError::Status {
                status: 503,
                body: format!("busy (attempt {n})"),
            });
        }
        Ok(format!("# {name}\n\npage {page}, attempt {n}"))
    }
}

// ── Workspace helpers ────────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(files: &[&str]) -> Self {
        let ws = Self {
            dir: TempDir::new().unwrap(),
        };
        std::fs::create_dir_all(ws.input()).unwrap();
        for f in files {
            ws.write_input(f, "%PDF-1.4 scanned");
        }
        ws
    }

    fn input(&self) -> PathBuf {
        self.dir.path().join("raw")
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("ocr_markdown")
    }

    fn journal(&self) -> PathBuf {
        self.dir.path().join("manifests/ocr_manifest.jsonl")
    }

    fn snapshot(&self) -> PathBuf {
        self.dir.path().join("manifests/ocr_manifest.parquet")
    }

    fn write_input(&self, rel: &str, body: &str) {
        let path = self.input().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn artifact(&self, rel: &str) -> PathBuf {
        self.output().join(Path::new(rel).with_extension("md"))
    }

    fn config(&self, tweak: impl FnOnce(BatchConfigBuilder) -> BatchConfigBuilder) -> BatchConfig {
        tweak(
            BatchConfig::builder()
                .input_root(self.input())
                .output_root(self.output())
                .journal_path(self.journal())
                .snapshot_path(self.snapshot()),
        )
        .build()
        .unwrap()
    }

    async fn records(&self) -> Vec<JournalRecord> {
        Journal::load(self.journal()).await.unwrap()
    }
}

fn count(records: &[JournalRecord], status: Status) -> usize {
    records.iter().filter(|r| r.status == status).count()
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn second_run_on_unchanged_inputs_only_skips() {
    let ws = Workspace::new(&["a.pdf", "nested/b.pdf", "nested/deeper/c.PDF"]);
    let conv = Scripted::new().pages("a.pdf", 2);
    let config = ws.config(|b| b);

    let first = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.discovered, 3);
    assert_eq!(first.converted, 3);
    assert_eq!(first.skipped, 0);
    let calls_after_first = conv.total_calls();

    let second = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(second.converted, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(conv.total_calls(), calls_after_first, "no service calls on re-run");

    let records = ws.records().await;
    assert_eq!(records.len(), 6);
    let new = &records[3..];
    assert!(new.iter().all(|r| r.status == Status::Skipped), "{new:?}");
    assert_eq!(second.snapshot.rows, 3);
    assert_eq!(second.snapshot.skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn artifacts_carry_identity_header_and_mirror_tree() {
    let ws = Workspace::new(&["nested/b.pdf"]);
    let conv = Scripted::new().pages("b.pdf", 3);
    run_batch(&ws.config(|b| b), &conv, &CancellationToken::new())
        .await
        .unwrap();

    let artifact = ws.artifact("nested/b.pdf");
    let header = read_header(&artifact).unwrap();
    assert_eq!(header.rel_path, "nested/b.pdf");
    assert_eq!(header.model, "scripted-ocr");

    let body = std::fs::read_to_string(&artifact).unwrap();
    assert!(body.contains("<!-- PAGE 3/3 -->"));
    let record = &ws.records().await[0];
    assert_eq!(record.fingerprint, header.fingerprint);
    assert_eq!(record.page_count, Some(3));
}

#[tokio::test(start_paused = true)]
async fn changed_input_is_reconverted() {
    let ws = Workspace::new(&["a.pdf", "b.pdf"]);
    let conv = Scripted::new();
    let config = ws.config(|b| b);
    run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();

    ws.write_input("b.pdf", "%PDF-1.4 scanned, second edition");
    let again = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();

    assert_eq!(again.converted, 1);
    assert_eq!(again.skipped, 1);
    assert_eq!(conv.calls("b.pdf"), 2);
    assert_eq!(conv.calls("a.pdf"), 1);
}

#[tokio::test(start_paused = true)]
async fn journal_alone_covers_a_lost_header() {
    let ws = Workspace::new(&["a.pdf"]);
    let config = ws.config(|b| b);
    run_batch(&config, &Scripted::new(), &CancellationToken::new())
        .await
        .unwrap();

    // Header damaged, file still present: the journal's `ok` is enough.
    std::fs::write(ws.artifact("a.pdf"), "hand-edited, header gone\n").unwrap();
    let plan = plan_only(&config).await.unwrap();
    assert!(plan.tasks.is_empty());
    assert_eq!(plan.skipped[0].reason, SkipReason::JournalMatch);

    // Artifact gone entirely: the journal alone is not enough.
    std::fs::remove_file(ws.artifact("a.pdf")).unwrap();
    let plan = plan_only(&config).await.unwrap();
    assert_eq!(plan.tasks.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn plan_only_writes_nothing() {
    let ws = Workspace::new(&["a.pdf", "b.pdf"]);
    let plan = plan_only(&ws.config(|b| b)).await.unwrap();

    assert_eq!(plan.tasks.len(), 2);
    assert!(!ws.journal().exists());
    assert!(!ws.snapshot().exists());
    assert!(!ws.output().exists());
}

#[tokio::test(start_paused = true)]
async fn missing_input_root_is_fatal() {
    let ws = Workspace::new(&[]);
    let config = BatchConfig::builder()
        .input_root(ws.dir.path().join("nope"))
        .output_root(ws.output())
        .journal_path(ws.journal())
        .build()
        .unwrap();
    let err = run_batch(&config, &Scripted::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::InputRootMissing { .. }));
}

// ── Crash safety ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn item_cap_defers_the_rest_to_the_next_run() {
    let ws = Workspace::new(&["1.pdf", "2.pdf", "3.pdf", "4.pdf", "5.pdf"]);
    let conv = Scripted::new();

    let first = run_batch(&ws.config(|b| b.max_items(2)), &conv, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.converted, 2);
    assert_eq!(first.deferred, 3);
    assert_eq!(ws.records().await.len(), 2);

    let second = run_batch(&ws.config(|b| b), &conv, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.converted, 3, "exactly the remaining M-N");
    assert_eq!(second.skipped, 2);
    for name in ["1.pdf", "2.pdf", "3.pdf", "4.pdf", "5.pdf"] {
        assert_eq!(conv.calls(name), 1, "{name} converted once");
    }
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_journals_only_finished_items() {
    let ws = Workspace::new(&["1.pdf", "2.pdf", "3.pdf", "4.pdf", "5.pdf"]);
    let conv = Scripted::new().latency(Duration::from_secs(10));
    let config = ws.config(|b| b.concurrency(1));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.cancel();
    });

    let err = run_batch(&config, &conv, &cancel).await.unwrap_err();
    assert!(matches!(err, BatchError::Cancelled));

    let records = ws.records().await;
    assert_eq!(records.len(), 2, "items 1 and 2 finished before the interrupt");
    assert_eq!(count(&records, Status::Error), 0, "interrupted item is not an error");
    assert!(!ws.artifact("3.pdf").exists(), "no partial artifact");

    let resumed = run_batch(&config, &conv, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.skipped, 2);
    assert_eq!(resumed.converted, 3);
}

// ── Budget ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn budget_stops_dispatch_without_errors() {
    let ws = Workspace::new(&["1.pdf", "2.pdf", "3.pdf", "4.pdf", "5.pdf", "6.pdf"]);
    let conv = Scripted::new().latency(Duration::from_secs(10));
    // W=2, 10 s per item, 15 s budget: dispatch at t=0 (2) and t=10 (2).
    let config = ws.config(|b| b.concurrency(2).budget(Duration::from_secs(15)));

    let run = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert!(run.budget_exhausted);
    assert_eq!(run.converted, 4);
    assert_eq!(run.failed, 0);
    assert_eq!(run.deferred, 2);

    let records = ws.records().await;
    assert_eq!(records.len(), 4);
    assert_eq!(count(&records, Status::Error), 0);

    let next = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(next.converted, 2);
    assert!(!next.budget_exhausted);
}

// ── Retry semantics ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn final_attempt_success_is_ok_and_one_more_failure_is_error() {
    let ws = Workspace::new(&["lucky.pdf", "unlucky.pdf"]);
    let conv = Scripted::new()
        .fail_first("lucky.pdf", 3)
        .fail_first("unlucky.pdf", 4);
    let config = ws.config(|b| b.max_retries(3).retry_base_delay(Duration::from_millis(100)));

    let run = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(run.converted, 1);
    assert_eq!(run.failed, 1);
    assert_eq!(conv.calls("lucky.pdf"), 4);
    assert_eq!(conv.calls("unlucky.pdf"), 4);

    let body = std::fs::read_to_string(ws.artifact("lucky.pdf")).unwrap();
    assert!(body.contains("attempt 4"), "content from the last attempt: {body}");
    assert!(!ws.artifact("unlucky.pdf").exists());

    let records = ws.records().await;
    let failed = records.iter().find(|r| r.rel_path == "unlucky.pdf").unwrap();
    assert_eq!(failed.status, Status::Error);
    let message = failed.error.as_deref().unwrap();
    assert!(message.contains("503") && message.contains("attempt 4"), "{message}");

    // Errors are not settled: the next run tries again.
    let next = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(next.skipped, 1);
    assert_eq!(next.converted, 1);
    assert_eq!(conv.calls("unlucky.pdf"), 5);
}

#[tokio::test(start_paused = true)]
async fn one_failing_item_does_not_block_others() {
    let ws = Workspace::new(&["a.pdf", "bad.pdf", "c.pdf", "d.pdf"]);
    let conv = Scripted::new().fail_first("bad.pdf", u32::MAX);
    let config = ws.config(|b| b.concurrency(2).max_retries(1));

    let run = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(run.converted, 3);
    assert_eq!(run.failed, 1);
    assert_eq!(run.snapshot.error, 1);
    assert_eq!(run.snapshot.ok, 3);
}

#[tokio::test(start_paused = true)]
async fn inputs_sharing_an_artifact_are_never_silently_merged() {
    let ws = Workspace::new(&["x.pdf", "x.PDF"]);
    let conv = Scripted::new();
    let config = ws.config(|b| b);

    let first = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.discovered, 2);
    assert_eq!(first.converted, 1);
    assert_eq!(first.failed, 1);
    assert_eq!(conv.calls("x.pdf"), 0);
    assert_eq!(read_header(&ws.artifact("x.PDF")).unwrap().rel_path, "x.PDF");

    // The loser keeps surfacing as an error instead of hiding behind the
    // owner's artifact.
    let second = run_batch(&config, &conv, &CancellationToken::new()).await.unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(second.failed, 1);
    assert_eq!(second.converted, 0);

    let records = ws.records().await;
    let loser: Vec<_> = records.iter().filter(|r| r.rel_path == "x.pdf").collect();
    assert_eq!(loser.len(), 2);
    assert!(loser.iter().all(|r| r.status == Status::Error));
    assert!(loser[0].error.as_deref().unwrap().contains("x.PDF"));
    assert_eq!(second.snapshot.error, 1);
}

// ── Report completeness ─────────────────────────────────────────────────────

#[test]
fn report_has_one_row_per_roster_partition() {
    let roster: Vec<RosterEntry> = ["A", "B", "C", "D"]
        .iter()
        .map(|p| RosterEntry {
            partition: p.to_string(),
            link: String::new(),
        })
        .collect();
    let statuses: Vec<PartitionStatus> = [
        r#"{"ts_utc":"2025-01-31T08:00:00Z","partition":"A","ok":true,"n_files":5}"#,
        r#"{"ts_utc":"2025-01-31T08:00:00Z","partition":"C","ok":true,"n_files":0}"#,
    ]
    .iter()
    .map(|l| serde_json::from_str(l).unwrap())
    .collect();

    let rows = build_report(&roster, statuses);
    let summary: Vec<(&str, bool)> = rows
        .iter()
        .map(|r| (r.partition.as_str(), r.indexed))
        .collect();
    assert_eq!(
        summary,
        vec![("A", true), ("B", false), ("C", false), ("D", false)]
    );
}
