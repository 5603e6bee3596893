//! Coverage report: the roster left-joined with the latest listing status.
//!
//! Every roster partition produces exactly one row, in roster order, whether
//! or not it was ever listed. A partition counts as indexed only when its
//! latest status is `ok` and it has at least one file; a successful listing
//! of an empty folder is not coverage.

use crate::artifact::write_atomic;
use crate::error::BatchError;
use crate::listing::PartitionStatus;
use crate::roster::RosterEntry;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

/// One report row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub partition: String,
    pub link: String,
    pub indexed: bool,
    pub folder_id: Option<String>,
    pub ok: Option<bool>,
    pub n_items: u64,
    pub n_files: u64,
    pub n_dirs: u64,
    pub n_documents: u64,
    pub latest_modtime: Option<String>,
    pub checked_at: Option<String>,
    pub error: Option<String>,
}

/// Build one row per roster entry from `statuses` (file order; later wins).
pub fn build_report(roster: &[RosterEntry], statuses: Vec<PartitionStatus>) -> Vec<ReportRow> {
    let mut latest: HashMap<String, PartitionStatus> = HashMap::new();
    for s in statuses {
        latest.insert(s.partition.clone(), s);
    }

    roster
        .iter()
        .map(|entry| match latest.get(&entry.partition) {
            Some(s) => ReportRow {
                partition: entry.partition.clone(),
                link: entry.link.clone(),
                indexed: s.ok && s.n_files >= 1,
                folder_id: Some(s.folder_id.clone()).filter(|f| !f.is_empty()),
                ok: Some(s.ok),
                n_items: s.n_items,
                n_files: s.n_files,
                n_dirs: s.n_dirs,
                n_documents: s.n_documents,
                latest_modtime: s.latest_modtime.clone(),
                checked_at: s
                    .ts_utc
                    .map(|ts| ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
                error: s.error.clone(),
            },
            None => ReportRow {
                partition: entry.partition.clone(),
                link: entry.link.clone(),
                indexed: false,
                folder_id: None,
                ok: None,
                n_items: 0,
                n_files: 0,
                n_dirs: 0,
                n_documents: 0,
                latest_modtime: None,
                checked_at: None,
                error: None,
            },
        })
        .collect()
}

/// Render rows as CSV with a header line.
pub fn render_csv(rows: &[ReportRow]) -> Result<String, csv::Error> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Render rows as a Markdown table with a short header.
pub fn render_markdown(rows: &[ReportRow]) -> String {
    let indexed = rows.iter().filter(|r| r.indexed).count();
    let mut md = String::new();
    let _ = writeln!(md, "# Remote index coverage\n");
    let _ = writeln!(md, "- Partitions: {}", rows.len());
    let _ = writeln!(md, "- Indexed: {indexed}");
    let _ = writeln!(md, "- Not indexed: {}\n", rows.len() - indexed);
    let _ = writeln!(
        md,
        "| Partition | Indexed | Items | Files | Documents | Latest modtime | Error |"
    );
    let _ = writeln!(md, "|---|:---:|---:|---:|---:|---|---|");
    for r in rows {
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} | {} | {} |",
            cell(&r.partition),
            if r.indexed { "✅" } else { "❌" },
            r.n_items,
            r.n_files,
            r.n_documents,
            cell(r.latest_modtime.as_deref().unwrap_or("")),
            cell(r.error.as_deref().unwrap_or(if r.ok.is_none() { "never listed" } else { "" })),
        );
    }
    md
}

fn cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Write both renderings atomically.
pub fn write_report(
    rows: &[ReportRow],
    csv_path: &Path,
    md_path: &Path,
) -> Result<(), BatchError> {
    let csv = render_csv(rows).map_err(|e| BatchError::Report {
        path: csv_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    write_atomic(csv_path, &csv)?;
    write_atomic(md_path, &render_markdown(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(p: &str) -> RosterEntry {
        RosterEntry {
            partition: p.into(),
            link: format!("https://drive.example/folders/{p}0000000000"),
        }
    }

    fn status(p: &str, ok: bool, n_files: u64, hour: u32) -> PartitionStatus {
        PartitionStatus {
            ts_utc: Some(Utc.with_ymd_and_hms(2025, 2, 1, hour, 0, 0).unwrap()),
            partition: p.into(),
            folder_id: format!("{p}0000000000"),
            ok,
            exit_code: Some(if ok { 0 } else { 1 }),
            error: (!ok).then(|| "process failed: quota exceeded".to_string()),
            n_items: n_files,
            n_dirs: 0,
            n_files,
            n_documents: n_files,
            latest_modtime: None,
        }
    }

    #[test]
    fn covered_and_uncovered_partitions() {
        let rows = build_report(&[entry("A"), entry("B")], vec![status("A", true, 5, 1)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].partition, "A");
        assert!(rows[0].indexed);
        assert_eq!(rows[1].partition, "B");
        assert!(!rows[1].indexed);
        assert_eq!(rows[1].ok, None);

        let md = render_markdown(&rows);
        assert!(md.contains("| A | ✅ |"), "{md}");
        assert!(md.contains("| B | ❌ |"), "{md}");
    }

    #[test]
    fn ok_but_empty_is_not_indexed() {
        let rows = build_report(&[entry("A")], vec![status("A", true, 0, 1)]);
        assert_eq!(rows[0].ok, Some(true));
        assert!(!rows[0].indexed);
    }

    #[test]
    fn latest_status_wins() {
        let rows = build_report(
            &[entry("A")],
            vec![status("A", true, 5, 1), status("A", false, 0, 2)],
        );
        assert!(!rows[0].indexed);
        assert!(rows[0].error.as_deref().unwrap().contains("quota"));
    }

    #[test]
    fn statuses_outside_roster_are_ignored() {
        let rows = build_report(&[entry("A")], vec![status("Z", true, 5, 1)]);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].indexed);
    }

    #[test]
    fn csv_has_header_and_one_line_per_partition() {
        let rows = build_report(
            &[entry("A"), entry("B"), entry("C")],
            vec![status("C", true, 2, 1)],
        );
        let csv = render_csv(&rows).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("partition,link,indexed"));
        assert!(lines[3].starts_with("C,"));
        assert!(lines[3].contains(",true,"));
    }

    #[test]
    fn markdown_escapes_pipes() {
        let mut s = status("A", false, 0, 1);
        s.error = Some("bad | worse\nworst".into());
        let md = render_markdown(&build_report(&[entry("A")], vec![s]));
        assert!(md.contains("bad \\| worse worst"), "{md}");
    }

    #[tokio::test]
    async fn status_log_lines_without_timestamp_still_count() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("status.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"province":"A","ok":true,"n_files":5}"#,
                "\n",
                r#"{"partition":"B","ok":false,"error":"process failed: 403"}"#,
                "\n",
            ),
        )
        .unwrap();

        let statuses = crate::listing::StatusLog::load(&path).await.unwrap();
        assert_eq!(statuses.len(), 2);
        let rows = build_report(&[entry("A"), entry("B")], statuses);
        assert!(rows[0].indexed);
        assert_eq!(rows[0].checked_at, None);
        assert!(!rows[1].indexed);
        assert_eq!(rows[1].ok, Some(false));
    }

    #[test]
    fn write_report_creates_both_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let rows = build_report(&[entry("A")], vec![]);
        let csv_path = dir.path().join("out/summary.csv");
        let md_path = dir.path().join("out/summary.md");
        write_report(&rows, &csv_path, &md_path).unwrap();
        assert!(std::fs::read_to_string(csv_path).unwrap().contains("A,"));
        assert!(std::fs::read_to_string(md_path).unwrap().contains("❌"));
    }
}
