//! The partition roster: every partition the report must account for.
//!
//! A two-column CSV with a required header row, `partition,link`. The link
//! is optional per row; the partition is not.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// One roster row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(alias = "province")]
    pub partition: String,
    #[serde(default)]
    pub link: String,
}

/// Load the roster at `path`, in file order.
///
/// Duplicate partitions keep their first row.
pub fn load_roster(path: &Path) -> Result<Vec<RosterEntry>, BatchError> {
    let file = std::fs::File::open(path).map_err(|e| BatchError::io(path, e))?;
    parse_roster(path, file)
}

fn parse_roster<R: std::io::Read>(path: &Path, reader: R) -> Result<Vec<RosterEntry>, BatchError> {
    let fail = |detail: String| BatchError::Roster {
        path: path.to_path_buf(),
        detail,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().map_err(|e| fail(e.to_string()))?.clone();
    let has = |name: &str| headers.iter().any(|h| h.trim_start_matches('\u{FEFF}') == name);
    if !(has("partition") || has("province")) {
        return Err(fail(format!(
            "missing 'partition' column in header (found: {})",
            headers.iter().collect::<Vec<_>>().join(",")
        )));
    }
    if !has("link") {
        return Err(fail("missing 'link' column in header".to_string()));
    }
    // A UTF-8 BOM would otherwise hide the first column name from serde.
    let cleaned: csv::StringRecord = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{FEFF}'))
        .collect();
    rdr.set_headers(cleaned);

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (i, row) in rdr.deserialize::<RosterEntry>().enumerate() {
        let line = i + 2;
        let entry = row.map_err(|e| fail(format!("line {line}: {e}")))?;
        if entry.partition.is_empty() {
            return Err(fail(format!("line {line}: blank partition")));
        }
        if !seen.insert(entry.partition.clone()) {
            warn!(
                "{}: line {}: duplicate partition '{}' ignored",
                path.display(),
                line,
                entry.partition
            );
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<RosterEntry>, BatchError> {
        parse_roster(Path::new("roster.csv"), text.as_bytes())
    }

    #[test]
    fn reads_rows_in_order() {
        let r = parse("partition,link\nกรุงเทพมหานคร,https://x/folders/abc\nB,\n").unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].partition, "กรุงเทพมหานคร");
        assert_eq!(r[0].link, "https://x/folders/abc");
        assert_eq!(r[1].partition, "B");
        assert_eq!(r[1].link, "");
    }

    #[test]
    fn accepts_bom_and_province_alias() {
        let r = parse("\u{FEFF}province,link\nA,l\n").unwrap();
        assert_eq!(r[0].partition, "A");
    }

    #[test]
    fn missing_header_is_error() {
        let err = parse("A,https://x\nB,https://y\n").unwrap_err();
        assert!(matches!(err, BatchError::Roster { .. }), "got {err:?}");
    }

    #[test]
    fn blank_partition_is_error() {
        let err = parse("partition,link\nA,x\n  ,y\n").unwrap_err();
        assert!(err.to_string().contains("line 3"), "got {err}");
    }

    #[test]
    fn duplicates_keep_first() {
        let r = parse("partition,link\nA,1\nA,2\n").unwrap();
        assert_eq!(r, vec![RosterEntry { partition: "A".into(), link: "1".into() }]);
    }
}
