//! Self-describing Markdown artifacts.
//!
//! Every artifact starts with an identity header recording which input it
//! came from, the fingerprint of that input, and the model that produced it:
//!
//! ```text
//! <!-- rel_path=reports/2024/q1.pdf -->
//! <!-- fingerprint=4f1c… -->
//! <!-- model=typhoon-ocr -->
//!
//! <!-- PAGE 1/3 -->
//! …
//! ```
//!
//! The planner peeks at the header to decide whether an artifact is current
//! without consulting the journal, so artifacts stay verifiable even when the
//! journal is lost.

use crate::error::BatchError;
use crate::fingerprint::Fingerprint;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How many leading lines the header peek inspects.
const HEADER_PEEK_LINES: usize = 10;

static RE_HEADER_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<!--\s*(rel_path|fingerprint|model)=(.*?)\s*-->$").unwrap());

/// Identity header embedded at the top of every artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub rel_path: String,
    pub fingerprint: Fingerprint,
    pub model: String,
}

impl ArtifactHeader {
    fn render(&self) -> String {
        format!(
            "<!-- rel_path={} -->\n<!-- fingerprint={} -->\n<!-- model={} -->\n",
            self.rel_path, self.fingerprint, self.model
        )
    }
}

/// Map an input's relative path onto its artifact location under `out_root`.
pub fn artifact_path(out_root: &Path, rel_path: &Path, extension: &str) -> PathBuf {
    out_root.join(rel_path).with_extension(extension)
}

/// Assemble the full artifact body from the header and per-page Markdown.
pub fn render_artifact(header: &ArtifactHeader, pages: &[String]) -> String {
    let total = pages.len();
    let mut out = header.render();
    for (i, page) in pages.iter().enumerate() {
        out.push_str(&format!("\n<!-- PAGE {}/{} -->\n\n", i + 1, total));
        out.push_str(page);
        out.push('\n');
    }
    out
}

/// Read only the fingerprint from an existing artifact.
///
/// Returns `None` when the file is missing, unreadable, or carries no
/// fingerprint line in its first lines; callers treat all of those as
/// "not verified".
pub fn read_fingerprint(path: &Path) -> Option<Fingerprint> {
    peek_fields(path).and_then(|f| f.fingerprint)
}

/// Read the full identity header, if all three fields are present.
pub fn read_header(path: &Path) -> Option<ArtifactHeader> {
    let fields = peek_fields(path)?;
    Some(ArtifactHeader {
        rel_path: fields.rel_path?,
        fingerprint: fields.fingerprint?,
        model: fields.model?,
    })
}

#[derive(Default)]
struct HeaderFields {
    rel_path: Option<String>,
    fingerprint: Option<Fingerprint>,
    model: Option<String>,
}

impl HeaderFields {
    fn any(&self) -> bool {
        self.rel_path.is_some() || self.fingerprint.is_some() || self.model.is_some()
    }
}

fn peek_fields(path: &Path) -> Option<HeaderFields> {
    let file = std::fs::File::open(path).ok()?;
    let mut fields = HeaderFields::default();
    for line in BufReader::new(file).lines().take(HEADER_PEEK_LINES) {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!("Header peek of {} stopped: {}", path.display(), e);
                break;
            }
        };
        let line = line.trim();
        // The header ends at the first blank line; page text never counts.
        if line.is_empty() && fields.any() {
            break;
        }
        if let Some(caps) = RE_HEADER_FIELD.captures(line) {
            let value = caps[2].to_string();
            match &caps[1] {
                "rel_path" => {
                    fields.rel_path.get_or_insert(value);
                }
                "fingerprint" => {
                    fields
                        .fingerprint
                        .get_or_insert_with(|| Fingerprint::from_token(value));
                }
                "model" => {
                    fields.model.get_or_insert(value);
                }
                _ => {}
            }
        }
    }
    Some(fields)
}

/// Write `contents` to `path` in one step: temp file in the same directory,
/// then rename. Readers never observe a half-written artifact.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), BatchError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| BatchError::io(parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| BatchError::io(parent, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| BatchError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| BatchError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| BatchError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header() -> ArtifactHeader {
        ArtifactHeader {
            rel_path: "north/report.pdf".into(),
            fingerprint: Fingerprint::from_metadata(10, 20),
            model: "typhoon-ocr".into(),
        }
    }

    #[test]
    fn artifact_path_rewrites_extension() {
        let p = artifact_path(Path::new("/out"), Path::new("north/report.pdf"), "md");
        assert_eq!(p, PathBuf::from("/out/north/report.md"));
    }

    #[test]
    fn render_places_page_markers() {
        let body = render_artifact(&header(), &["first".into(), "second".into()]);
        assert!(body.starts_with("<!-- rel_path=north/report.pdf -->\n"));
        assert!(body.contains("<!-- PAGE 1/2 -->\n\nfirst\n\n<!-- PAGE 2/2 -->\n\nsecond\n"));
        let header_end = body.find("<!-- PAGE 1/2").unwrap();
        assert!(body[..header_end].ends_with("-->\n\n"));
    }

    #[test]
    fn header_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/report.md");
        write_atomic(&path, &render_artifact(&header(), &["x".into()])).unwrap();
        assert_eq!(read_header(&path), Some(header()));
        assert_eq!(read_fingerprint(&path), Some(header().fingerprint));
    }

    #[test]
    fn missing_or_headerless_file_yields_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_fingerprint(&dir.path().join("absent.md")), None);

        let plain = dir.path().join("plain.md");
        std::fs::write(&plain, "# Just markdown\n\nno header here\n").unwrap();
        assert_eq!(read_fingerprint(&plain), None);
        assert_eq!(read_header(&plain), None);
    }

    #[test]
    fn header_beyond_peek_window_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.md");
        let mut body = "filler\n".repeat(HEADER_PEEK_LINES);
        body.push_str("<!-- fingerprint=abc -->\n");
        std::fs::write(&path, body).unwrap();
        assert_eq!(read_fingerprint(&path), None);
    }

    #[test]
    fn page_text_cannot_override_header_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spoofed.md");
        let page = "<!-- fingerprint=0000 -->\n<!-- model=impostor -->".to_string();
        write_atomic(&path, &render_artifact(&header(), &[page])).unwrap();
        assert_eq!(read_header(&path), Some(header()));
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        write_atomic(&path, "old").unwrap();
        write_atomic(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file must not be left behind");
    }
}
