//! Cheap content-identity tokens derived from file metadata.
//!
//! A fingerprint is a digest of `(size, floor(mtime))`. It never reads the
//! file body, so fingerprinting a collection of multi-megabyte scans costs
//! one `stat` per file. The trade-off is accepted: a file rewritten with the
//! same size inside the same second keeps its fingerprint and will not be
//! reconverted.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Number of digest bytes kept in the token (40 hex characters).
const TOKEN_BYTES: usize = 20;

/// A stable, metadata-derived identity token for one input file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint from raw metadata values.
    pub fn from_metadata(size: u64, mtime_secs: i64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{size}:{mtime_secs}").as_bytes());
        let digest = hasher.finalize();
        Fingerprint(hex::encode(&digest[..TOKEN_BYTES]))
    }

    /// Wrap a token read back from a journal or artifact header.
    pub fn from_token(token: impl Into<String>) -> Self {
        Fingerprint(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stat `path` and fingerprint it. Stat errors propagate unchanged.
pub fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let meta = std::fs::metadata(path)?;
    Ok(Fingerprint::from_metadata(meta.len(), mtime_secs(&meta)?))
}

/// Whole seconds since the epoch; pre-epoch times floor towards negative.
fn mtime_secs(meta: &std::fs::Metadata) -> std::io::Result<i64> {
    let modified = meta.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    })
}
