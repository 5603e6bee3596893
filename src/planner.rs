//! Work planning: decide which inputs need (re)conversion.
//!
//! For every input, in lexicographic path order:
//!
//! 1. fingerprint it;
//! 2. if an earlier input already maps to the same artifact path → conflict;
//! 3. if its artifact exists and the header fingerprint matches → skip;
//! 4. else if the journal's latest record for `(rel_path, fingerprint)` is
//!    settled (`ok`, or a `skipped` that confirmed an earlier `ok`) and the
//!    artifact file still exists → skip;
//! 5. otherwise → convert.
//!
//! Planning is a pure function of the filesystem and the journal view. It
//! never writes; the caller journals the skips.

use crate::artifact;
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::journal::LatestView;
use crate::worker::{ItemOutcome, ItemResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One source document found under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
    /// Absolute (or root-joined) path to the file.
    pub path: PathBuf,
    /// Path relative to the input root, `/`-separated.
    pub rel_path: String,
}

/// One unit of work for a conversion worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub item: InputItem,
    pub fingerprint: Fingerprint,
    pub artifact_path: PathBuf,
}

/// Why an item was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Artifact header carries the current fingerprint.
    HeaderMatch,
    /// Journal says the current version converted and the artifact exists.
    JournalMatch,
}

/// A skipped item plus the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub task: Task,
    pub reason: SkipReason,
}

impl Skip {
    /// The `skipped` result journaled for this item.
    pub fn to_result(&self) -> ItemResult {
        ItemResult {
            rel_path: self.task.item.rel_path.clone(),
            fingerprint: self.task.fingerprint.clone(),
            artifact_path: self.task.artifact_path.clone(),
            outcome: ItemOutcome::Skipped,
        }
    }
}

/// An input whose artifact path is already claimed by an earlier input
/// (e.g. `x.PDF` and `x.pdf` both mirror to `x.md`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub task: Task,
    /// Relative path of the input that owns the artifact.
    pub owner: String,
}

impl Conflict {
    /// The `error` result journaled for this item.
    pub fn to_result(&self) -> ItemResult {
        ItemResult {
            rel_path: self.task.item.rel_path.clone(),
            fingerprint: self.task.fingerprint.clone(),
            artifact_path: self.task.artifact_path.clone(),
            outcome: ItemOutcome::Failed {
                message: format!(
                    "artifact path {} is already produced by '{}'",
                    self.task.artifact_path.display(),
                    self.owner
                ),
                duration: Duration::ZERO,
            },
        }
    }
}

/// The plan for one invocation.
#[derive(Debug, Default, Clone)]
pub struct Plan {
    /// Items needing conversion, in enumeration order.
    pub tasks: Vec<Task>,
    /// Items already up to date, in enumeration order.
    pub skipped: Vec<Skip>,
    /// Items that cannot get an artifact of their own, in enumeration order.
    pub conflicts: Vec<Conflict>,
}

/// Enumerate accepted documents under the input root, sorted by relative path.
pub fn discover_inputs(config: &BatchConfig) -> Result<Vec<InputItem>, BatchError> {
    let root = &config.input_root;
    if !root.is_dir() {
        return Err(BatchError::InputRootMissing { path: root.clone() });
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !config.accepts(entry.path()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BatchError::Internal(format!("walkdir escaped root: {e}")))?;
        items.push(InputItem {
            path: entry.path().to_path_buf(),
            rel_path: rel_path_string(rel),
        });
    }
    items.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    debug!("Discovered {} inputs under {}", items.len(), root.display());
    Ok(items)
}

fn rel_path_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Compute the plan for `items` against the journal view and artifact tree.
///
/// A fingerprint (stat) failure for one item is fatal: the listing said the
/// file exists, so a vanished file mid-plan means the tree is changing under
/// us and the plan would not be trustworthy.
pub fn plan(
    items: &[InputItem],
    journal: &LatestView,
    config: &BatchConfig,
) -> Result<Plan, BatchError> {
    let mut plan = Plan::default();
    let mut owners: HashMap<PathBuf, String> = HashMap::new();

    for item in items {
        let fp = fingerprint(&item.path).map_err(|e| BatchError::io(&item.path, e))?;
        let artifact_path = artifact::artifact_path(
            &config.output_root,
            Path::new(&item.rel_path),
            &config.artifact_extension,
        );
        let task = Task {
            item: item.clone(),
            fingerprint: fp,
            artifact_path,
        };

        if let Some(owner) = owners.get(&task.artifact_path) {
            warn!(
                "{}: artifact {} already claimed by {}",
                task.item.rel_path,
                task.artifact_path.display(),
                owner
            );
            plan.conflicts.push(Conflict {
                owner: owner.clone(),
                task,
            });
            continue;
        }
        owners.insert(task.artifact_path.clone(), task.item.rel_path.clone());

        match skip_reason(&task, journal) {
            Some(reason) => {
                debug!("{}: up to date ({:?})", task.item.rel_path, reason);
                plan.skipped.push(Skip { task, reason });
            }
            None => plan.tasks.push(task),
        }
    }

    info!(
        "Planned {} inputs: {} to convert, {} up to date, {} conflicting",
        items.len(),
        plan.tasks.len(),
        plan.skipped.len(),
        plan.conflicts.len()
    );
    Ok(plan)
}

fn skip_reason(task: &Task, journal: &LatestView) -> Option<SkipReason> {
    if artifact::read_fingerprint(&task.artifact_path).as_ref() == Some(&task.fingerprint) {
        return Some(SkipReason::HeaderMatch);
    }

    let key = (task.item.rel_path.clone(), task.fingerprint.clone());
    let settled = journal.get(&key).is_some_and(|r| r.status.is_settled());
    if settled && task.artifact_path.is_file() {
        return Some(SkipReason::JournalMatch);
    }
    None
}
