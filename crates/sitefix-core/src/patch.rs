//! Post-build patch pipeline.
//!
//! Walks an output tree and applies a [`RuleSet`] to every HTML file. Each
//! file is handled on its own: a read or write failure is logged, recorded in
//! the report and the walk moves on. Files are written back only when their
//! content actually changed, so a second run over a patched tree writes
//! nothing.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::{self, HtmlArtifact};
use crate::error::{Result, SiteFixError};
use crate::rules::RuleSet;
use crate::walk::find_html_files;

/// What happened to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Written back; lists the rules that fired.
    Changed { rules: Vec<&'static str> },
    /// Already correct; not written.
    Unchanged,
}

impl PatchOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, PatchOutcome::Changed { .. })
    }
}

/// Read `path`, apply `rules` in order and write back only if changed.
pub fn apply_patch(path: &Path, rules: &RuleSet) -> Result<PatchOutcome> {
    let artifact = HtmlArtifact::read(path)?;
    let (patched, fired) = rules.apply(&artifact.content);
    if fired.is_empty() || patched == artifact.content {
        return Ok(PatchOutcome::Unchanged);
    }
    artifact::write_atomic(path, patched.as_bytes())?;
    Ok(PatchOutcome::Changed { rules: fired })
}

/// A file that could not be patched.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PatchReport {
    /// HTML files visited.
    pub scanned: usize,

    /// Files written back.
    pub changed: Vec<PathBuf>,

    /// Files skipped because of an error.
    pub failures: Vec<PatchFailure>,

    pub duration_ms: u64,
}

impl PatchReport {
    pub fn changed_count(&self) -> usize {
        self.changed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: PatchReport) {
        self.scanned += other.scanned;
        self.changed.extend(other.changed);
        self.failures.extend(other.failures);
        self.duration_ms += other.duration_ms;
    }
}

/// Applies a rule set across an output tree.
pub struct PatchPipeline {
    rules: RuleSet,
}

impl PatchPipeline {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Patch every HTML file under `root`.
    ///
    /// Only a failure to list the tree itself is returned as an error.
    pub fn run(&self, root: &Path) -> Result<PatchReport> {
        let start = Instant::now();
        let files = find_html_files(root)?;
        info!(root = %root.display(), files = files.len(), rules = ?self.rules.names(), "patching HTML files");

        let mut report = PatchReport {
            scanned: files.len(),
            ..PatchReport::default()
        };

        for path in files {
            match apply_patch(&path, &self.rules) {
                Ok(PatchOutcome::Changed { rules }) => {
                    debug!(path = %path.display(), rules = ?rules, "patched");
                    report.changed.push(path);
                }
                Ok(PatchOutcome::Unchanged) => {
                    debug!(path = %path.display(), "already patched");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    report.failures.push(PatchFailure {
                        error: e.to_string(),
                        path,
                    });
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            root = %root.display(),
            scanned = report.scanned,
            changed = report.changed_count(),
            failed = report.failed_count(),
            "patch pass complete"
        );
        Ok(report)
    }
}

/// Error for a patch root that does not exist.
pub(crate) fn require_dir(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(SiteFixError::Configuration(format!(
            "output directory {} does not exist; run the build first",
            root.display()
        )))
    }
}
