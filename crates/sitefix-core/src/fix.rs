//! Entry points for the post-build fix passes.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::assets;
use crate::config::SiteConfig;
use crate::error::Result;
use crate::headers;
use crate::patch::{self, PatchPipeline, PatchReport};
use crate::rules::RuleSet;

/// Outcome of a fix pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteFixReport {
    pub root: PathBuf,
    pub placeholders_created: Vec<PathBuf>,
    pub recovery_script_written: bool,
    pub headers_patched: bool,
    pub pages: PatchReport,
}

impl SiteFixReport {
    /// Files written by this pass, pages and support files together.
    pub fn files_changed(&self) -> usize {
        self.pages.changed_count()
            + self.placeholders_created.len()
            + usize::from(self.recovery_script_written)
            + usize::from(self.headers_patched)
    }
}

/// Full pass over the output directory: placeholder assets, the external
/// recovery script, every HTML page and the `_headers` file.
pub fn fix_site(config: &SiteConfig) -> Result<SiteFixReport> {
    let root = &config.output_dir;
    patch::require_dir(root)?;

    let placeholders_created = assets::ensure_placeholder_assets(root, &config.placeholder_assets)?;
    let recovery_script_written = if config.recovery.enabled {
        assets::write_recovery_script(root, config)?
    } else {
        false
    };

    let pages = PatchPipeline::new(RuleSet::standard(config)).run(root)?;
    let headers_patched = headers::patch_headers_file(root, &config.csp)?;

    let report = SiteFixReport {
        root: root.clone(),
        placeholders_created,
        recovery_script_written,
        headers_patched,
        pages,
    };
    info!(
        root = %root.display(),
        files_changed = report.files_changed(),
        failed = report.pages.failed_count(),
        "site fix complete"
    );
    Ok(report)
}

/// Page pass limited to the blog subtree.
///
/// Blog pages reference the recovery script from the output root, so the
/// script file is refreshed there as well.
pub fn fix_blog(config: &SiteConfig) -> Result<SiteFixReport> {
    fix_subtree(config, &config.blog_root())
}

/// Page pass over an arbitrary subtree of the output directory.
pub fn fix_subtree(config: &SiteConfig, root: &Path) -> Result<SiteFixReport> {
    patch::require_dir(root)?;
    let recovery_script_written = if config.recovery.enabled && config.output_dir.is_dir() {
        assets::write_recovery_script(&config.output_dir, config)?
    } else {
        false
    };
    let pages = PatchPipeline::new(RuleSet::standard(config)).run(root)?;
    info!(root = %root.display(), changed = pages.changed_count(), "subtree fix complete");
    Ok(SiteFixReport {
        root: root.to_path_buf(),
        recovery_script_written,
        pages,
        ..SiteFixReport::default()
    })
}
