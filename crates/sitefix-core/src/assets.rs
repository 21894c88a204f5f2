//! Placeholder assets and the external recovery script file.

use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::artifact::{self, file_error};
use crate::config::SiteConfig;
use crate::error::{Result, SiteFixError};
use crate::recovery;

const SVG_PLACEHOLDER: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300" viewBox="0 0 400 300"><rect width="400" height="300" fill="#e5e7eb"/></svg>
"##;

/// Create any listed asset missing under `root`. Existing files are never
/// touched. SVGs get a minimal valid document, everything else is empty.
///
/// Returns the files created.
pub fn ensure_placeholder_assets(root: &Path, assets: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for rel in assets {
        if !is_contained(rel) {
            return Err(SiteFixError::Configuration(format!(
                "placeholder asset {} must be a relative path inside the output directory",
                rel.display()
            )));
        }
        let path = root.join(rel);
        if path.exists() {
            continue;
        }
        let contents: &[u8] = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("svg") => SVG_PLACEHOLDER.as_bytes(),
            _ => b"",
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| file_error(parent, &e))?;
        }
        std::fs::write(&path, contents).map_err(|e| file_error(&path, &e))?;
        info!(path = %path.display(), "created placeholder asset");
        created.push(path);
    }
    Ok(created)
}

/// Write the recovery script served to pages whose CSP blocks inline
/// scripts. Returns `true` when the file was (re)written.
pub fn write_recovery_script(root: &Path, config: &SiteConfig) -> Result<bool> {
    let rel = Path::new(config.recovery.script_file.trim_start_matches('/'));
    if !is_contained(rel) {
        return Err(SiteFixError::Configuration(format!(
            "recovery script_file {} must stay inside the output directory",
            rel.display()
        )));
    }
    let script = recovery::render_script(&config.recovery, &config.host_fixes, &config.csp);
    artifact::write_if_changed(&root.join(rel), script.as_bytes())
}

fn is_contained(rel: &Path) -> bool {
    rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && rel.components().next().is_some()
}
