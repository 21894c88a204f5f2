//! Output cleaning and the production bundle build.

use std::path::Path;

use sitefix_core::{Result, SiteConfig, SiteFixError};
use tracing::{error, info};

use crate::stage::{StageResult, StageRunner};

/// Remove the previous output directory. Absence is not an error.
///
/// Returns `true` if something was removed.
pub fn clean_output(dir: &Path) -> Result<bool> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(dir = %dir.display(), "removed previous output");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Run the bundler. A non-zero exit is a [`SiteFixError::BuildFailure`].
pub async fn build_bundle(config: &SiteConfig) -> Result<StageResult> {
    info!(command = %config.bundler.display(), "building production bundle");
    let result = StageRunner::execute("bundle", &config.bundler, None).await?;
    if !result.passed() {
        error!(
            exit_code = result.exit_code,
            stderr = %result.stderr_tail(20),
            "bundler failed"
        );
        return Err(SiteFixError::BuildFailure {
            exit_code: result.exit_code,
        });
    }
    info!(duration_ms = result.duration_ms, "bundle built");
    Ok(result)
}
