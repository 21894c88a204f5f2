//! Fallback backend configuration for the static build.
//!
//! When the bundle was built without its environment, the client looks the
//! backend up from a small script instead. This module writes that script
//! (and a JSON twin) into the output tree and references it from every page.

use std::borrow::Cow;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::artifact;
use crate::config::SiteConfig;
use crate::error::Result;
use crate::patch::{self, PatchPipeline, PatchReport};
use crate::rules::{inject_into_head, HostFixRule, PatchRule, RuleSet};

pub const ENV_SCRIPT_FILE: &str = "supabase-env.js";
pub const ENV_JSON_FILE: &str = "supabase-env.json";
pub const ENV_MARKER: &str = "data-sitefix-env";

/// Global the generated script assigns.
pub const ENV_GLOBAL: &str = "__SUPABASE_ENV__";

/// Injects `<script src="/supabase-env.js">` into pages lacking it.
pub struct EnvScriptRule {
    tag: String,
}

impl EnvScriptRule {
    pub fn new() -> Self {
        Self {
            tag: format!("<script src=\"/{ENV_SCRIPT_FILE}\" {ENV_MARKER}></script>"),
        }
    }
}

impl Default for EnvScriptRule {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchRule for EnvScriptRule {
    fn name(&self) -> &'static str {
        "env-script"
    }

    fn apply<'a>(&self, html: &'a str) -> Cow<'a, str> {
        if html.contains(ENV_MARKER) {
            return Cow::Borrowed(html);
        }
        match inject_into_head(html, &self.tag) {
            Some(patched) => Cow::Owned(patched),
            None => Cow::Borrowed(html),
        }
    }
}

/// Render the browser script for the given credentials.
pub fn render_env_script(url: &str, anon_key: &str) -> String {
    let cfg = json!({ "url": url, "anonKey": anon_key }).to_string();
    format!(
        "window.{ENV_GLOBAL} = window.{ENV_GLOBAL} || Object.freeze({});\n",
        cfg.replace("</", "<\\/")
    )
}

/// Outcome of [`write_env_fallback`].
#[derive(Debug, Clone, Serialize)]
pub struct EnvFallbackReport {
    /// Fallback files written (unchanged files are not listed).
    pub files_written: Vec<PathBuf>,

    /// Result of the page pass that fixes hosts and references the script.
    pub pages: PatchReport,
}

/// Write the fallback files and reference them from every page.
///
/// Fails with a configuration error when the credentials are missing.
pub fn write_env_fallback(config: &SiteConfig) -> Result<EnvFallbackReport> {
    let (url, anon_key) = config.require_supabase()?;
    let root = &config.output_dir;
    patch::require_dir(root)?;

    let mut files_written = Vec::new();

    let script_path = root.join(ENV_SCRIPT_FILE);
    if artifact::write_if_changed(&script_path, render_env_script(url, anon_key).as_bytes())? {
        files_written.push(script_path);
    }

    let json_path = root.join(ENV_JSON_FILE);
    let body = serde_json::to_vec_pretty(&json!({ "url": url, "anonKey": anon_key }))?;
    if artifact::write_if_changed(&json_path, &body)? {
        files_written.push(json_path);
    }

    let rules = RuleSet::new(vec![
        Box::new(HostFixRule::new(&config.host_fixes)),
        Box::new(EnvScriptRule::new()),
    ]);
    let pages = PatchPipeline::new(rules).run(root)?;

    info!(
        files = files_written.len(),
        pages_changed = pages.changed_count(),
        "supabase env fallback written"
    );
    Ok(EnvFallbackReport {
        files_written,
        pages,
    })
}
