//! Site configuration.
//!
//! Everything the build and patch pipelines need is carried in a
//! [`SiteConfig`] passed in at invocation time, so tests run against fixture
//! values instead of production credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::csp::CspRequirements;
use crate::error::{Result, SiteFixError};
use crate::manifest::RouteManifest;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "sitefix.json";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    /// Build output directory.
    pub output_dir: PathBuf,

    /// Blog subtree, relative to `output_dir`.
    pub blog_dir: PathBuf,

    /// Port the preview server binds to.
    pub preview_port: u16,

    /// Routes to prerender, in order.
    pub routes: RouteManifest,

    /// CSP tokens every page must allow.
    pub csp: CspRequirements,

    /// Broken host fragments to rewrite.
    pub host_fixes: Vec<HostFix>,

    /// Runtime recovery script options.
    pub recovery: RecoveryConfig,

    /// Assets that must exist under `output_dir` (placeholders are created).
    pub placeholder_assets: Vec<PathBuf>,

    /// Hosted backend credentials for the env fallback script.
    pub supabase: SupabaseConfig,

    /// Production bundler invocation.
    pub bundler: CommandConfig,

    /// Static preview server invocation. `{port}` in args is substituted.
    pub preview: CommandConfig,

    /// Headless browser settings.
    pub browser: BrowserConfig,

    /// Preview server start attempts.
    pub server_retry: RetryPolicy,

    /// Per-route prerender attempts.
    pub route_retry: RetryPolicy,

    /// Readiness probing within one server start attempt.
    pub readiness: ReadinessPolicy,

    /// Time allowed between terminate and forced kill.
    pub shutdown_grace_ms: u64,

    /// Fail the run when more than this fraction of routes fail.
    pub max_route_failure_ratio: f64,

    /// Pages rendered concurrently. 1 keeps strict manifest order on one page.
    pub prerender_concurrency: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dist"),
            blog_dir: PathBuf::from("blog"),
            preview_port: 4173,
            routes: RouteManifest::default(),
            csp: CspRequirements::default(),
            host_fixes: vec![HostFix::default()],
            recovery: RecoveryConfig::default(),
            placeholder_assets: vec![
                PathBuf::from("fonts/inter-var.woff2"),
                PathBuf::from("fonts/inter-var-latin.woff2"),
                PathBuf::from("favicon.ico"),
                PathBuf::from("images/cat-placeholder.svg"),
            ],
            supabase: SupabaseConfig::default(),
            bundler: CommandConfig::new("npx", &["vite", "build"], 600),
            preview: CommandConfig::new(
                "npx",
                &["vite", "preview", "--port", "{port}", "--strictPort"],
                0,
            ),
            browser: BrowserConfig::default(),
            server_retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 10_000,
                max_delay_ms: 40_000,
                exponential: true,
            },
            route_retry: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 10_000,
                max_delay_ms: 10_000,
                exponential: false,
            },
            readiness: ReadinessPolicy::default(),
            shutdown_grace_ms: 5_000,
            max_route_failure_ratio: 0.5,
            prerender_concurrency: 1,
        }
    }
}

impl SiteConfig {
    /// Load configuration.
    ///
    /// Reads `path` if given, else `sitefix.json` when it exists, else the
    /// defaults; then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("no config file, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SiteFixError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Both the plain and the `VITE_`-prefixed credential names are honoured;
    /// the plain name wins.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = first_set(&lookup, &["SUPABASE_URL", "VITE_SUPABASE_URL"]) {
            self.supabase.url = Some(url);
        }
        if let Some(key) = first_set(&lookup, &["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"]) {
            self.supabase.anon_key = Some(key);
        }
        if let Some(port) = first_set(&lookup, &["SITEFIX_PORT"]).and_then(|p| p.parse().ok()) {
            self.preview_port = port;
        }
        if let Some(chrome) = first_set(&lookup, &["SITEFIX_CHROME"]) {
            self.browser.executable = Some(PathBuf::from(chrome));
        }
    }

    /// Reject values the pipelines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_route_failure_ratio) {
            return Err(SiteFixError::Configuration(format!(
                "max_route_failure_ratio must be within 0..=1, got {}",
                self.max_route_failure_ratio
            )));
        }
        if self.prerender_concurrency == 0 {
            return Err(SiteFixError::Configuration(
                "prerender_concurrency must be at least 1".into(),
            ));
        }
        if self.server_retry.max_attempts == 0 || self.route_retry.max_attempts == 0 {
            return Err(SiteFixError::Configuration(
                "retry policies need at least one attempt".into(),
            ));
        }
        if self.bundler.program.is_empty() || self.preview.program.is_empty() {
            return Err(SiteFixError::Configuration(
                "bundler and preview commands must name a program".into(),
            ));
        }
        Ok(())
    }

    /// Supabase URL and anon key, or a configuration error naming what is
    /// missing.
    pub fn require_supabase(&self) -> Result<(&str, &str)> {
        match (self.supabase.url.as_deref(), self.supabase.anon_key.as_deref()) {
            (Some(url), Some(key)) => Ok((url, key)),
            (None, _) => Err(SiteFixError::Configuration(
                "SUPABASE_URL is not set".into(),
            )),
            (_, None) => Err(SiteFixError::Configuration(
                "SUPABASE_ANON_KEY is not set".into(),
            )),
        }
    }

    pub fn blog_root(&self) -> PathBuf {
        self.output_dir.join(&self.blog_dir)
    }

    /// Base URL of the preview server.
    pub fn preview_base_url(&self) -> String {
        format!("http://localhost:{}", self.preview_port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .find_map(|k| lookup(k).filter(|v| !v.is_empty()))
}

/// Rewrite of a host fragment left behind by an unresolved accessor call.
///
/// `https://<ref>.<broken>` and `wss://<ref>.<broken>` become
/// `<scheme>://<ref>.<replacement>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostFix {
    pub broken: String,
    pub replacement: String,
}

impl Default for HostFix {
    fn default() -> Self {
        Self {
            broken: "getSupabaseClient().co".to_string(),
            replacement: "supabase.co".to_string(),
        }
    }
}

/// Options for the browser-side recovery script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,

    /// Attribute marking the injected `<script>` tag.
    pub marker_attr: String,

    /// Attribute the script sets on nodes it already fixed.
    pub fixed_attr: String,

    /// File name used when the script has to be served externally.
    pub script_file: String,

    /// API hosts that only appear in placeholder builds; preloads are removed.
    pub placeholder_api_hosts: Vec<String>,

    /// Image hosts whose failures fall back to `fallback_image`.
    pub fallback_image_hosts: Vec<String>,

    pub fallback_image: String,

    /// Second pass after `DOMContentLoaded`.
    pub recheck_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            marker_attr: "data-sitefix-recovery".to_string(),
            fixed_attr: "data-sitefix-fixed".to_string(),
            script_file: "sitefix-recovery.js".to_string(),
            placeholder_api_hosts: vec![
                "placeholder.supabase.co".to_string(),
                "your-project.supabase.co".to_string(),
            ],
            fallback_image_hosts: vec![
                "images.unsplash.com".to_string(),
                "i.imgur.com".to_string(),
            ],
            fallback_image: "/images/cat-placeholder.svg".to_string(),
            recheck_delay_ms: 1_500,
        }
    }
}

/// Hosted backend credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

/// An external command: program, arguments and timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// 0 disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl CommandConfig {
    pub fn new(program: &str, args: &[&str], timeout_secs: u64) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
        }
    }

    /// Arguments with `{port}` substituted.
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Headless browser settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserConfig {
    /// Explicit Chrome/Chromium binary. Looked up on `PATH` when unset.
    pub executable: Option<PathBuf>,

    /// Extra command-line switches.
    pub extra_args: Vec<String>,

    /// `id` of the element the app renders into.
    pub root_element_id: String,

    pub navigation_timeout_ms: u64,

    /// Budget for the root container to become non-empty.
    pub ready_timeout_ms: u64,

    /// Extra wait after readiness for late async rendering.
    pub settle_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            extra_args: Vec::new(),
            root_element_id: "root".to_string(),
            navigation_timeout_ms: 60_000,
            ready_timeout_ms: 30_000,
            settle_ms: 5_000,
        }
    }
}

/// Bounded retry with fixed or exponential backoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: bool,
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            exponential: false,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = if self.exponential {
            let shift = attempt.saturating_sub(1).min(20);
            self.base_delay_ms.saturating_mul(1u64 << shift)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(ms.min(self.max_delay_ms.max(self.base_delay_ms)))
    }
}

/// Readiness probing: an initial wait, then polls with exponential backoff,
/// all under a single deadline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub initial_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub max_interval_ms: u64,
    pub deadline_ms: u64,
    /// Per-probe HTTP timeout.
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            poll_interval_ms: 250,
            max_interval_ms: 4_000,
            deadline_ms: 20_000,
            probe_timeout_ms: 2_000,
        }
    }
}

impl ReadinessPolicy {
    /// Interval before poll number `poll` (1-based).
    pub fn interval_for(&self, poll: u32) -> Duration {
        let shift = poll.saturating_sub(1).min(20);
        let ms = self
            .poll_interval_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_interval_ms.max(self.poll_interval_ms));
        Duration::from_millis(ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}
