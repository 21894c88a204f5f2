//! Headless Chrome backend.
//!
//! Each DOM read is one `chrome --headless=new --dump-dom` invocation with a
//! virtual time budget: Chrome runs the page's scripts for that much virtual
//! time, then prints the serialized DOM. Waiting for the app root means
//! re-dumping with a doubled budget until the root has content or the wait
//! runs out. Every page gets its own throwaway profile directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sitefix_core::BrowserConfig;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::browser::{
    root_has_content, Browser, BrowserError, BrowserLauncher, BrowserPage, BrowserResult,
};

/// Executable names tried on `PATH` when none is configured.
pub const CHROME_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

/// Virtual time granted to the first dump after navigation.
const INITIAL_BUDGET_MS: u64 = 2_000;

/// Resolve the browser binary: the configured one (a path or a name on
/// `PATH`), else the first candidate found on `PATH`.
pub fn resolve_executable(configured: Option<&Path>, candidates: &[&str]) -> BrowserResult<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return which::which(path)
            .map_err(|_| BrowserError::NotFound(path.display().to_string()));
    }
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| BrowserError::NotFound(candidates.join(", ")))
}

/// Launches [`ChromeBrowser`] instances.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    candidates: Vec<String>,
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self {
            candidates: CHROME_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, config: &BrowserConfig) -> BrowserResult<Box<dyn Browser>> {
        let candidates: Vec<&str> = self.candidates.iter().map(String::as_str).collect();
        let executable = resolve_executable(config.executable.as_deref(), &candidates)?;

        // Fail fast on a binary that cannot even report its version.
        let version = Command::new(&executable)
            .arg("--version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", executable.display())))?;
        if !version.status.success() {
            return Err(BrowserError::Launch(format!(
                "{} --version exited with {}",
                executable.display(),
                version.status
            )));
        }
        info!(
            executable = %executable.display(),
            version = %String::from_utf8_lossy(&version.stdout).trim(),
            "headless browser ready"
        );

        Ok(Box::new(ChromeBrowser {
            executable,
            extra_args: config.extra_args.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// A Chrome binary plus the switches every dump uses.
#[derive(Debug)]
pub struct ChromeBrowser {
    executable: PathBuf,
    extra_args: Vec<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let profile = tempfile::Builder::new().prefix("sitefix-chrome-").tempdir()?;
        Ok(Box::new(ChromePage {
            executable: self.executable.clone(),
            extra_args: self.extra_args.clone(),
            profile,
            browser_closed: Arc::clone(&self.closed),
            url: None,
            budget_ms: INITIAL_BUDGET_MS,
            navigation_timeout: Duration::from_secs(60),
            dom: None,
        }))
    }

    async fn close(&self) -> BrowserResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ChromePage {
    executable: PathBuf,
    extra_args: Vec<String>,
    profile: TempDir,
    browser_closed: Arc<AtomicBool>,
    url: Option<String>,
    budget_ms: u64,
    navigation_timeout: Duration,
    dom: Option<String>,
}

impl ChromePage {
    fn dump_args(&self, url: &str) -> Vec<String> {
        dump_args(&self.profile.path().display().to_string(), self.budget_ms, &self.extra_args, url)
    }

    /// Wall-clock allowance for one dump. Virtual time does not map to wall
    /// time, so both are allowed on top of each other.
    fn dump_limit(&self) -> Duration {
        self.navigation_timeout + Duration::from_millis(self.budget_ms)
    }

    async fn dump(&mut self, limit: Duration) -> BrowserResult<()> {
        if self.browser_closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let url = self.url.clone().ok_or_else(|| BrowserError::Navigation {
            url: String::new(),
            reason: "no page loaded".to_string(),
        })?;
        debug!(url = %url, budget_ms = self.budget_ms, "dumping DOM");

        let child = Command::new(&self.executable)
            .args(self.dump_args(&url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| BrowserError::Timeout {
                what: format!("DOM of {url}"),
                timeout_ms: limit.as_millis() as u64,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BrowserError::Navigation {
                url,
                reason: format!(
                    "browser exited with {}: {}",
                    output.status,
                    stderr.lines().last().unwrap_or_default()
                ),
            });
        }
        self.dom = Some(String::from_utf8_lossy(&output.stdout).into_owned());
        Ok(())
    }
}

/// Command line for one DOM dump.
fn dump_args(profile_dir: &str, budget_ms: u64, extra_args: &[String], url: &str) -> Vec<String> {
    let mut args = vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--hide-scrollbars".to_string(),
        "--no-first-run".to_string(),
        format!("--user-data-dir={profile_dir}"),
        format!("--virtual-time-budget={budget_ms}"),
    ];
    args.extend(extra_args.iter().cloned());
    args.push("--dump-dom".to_string());
    args.push(url.to_string());
    args
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        self.url = Some(url.to_string());
        self.budget_ms = INITIAL_BUDGET_MS;
        self.navigation_timeout = timeout;
        self.dom = None;
        self.dump(self.dump_limit()).await
    }

    async fn wait_for_root(&mut self, root_id: &str, timeout: Duration) -> BrowserResult<()> {
        let started = Instant::now();
        loop {
            if self.dom.as_deref().is_some_and(|dom| root_has_content(dom, root_id)) {
                return Ok(());
            }
            let root_timeout = || BrowserError::Timeout {
                what: format!("#{root_id} to render"),
                timeout_ms: timeout.as_millis() as u64,
            };
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(root_timeout());
            }
            let remaining = timeout - elapsed;
            let remaining_ms = remaining.as_millis() as u64;
            self.budget_ms = (self.budget_ms * 2).min(self.budget_ms + remaining_ms.max(1));

            // No single dump may outlive the overall wait.
            let limit = self.dump_limit().min(remaining);
            match self.dump(limit).await {
                Err(BrowserError::Timeout { .. }) if limit == remaining => return Err(root_timeout()),
                other => other?,
            }
        }
    }

    async fn settle(&mut self, delay: Duration) -> BrowserResult<()> {
        if delay.is_zero() {
            return Ok(());
        }
        self.budget_ms += delay.as_millis() as u64;
        self.dump(self.dump_limit()).await
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.dom.clone().ok_or_else(|| BrowserError::Navigation {
            url: self.url.clone().unwrap_or_default(),
            reason: "no DOM captured".to_string(),
        })
    }
}
