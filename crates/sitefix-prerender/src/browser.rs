//! Headless browser seam.
//!
//! The prerender loop only needs four things from a browser: open a page,
//! navigate, wait for the app root to fill in, and read back the DOM. These
//! traits keep the loop independent of the engine so tests can script it.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sitefix_core::{BrowserConfig, SiteFixError};
use thiserror::Error;

/// Errors raised by a browser implementation.
#[derive(Error, Debug)]
pub enum BrowserError {
    /// No usable browser executable
    #[error("no browser executable found (tried: {0})")]
    NotFound(String),

    /// The browser process could not be started
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Navigation failed
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// A wait ran out
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    /// Used after close
    #[error("browser is closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BrowserError> for SiteFixError {
    fn from(err: BrowserError) -> Self {
        SiteFixError::Browser(err.to_string())
    }
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// A single browser tab.
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate to `url` and wait for the network to go idle.
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()>;

    /// Wait until the element with id `root_id` has child content.
    async fn wait_for_root(&mut self, root_id: &str, timeout: Duration) -> BrowserResult<()>;

    /// Give late client-side work time to finish.
    async fn settle(&mut self, delay: Duration) -> BrowserResult<()>;

    /// Serialized DOM of the current document.
    async fn content(&mut self) -> BrowserResult<String>;

    async fn close(&mut self) -> BrowserResult<()> {
        Ok(())
    }
}

/// A running browser instance.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>>;

    /// Release the browser. Must be safe to call more than once.
    async fn close(&self) -> BrowserResult<()>;
}

/// Starts browsers.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> BrowserResult<Box<dyn Browser>>;
}

static ROOT_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<[a-z][a-z0-9-]*\s[^>]*\bid\s*=\s*["']?([A-Za-z0-9_-]+)["']?[^>]*>"#)
        .expect("root element regex is valid")
});

/// Whether the element with id `root_id` has any non-whitespace content
/// right after its opening tag.
pub fn root_has_content(html: &str, root_id: &str) -> bool {
    ROOT_OPEN_RE
        .captures_iter(html)
        .find(|c| c.get(1).is_some_and(|m| m.as_str() == root_id))
        .and_then(|c| c.get(0))
        .map(|open| {
            let rest = html[open.end()..].trim_start();
            !rest.is_empty() && !rest.starts_with("</")
        })
        .unwrap_or(false)
}
