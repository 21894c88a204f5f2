//! Error types for sitefix

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the build, prerender and patch pipelines.
#[derive(Error, Debug)]
pub enum SiteFixError {
    /// Bundler exited non-zero
    #[error("bundler failed with exit code {exit_code}")]
    BuildFailure { exit_code: i32 },

    /// Preview server never became ready
    #[error("preview server failed to start after {attempts} attempt(s): {reason}")]
    ServerStartFailure { attempts: u32, reason: String },

    /// A route (or the whole prerender batch) failed validation
    #[error("prerender of {route} failed after {attempts} attempt(s): {reason}")]
    RoutePrerenderFailure {
        route: String,
        attempts: u32,
        reason: String,
    },

    /// Read or write failure on a single file
    #[error("failed to patch {}: {reason}", path.display())]
    FilePatch { path: PathBuf, reason: String },

    /// Missing or invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Headless browser failure
    #[error("browser error: {0}")]
    Browser(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Run cancelled (Ctrl-C) after releasing what it had started
    #[error("interrupted")]
    Interrupted,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for sitefix operations.
pub type Result<T> = std::result::Result<T, SiteFixError>;
