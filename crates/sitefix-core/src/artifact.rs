//! HTML artifacts on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{Result, SiteFixError};

/// An HTML file produced by the bundler or by prerendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlArtifact {
    pub path: PathBuf,
    pub content: String,
}

impl HtmlArtifact {
    /// Read an artifact. Non-UTF-8 content is a [`SiteFixError::FilePatch`].
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| file_error(path, &e))?;
        let content = String::from_utf8(bytes).map_err(|e| file_error(path, &e))?;
        Ok(Self {
            path: path.to_path_buf(),
            content,
        })
    }

    /// SHA-256 of the content, hex encoded.
    pub fn digest(&self) -> String {
        content_digest(self.content.as_bytes())
    }
}

/// SHA-256 of `data`, hex encoded.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write `data` to `path` atomically: temp file in the same directory, then
/// rename. Parent directories are created.
///
/// The result keeps the permissions of the file it replaces; new files are
/// world-readable (0644) so a web server running as another user can serve
/// them.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| file_error(path, &e))?;
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| file_error(path, &e))?;
    tmp.write_all(data).map_err(|e| file_error(path, &e))?;
    if let Some(perms) = target_permissions(path)? {
        tmp.as_file()
            .set_permissions(perms)
            .map_err(|e| file_error(path, &e))?;
    }
    tmp.persist(path).map_err(|e| file_error(path, &e.error))?;
    Ok(())
}

/// Permissions for the file about to land at `path`: those of the file it
/// replaces, else the platform default for new files.
fn target_permissions(path: &Path) -> Result<Option<fs::Permissions>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.permissions())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(new_file_permissions()),
        Err(e) => Err(file_error(path, &e)),
    }
}

#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

/// Write only when the on-disk content differs. Returns `true` on write.
pub fn write_if_changed(path: &Path, data: &[u8]) -> Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == data => Ok(false),
        _ => write_atomic(path, data).map(|_| true),
    }
}

pub(crate) fn file_error(path: &Path, err: &dyn std::fmt::Display) -> SiteFixError {
    SiteFixError::FilePatch {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
