//! Output tree traversal.

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// Recursively collect every `.html` file under `root`, sorted.
///
/// A missing root yields an empty list. Symlinked directories are not
/// followed. An unreadable root is an error; an unreadable subdirectory is
/// logged and skipped so one bad directory cannot stop a whole pass.
pub fn find_html_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if root.is_dir() {
        let entries = std::fs::read_dir(root)?;
        walk(entries, &mut files);
    }
    files.sort();
    Ok(files)
}

/// Depth-first; `DirEntry::file_type` does not follow symlinks.
fn walk(entries: ReadDir, files: &mut Vec<PathBuf>) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => match std::fs::read_dir(&path) {
                Ok(sub) => walk(sub, files),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable directory"),
            },
            Ok(_) if is_html(&path) => files.push(path),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot stat entry; skipping"),
        }
    }
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("html"))
        .unwrap_or(false)
}
