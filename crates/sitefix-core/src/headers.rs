//! CSP augmentation for a static host `_headers` file.
//!
//! Lines of the form `  Content-Security-Policy: <policy>` get the same
//! token requirements as the `<meta>` policies. Indentation and every other
//! line are preserved.

use std::path::Path;

use crate::artifact::{self, file_error};
use crate::csp::{CspPolicy, CspRequirements};
use crate::error::Result;

pub const HEADERS_FILE: &str = "_headers";

const CSP_HEADER: &str = "content-security-policy:";

/// Augment every CSP header line in `text`. Returns `None` when nothing
/// needed adding.
pub fn augment_headers(text: &str, requirements: &CspRequirements) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = text
        .split_inclusive('\n')
        .map(|line| match augment_line(line, requirements) {
            Some(patched) => {
                changed = true;
                patched
            }
            None => line.to_string(),
        })
        .collect();
    changed.then(|| lines.concat())
}

fn augment_line(line: &str, requirements: &CspRequirements) -> Option<String> {
    let body = line.trim_end_matches(['\n', '\r']);
    let ending = &line[body.len()..];
    let indent_len = body.len() - body.trim_start().len();
    let rest = &body[indent_len..];
    let name = rest.get(..CSP_HEADER.len())?;
    if !name.eq_ignore_ascii_case(CSP_HEADER) {
        return None;
    }
    let mut policy = CspPolicy::parse(&rest[CSP_HEADER.len()..]);
    if policy.apply(requirements) == 0 {
        return None;
    }
    Some(format!("{}{} {}{}", &body[..indent_len], name, policy, ending))
}

/// Patch `<root>/_headers` if it exists. Returns `true` when written.
pub fn patch_headers_file(root: &Path, requirements: &CspRequirements) -> Result<bool> {
    let path = root.join(HEADERS_FILE);
    if !path.is_file() {
        return Ok(false);
    }
    let text = std::fs::read_to_string(&path).map_err(|e| file_error(&path, &e))?;
    match augment_headers(&text, requirements) {
        Some(patched) => {
            artifact::write_atomic(&path, patched.as_bytes())?;
            Ok(true)
        }
        None => Ok(false),
    }
}
