//! Helpers for logical request paths (`/a/b/`), following directory-style
//! semantics: a trailing `/` refers to a directory, the parent of `/a/b/` is `/a`.

use anyhow::{bail, Result};

/// Parent directory of a logical path, without trailing separator.
/// `/a/b` -> `/a`, `/a/b/` -> `/a/b`, `/a` -> `/`.
pub fn parent_dir(path: &str) -> String {
    let cut = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    };
    let cut = cut.trim_end_matches('/');
    if cut.is_empty() { "/".to_string() } else { cut.to_string() }
}

/// Last segment of a logical path, ignoring trailing separators.
/// `/a/b/` -> `b`, `/` -> `/`.
pub fn base_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Join a directory path and a relative name with exactly one separator.
pub fn join(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.ends_with('/') { format!("{}{}", dir, name) } else { format!("{}/{}", dir, name) }
}

/// Ensure a directory path ends with a separator.
pub fn as_dir(path: &str) -> String {
    if path.ends_with('/') { path.to_string() } else { format!("{}/", path) }
}

/// Canonical spelling of a logical path: runs of '/' collapse to one and the
/// result is rooted. `//items///` -> `/items/`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for c in path.chars() {
        if c == '/' && out.ends_with('/') { continue; }
        out.push(c);
    }
    out
}

/// Validate a decoded request path:
/// - must start with '/'
/// - NUL, control characters and '\\' are not allowed
/// - segments '.' and '..' are not allowed
pub fn validate_request_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("request path must be absolute");
    }
    if path.chars().any(|c| c.is_control()) {
        bail!("request path cannot contain control characters");
    }
    if path.contains('\\') {
        bail!("request path cannot contain '\\'");
    }
    for seg in path.split('/') {
        if seg == "." || seg == ".." {
            bail!("segments '.' and '..' are not allowed");
        }
    }
    Ok(())
}

/// Validate a path relative to an instance directory (script file names,
/// relocation suffixes, generated ids). A single trailing '/' is accepted.
pub fn validate_relative(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("relative path cannot be empty");
    }
    if path.starts_with('/') {
        bail!("relative path cannot start with '/'");
    }
    if path.chars().any(|c| c.is_control()) {
        bail!("relative path cannot contain control characters");
    }
    if path.contains('\\') || path.contains('?') || path.contains('#') {
        bail!("relative path cannot contain '\\', '?' or '#'");
    }
    let body = path.strip_suffix('/').unwrap_or(path);
    for seg in body.split('/') {
        if seg.is_empty() {
            bail!("empty segment in relative path");
        }
        if seg == "." || seg == ".." {
            bail!("segments '.' and '..' are not allowed");
        }
    }
    Ok(())
}

/// Validate a single path segment such as an instance id.
pub fn validate_segment(seg: &str) -> Result<()> {
    validate_relative(seg)?;
    if seg.contains('/') {
        bail!("'{}' is not a single path segment", seg);
    }
    Ok(())
}
