//! Path and pattern algebra.
//!
//! Paths are `/`-rooted with segments over `[A-Za-z0-9_.-]`. Patterns add
//! two trailing wildcards: `base/*` (one more segment) and `base/**`
//! (anything below, including the base itself). `is_under` is the single
//! prefix-containment predicate used for listing, mount resolution, and
//! result rewriting; it is segment-boundary safe so `/foo` never captures
//! `/foobar`.

use crate::error::{NineError, NineResult};

/// The root path.
pub const ROOT: &str = "/";

fn segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

fn check_segment(seg: &str, full: &str) -> NineResult<()> {
    if seg.is_empty() {
        return Err(NineError::InvalidPath(format!("empty segment in '{full}'")));
    }
    if seg == "." || seg == ".." {
        return Err(NineError::InvalidPath(format!("relative segment in '{full}'")));
    }
    if !seg.chars().all(segment_char) {
        return Err(NineError::InvalidPath(format!("illegal character in '{full}'")));
    }
    Ok(())
}

/// Validate a path against the grammar `"/" | "/" seg ("/" seg)*`.
pub fn validate_path(path: &str) -> NineResult<()> {
    if path.is_empty() {
        return Err(NineError::InvalidPath("empty path".into()));
    }
    if !path.starts_with('/') {
        return Err(NineError::InvalidPath(format!("'{path}' is not absolute")));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(NineError::InvalidPath(format!("trailing slash in '{path}'")));
    }
    for seg in path[1..].split('/') {
        check_segment(seg, path)?;
    }
    Ok(())
}

/// Validate a watch pattern: a plain path, or a path with a trailing `*`
/// or `**` segment.
pub fn validate_pattern(pattern: &str) -> NineResult<()> {
    if let Some(base) = pattern.strip_suffix("/**").or_else(|| pattern.strip_suffix("/*")) {
        if base.is_empty() {
            // "/*" and "/**" watch directly under the root.
            return Ok(());
        }
        return validate_path(base);
    }
    validate_path(pattern)
}

/// Segment-boundary-safe prefix containment.
///
/// True iff `prefix` is `/`, or `path == prefix`, or `path` continues
/// `prefix` at a `/` boundary.
pub fn is_under(prefix: &str, path: &str) -> bool {
    if prefix == ROOT {
        return true;
    }
    if path == prefix {
        return true;
    }
    path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// Match a key against a watch pattern.
///
/// - exact patterns match only themselves;
/// - `base/*` matches exactly one further segment;
/// - `base/**` matches the base and anything below it.
pub fn matches(pattern: &str, key: &str) -> bool {
    if let Some(base) = pattern.strip_suffix("/**") {
        let base = if base.is_empty() { ROOT } else { base };
        return is_under(base, key);
    }
    if let Some(base) = pattern.strip_suffix("/*") {
        let base = if base.is_empty() { ROOT } else { base };
        if !is_under(base, key) || key == base {
            return false;
        }
        let rest = if base == ROOT { &key[1..] } else { &key[base.len() + 1..] };
        return !rest.is_empty() && !rest.contains('/');
    }
    pattern == key
}

/// Normalize a mount path: ensure a leading `/`, strip a trailing `/`
/// except for the root, then validate.
pub fn normalize_mount(path: &str) -> NineResult<String> {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    validate_path(&normalized)?;
    Ok(normalized)
}

/// Rejoin a mount prefix and a mount-local path into a full path.
pub fn rejoin(mount: &str, local: &str) -> String {
    if mount == ROOT {
        local.to_string()
    } else if local == ROOT {
        mount.to_string()
    } else {
        format!("{mount}{local}")
    }
}
