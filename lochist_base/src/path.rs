//! Path algebra for history paths.
//!
//! History paths are absolute, `/`-separated and normalized: a single leading `/`, no empty
//! segments and no trailing separator. The root is `/`.

use thiserror::Error;

pub const SEPARATOR: char = '/';
pub const ROOT: &str = "/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty name")]
    EmptyName,

    #[error("name {} contains a separator", .0)]
    SeparatorInName(String),

    #[error("{} is not a valid name", .0)]
    ReservedName(String),
}

/// Normalizes any `/`-separated path into history form.
pub fn normalize(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split(SEPARATOR).filter(|s| !s.is_empty()) {
        normalized.push(SEPARATOR);
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push(SEPARATOR);
    }
    normalized
}

pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Parent of a normalized path, None for the root.
pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a normalized path, empty for the root.
pub fn name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join(parent: &str, name: &str) -> String {
    if name.is_empty() {
        return parent.to_string();
    }
    if is_root(parent) {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Replaces the last segment of `path`.
pub fn with_name(path: &str, name: &str) -> String {
    join(parent(path).unwrap_or(ROOT), name)
}

pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() {
        return Err(PathError::EmptyName);
    }
    if name.contains(SEPARATOR) {
        return Err(PathError::SeparatorInName(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(PathError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Strict ancestry: `/a` is an ancestor of `/a/b`, not of `/ab` nor of itself.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == path {
        return false;
    }
    if is_root(ancestor) {
        return true;
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == SEPARATOR as u8
}

pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    ancestor == path || is_ancestor(ancestor, path)
}

/// True when one path contains the other.
pub fn is_related(a: &str, b: &str) -> bool {
    is_ancestor_or_self(a, b) || is_ancestor_or_self(b, a)
}

/// Moves `path` from under `from` to under `to`, None if `path` is not inside `from`.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    if !is_ancestor(from, path) {
        return None;
    }
    let rest = if is_root(from) {
        &path[1..]
    } else {
        &path[from.len() + 1..]
    };
    Some(join(to, rest))
}

/// Path of `path` relative to `base`, empty when equal.
pub fn relative<'a>(base: &str, path: &'a str) -> Option<&'a str> {
    if base == path {
        return Some("");
    }
    if !is_ancestor(base, path) {
        return None;
    }
    if is_root(base) {
        Some(&path[1..])
    } else {
        Some(&path[base.len() + 1..])
    }
}

pub fn depth(path: &str) -> usize {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).count()
}
