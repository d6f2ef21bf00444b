//! Structural paths for state trees.
//!
//! A [`Path`] is an ordered list of [`PathSegment`]s leading from a node to a
//! location below it. Besides the segment type this crate carries the
//! [JSON Pointer (RFC 6901)](https://tools.ietf.org/html/rfc6901) text
//! encoding and the prefix arithmetic the state tree uses to decide subtree
//! membership and to re-base patch paths onto an ancestor.
//!
//! # Example
//!
//! ```
//! use tree_path::{format_json_pointer, parse_json_pointer, relative_to, PathSegment};
//!
//! let path = parse_json_pointer("/todos/0/title");
//! assert_eq!(format_json_pointer(&path), "/todos/0/title");
//!
//! let base = vec![PathSegment::from("todos")];
//! let rel = relative_to(&base, &path).unwrap();
//! assert_eq!(format_json_pointer(&rel), "/0/title");
//! ```

use thiserror::Error;

pub mod types;
pub use types::{Path, PathSegment};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("NO_PARENT")]
    NoParent,
    #[error("NOT_A_PREFIX")]
    NotAPrefix,
}

/// Unescapes a JSON Pointer path component.
///
/// Per RFC 6901, `~1` is replaced with `/` and `~0` is replaced with `~`.
///
/// ```
/// use tree_path::unescape_component;
///
/// assert_eq!(unescape_component("a~0b"), "a~b");
/// assert_eq!(unescape_component("c~1d"), "c/d");
/// ```
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    // ~1 before ~0
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes a JSON Pointer path component.
///
/// ```
/// use tree_path::escape_component;
///
/// assert_eq!(escape_component("a~b"), "a~0b");
/// assert_eq!(escape_component("c/d"), "c~1d");
/// ```
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Parse a JSON Pointer string into path segments.
///
/// Components that are canonical non-negative integers become
/// [`PathSegment::Index`]; everything else is a [`PathSegment::Key`].
/// The empty pointer is the root path.
pub fn parse_json_pointer(pointer: &str) -> Path {
    if pointer.is_empty() {
        return Vec::new();
    }
    let body = pointer.strip_prefix('/').unwrap_or(pointer);
    body.split('/')
        .map(|raw| {
            let component = unescape_component(raw);
            match is_valid_index(&component) {
                true => component
                    .parse()
                    .map(PathSegment::Index)
                    .unwrap_or(PathSegment::Key(component)),
                false => PathSegment::Key(component),
            }
        })
        .collect()
}

/// Format path segments as a JSON Pointer string.
///
/// ```
/// use tree_path::{format_json_pointer, PathSegment};
///
/// assert_eq!(format_json_pointer(&[]), "");
/// assert_eq!(format_json_pointer(&["a".into(), PathSegment::Index(2)]), "/a/2");
/// ```
pub fn format_json_pointer(path: &[PathSegment]) -> String {
    let mut out = String::with_capacity(path.len() * 8);
    for segment in path {
        out.push('/');
        match segment {
            PathSegment::Index(i) => out.push_str(&i.to_string()),
            PathSegment::Key(k) => out.push_str(&escape_component(k)),
        }
    }
    out
}

/// Check if a string is a canonical non-negative integer array index.
///
/// ```
/// use tree_path::is_valid_index;
///
/// assert!(is_valid_index("0"));
/// assert!(is_valid_index("123"));
/// assert!(!is_valid_index("01"));
/// assert!(!is_valid_index("-1"));
/// ```
pub fn is_valid_index(index: &str) -> bool {
    if index.is_empty() {
        return false;
    }
    let bytes = index.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_digit())
}

/// Check if `prefix` is `path` itself or one of its ancestors.
pub fn starts_with(path: &[PathSegment], prefix: &[PathSegment]) -> bool {
    prefix.len() <= path.len()
        && prefix
            .iter()
            .zip(path)
            .all(|(a, b)| a.same_location(b))
}

/// Check if two paths address the same location.
pub fn is_path_equal(p1: &[PathSegment], p2: &[PathSegment]) -> bool {
    p1.len() == p2.len() && starts_with(p1, p2)
}

/// Get the parent path of a given path.
pub fn parent(path: &[PathSegment]) -> Result<Path, PathError> {
    match path.split_last() {
        Some((_, rest)) => Ok(rest.to_vec()),
        None => Err(PathError::NoParent),
    }
}

/// Express `path` relative to its ancestor `base`.
///
/// Fails with [`PathError::NotAPrefix`] when `base` is not an ancestor-or-self
/// of `path`.
pub fn relative_to(base: &[PathSegment], path: &[PathSegment]) -> Result<Path, PathError> {
    if !starts_with(path, base) {
        return Err(PathError::NotAPrefix);
    }
    Ok(path[base.len()..].to_vec())
}

/// Concatenate a base path and a relative path.
pub fn join(base: &[PathSegment], rel: &[PathSegment]) -> Path {
    let mut out = Vec::with_capacity(base.len() + rel.len());
    out.extend_from_slice(base);
    out.extend_from_slice(rel);
    out
}
