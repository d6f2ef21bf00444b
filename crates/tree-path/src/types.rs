//! Type definitions for structural paths.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of a structural path.
///
/// Either a property name (object key) or a numeric index (array element).
/// Serializes untagged, so a path encodes as a plain JSON array such as
/// `["todos", 0, "title"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

/// A structural path from some node down to a location inside it.
pub type Path = Vec<PathSegment>;

impl PathSegment {
    /// Interpret the segment as an array index.
    ///
    /// Keys are accepted when they are canonical non-negative integers, so
    /// segments parsed from a JSON Pointer still address array elements.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(k) if crate::is_valid_index(k) => k.parse().ok(),
            PathSegment::Key(_) => None,
        }
    }

    /// Interpret the segment as an object key.
    pub fn as_key(&self) -> String {
        match self {
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(k) => k.clone(),
        }
    }

    /// Returns true if both segments address the same location once
    /// resolved against a container.
    pub fn same_location(&self, other: &PathSegment) -> bool {
        self.as_key() == other.as_key()
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => f.write_str(k),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

impl From<&str> for PathSegment {
    fn from(k: &str) -> Self {
        PathSegment::Key(k.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(k: String) -> Self {
        PathSegment::Key(k)
    }
}

impl From<&String> for PathSegment {
    fn from(k: &String) -> Self {
        PathSegment::Key(k.clone())
    }
}
