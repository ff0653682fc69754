//! Shared identifiers, timestamps and the crate-wide error type.
#![forbid(unsafe_code)]

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::security::SecurityError;

/// Logical write time attached to every mutation, in milliseconds.
///
/// Per element, timestamps never decrease in append order.
pub type Timestamp = u64;

/// Kind of graph element a log belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// A vertex.
    Vertex,
    /// An edge.
    Edge,
}

impl ElementType {
    /// Single-character tag used in cursors and the journal codec.
    pub const fn as_char(self) -> char {
        match self {
            ElementType::Vertex => 'v',
            ElementType::Edge => 'e',
        }
    }

    /// Parses the single-character tag produced by [`ElementType::as_char`].
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'v' => Some(ElementType::Vertex),
            'e' => Some(ElementType::Edge),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Vertex => write!(f, "vertex"),
            ElementType::Edge => write!(f, "edge"),
        }
    }
}

/// Caller-assigned element identifier.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        ElementId(value.to_owned())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        ElementId(value)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Edge direction relative to a vertex.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges whose out-vertex is the subject vertex.
    Out,
    /// Edges whose in-vertex is the subject vertex.
    In,
    /// Either direction.
    Both,
}

impl Direction {
    /// Returns `true` when an edge stored under `stored` satisfies this filter.
    pub fn matches(self, stored: Direction) -> bool {
        matches!(
            (self, stored),
            (Direction::Both, _) | (Direction::Out, Direction::Out) | (Direction::In, Direction::In)
        )
    }

    /// Direction seen from the other endpoint.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => Direction::Both,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// Errors surfaced by the engine. None of them are retried internally.
#[derive(thiserror::Error, Debug)]
pub enum PenumbraError {
    /// Backend I/O failure, propagated unchanged.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted data could not be decoded.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Visibility parse failure or unauthorized write.
    #[error("security: {0}")]
    Security(#[from] SecurityError),
    /// An accessor was called for data the fetch hints never requested.
    #[error("missing fetch hint: {0}")]
    MissingFetchHint(String),
    /// The log contradicts itself, which indicates a writer bug.
    #[error("invariant violation on {element}: {reason}")]
    InvariantViolation {
        /// Element whose log is inconsistent (`type:id`).
        element: String,
        /// What was violated.
        reason: String,
    },
    /// A writer referenced an element that does not exist for the caller.
    #[error("not found: {0}")]
    NotFound(String),
    /// No store factory or config for the requested backend.
    #[error("config: {0}")]
    Config(String),
}

impl PenumbraError {
    pub(crate) fn invariant(
        element_type: ElementType,
        id: &ElementId,
        reason: impl Into<String>,
    ) -> Self {
        PenumbraError::InvariantViolation {
            element: format!("{}:{}", element_type, id),
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;
