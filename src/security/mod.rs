//! Cell-level access control: visibility expressions, authorizations, and the
//! cached evaluator that decides read permission.

mod authorizations;
mod evaluator;
mod visibility;

use thiserror::Error;

pub use authorizations::{Authorizations, User};
pub use evaluator::{VisibilityEvaluator, DEFAULT_VISIBILITY_CACHE_CAPACITY};
pub use visibility::{can_read, Visibility, VisibilityExpr, MAX_NESTING_DEPTH};

/// Security failures. Both are fatal and surfaced to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// The expression does not follow the visibility grammar.
    #[error("malformed visibility {expression:?} at byte {position}: {reason}")]
    MalformedVisibility {
        /// The offending expression.
        expression: String,
        /// Byte offset where parsing stopped.
        position: usize,
        /// Parser diagnostic.
        reason: &'static str,
    },
    /// A writer tried to label data with a visibility it cannot itself read.
    #[error("user {user:?} cannot write visibility {visibility:?}")]
    UnauthorizedWrite {
        /// Writer name.
        user: String,
        /// Visibility the writer lacks.
        visibility: String,
    },
}
