//! Errors signalling modeling faults.
//!
//! Bugs of the *analyzed program* (invalid reads, writes, frees, leaks) are
//! not errors: they are recorded in the state's [`ErrorInfo`][crate::violation::ErrorInfo]
//! and returned as ordinary successor states. The variants below abort the
//! current exploration branch instead.

use std::sync::Arc;

use thiserror::Error;

use crate::types::{ObjectId, ValueId};

#[derive(Debug, Error)]
pub enum SmgError {
    /// A value was used without being added to the graph.
    #[error("value {0} is not part of the memory graph")]
    UnknownValue(ValueId),

    /// An object was used without being added to the graph.
    #[error("object {0} is not part of the memory graph")]
    UnknownObject(ObjectId),

    /// The consistency check found a broken invariant.
    #[error("inconsistent memory graph: {0}")]
    InconsistentGraph(String),

    /// A shutdown was requested while a long-running operation was in progress.
    #[error("interrupted by shutdown request")]
    Cancelled,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("variable `{0}` is already declared in this scope")]
    DuplicateVariable(Arc<str>),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("operation requires a stack frame, but the call stack is empty")]
    EmptyStack,

    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}

pub type Result<T, E = SmgError> = std::result::Result<T, E>;
