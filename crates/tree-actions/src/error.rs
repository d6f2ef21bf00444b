//! Error taxonomy shared by the whole engine.

use serde_json::Value;
use thiserror::Error;

/// Errors raised by the state tree, the dispatcher and the services built on
/// top of it.
///
/// The first three kinds are structural and are raised at the point of
/// violation. `Raised` carries failures produced by action bodies and
/// interceptors; it travels through the middleware chain unchanged unless an
/// interceptor decides otherwise.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("NOT_A_TREE_NODE: {path}")]
    NotATreeNode { path: String },
    #[error("PROTECTED_TREE: cannot modify {path} outside of an action")]
    ProtectedTree { path: String },
    #[error("INVALID_PATCH_PATH: {path}")]
    InvalidPatchPath { path: String },
    #[error("NOTHING_TO_UNDO")]
    NothingToUndo,
    #[error("NOTHING_TO_REDO")]
    NothingToRedo,
    #[error("UNKNOWN_ACTION: {name}")]
    UnknownAction { name: String },
    #[error("FLOW_NOT_SUSPENDED: {name}")]
    FlowNotSuspended { name: String },
    #[error("ACTION_SKIPPED: {name}")]
    ActionSkipped { name: String },
    #[error("{0}")]
    Raised(String),
}

impl Error {
    /// Build an operation error with the given message.
    pub fn raise(message: impl Into<String>) -> Self {
        Error::Raised(message.into())
    }

    /// Returns true for the structural kinds callers must prevent by
    /// construction.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::NotATreeNode { .. } | Error::ProtectedTree { .. } | Error::InvalidPatchPath { .. }
        )
    }

    /// Render the error as a JSON value, used as the argument of a
    /// `FlowThrow` or `FlowResumeError` step.
    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of an action invocation: the body's return value or the error
/// that terminated it.
pub type ActionResult = Result<Value>;
