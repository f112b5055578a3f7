use alloc::string::String;
use alloc::vec::Vec;

use thiserror::Error;

use crate::TransformPath;

// -----------------------------------------------------------------------------
// DispatchError

/// Reasons a [`Dispatcher`](crate::Dispatcher) could not select a rule.
///
/// None of these are retried; they propagate to the caller of the
/// outermost transformation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("no rules are registered for path `{path}`")]
    UnknownPath { path: TransformPath },

    #[error("no rule registered for path `{path}` applies to {value}")]
    NoApplicableRule { path: TransformPath, value: String },

    #[error("rules {rules:?} on path `{path}` are all applicable to {value} at priority {priority}")]
    AmbiguousRule {
        path: TransformPath,
        value: String,
        priority: i32,
        /// Names of the contending rules, sorted.
        rules: Vec<String>,
    },
}

impl DispatchError {
    /// Returns the path the failed dispatch was made on.
    pub fn path(&self) -> &TransformPath {
        match self {
            Self::UnknownPath { path }
            | Self::NoApplicableRule { path, .. }
            | Self::AmbiguousRule { path, .. } => path,
        }
    }
}
