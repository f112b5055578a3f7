use alloc::string::String;
use std::io;

use thiserror::Error;

use crate::{IdentityToken, ObjectId};

// -----------------------------------------------------------------------------
// TokenError

/// Failures of token parsing and generation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    #[error("`{text}` is not a valid identity token")]
    InvalidToken { text: String },

    #[error("alphabet `{alphabet}` cannot be used for token rewriting: {reason}")]
    InvalidAlphabet { alphabet: String, reason: &'static str },

    #[error("seed `{seed}` cannot be rewritten by the configured rules")]
    InvalidSeed { seed: String },

    #[error("rewriting seed `{seed}` did not terminate within {steps} steps")]
    RewriteDiverged { seed: String, steps: usize },

    #[error("rewriting `{current}` produced `{next}`, which does not order after it")]
    NonMonotonic { current: String, next: String },

    #[error("the token counter is exhausted")]
    Exhausted,

    /// The next seed could not be made durable. The generator refuses to
    /// hand out further tokens afterwards.
    #[error("failed to persist the next token seed")]
    Persistence(#[source] io::Error),

    #[error("the token generator stopped after an earlier persistence failure")]
    Poisoned,
}

// -----------------------------------------------------------------------------
// CacheError

/// Failures of [`IdentityCache`](crate::IdentityCache) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("token {token} is already assigned to another live object")]
    DuplicateToken { token: IdentityToken },

    #[error("object {object} already holds token {existing}")]
    ObjectAlreadyAssigned {
        object: ObjectId,
        existing: IdentityToken,
    },

    #[error("token {token} is not assigned")]
    TokenNotFound { token: IdentityToken },

    #[error("object {object} holds no token")]
    ObjectNotFound { object: ObjectId },

    #[error(transparent)]
    Token(#[from] TokenError),
}

// -----------------------------------------------------------------------------
// EvictionError

/// Returned by an [`EvictionObserver`] that could not handle an eviction.
///
/// The cache logs it and carries on; the entry is removed either way.
///
/// [`EvictionObserver`]: crate::EvictionObserver
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvictionError {
    message: String,
}

impl EvictionError {
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}
