use alloc::string::String;

use thiserror::Error;
use vc_ident::{CacheError, IdentityToken, TokenError};
use vc_transform::DispatchError;

use crate::{HintSlot, Kind};

// -----------------------------------------------------------------------------
// EncodeError

/// Failures of [`GraphEncoder::encode`](crate::GraphEncoder::encode).
///
/// Any of them aborts the whole encoding; the partial document is discarded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("`{field}` of `{owner}` cannot be persisted: {reason}")]
    UnsupportedField {
        owner: String,
        field: String,
        reason: &'static str,
    },

    #[error("no container type hint for `{slot}`")]
    MissingTypeHint { slot: HintSlot },

    #[error("the type hint for `{slot}` does not describe a {expected}")]
    HintMismatch { slot: HintSlot, expected: Kind },
}

impl EncodeError {
    #[inline]
    pub(crate) fn unsupported(
        owner: impl Into<String>,
        field: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::UnsupportedField {
            owner: owner.into(),
            field: field.into(),
            reason,
        }
    }
}

// -----------------------------------------------------------------------------
// DecodeError

/// Failures of [`GraphDecoder::decode`](crate::GraphDecoder::decode).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("the document has no root node")]
    MissingRoot,

    #[error("`{node}` node lacks the `{attribute}` attribute")]
    MissingAttribute {
        node: String,
        attribute: &'static str,
    },

    #[error("token {token} is referenced but never defined")]
    DanglingReference { token: IdentityToken },

    #[error("token {token} is defined more than once")]
    DuplicateDefinition { token: IdentityToken },

    #[error("malformed `{node}` node: {reason}")]
    MalformedEntry { node: String, reason: &'static str },
}
