//! Token generators.
//!
//! A [`TokenGenerator`] hands out tokens that never repeat for the lifetime
//! of the generator. Calls may come from several threads; implementations
//! serialize them internally.

// -----------------------------------------------------------------------------
// Modules

mod rewrite;
mod seed;

// -----------------------------------------------------------------------------
// Exports

pub use rewrite::{RewriteGenerator, RewriteRule, RewriteRules};
pub use seed::{FileSeedStore, MemorySeedStore, SeedStore};

use alloc::sync::Arc;
use std::sync::{Mutex, PoisonError};

use crate::{IdentityToken, TokenError};

// -----------------------------------------------------------------------------
// TokenGenerator

/// A source of unique [`IdentityToken`]s.
pub trait TokenGenerator: Send + Sync {
    /// Returns a token different from every token this generator returned before.
    fn next_token(&self) -> Result<IdentityToken, TokenError>;
}

impl<G: TokenGenerator + ?Sized> TokenGenerator for Arc<G> {
    #[inline]
    fn next_token(&self) -> Result<IdentityToken, TokenError> {
        (**self).next_token()
    }
}

impl<G: TokenGenerator + ?Sized> TokenGenerator for &G {
    #[inline]
    fn next_token(&self) -> Result<IdentityToken, TokenError> {
        (**self).next_token()
    }
}

// -----------------------------------------------------------------------------
// CounterGenerator

/// A thread-safe decimal counter, starting from `1` by default.
///
/// Every value from the first one up to and including `u64::MAX` is
/// issued once; after that the counter fails with
/// [`TokenError::Exhausted`]. Tokens are unique within the process only. Use a [`RewriteGenerator`]
/// when tokens must stay unique across restarts.
///
/// # Examples
///
/// ```
/// use vc_ident::{CounterGenerator, TokenGenerator};
///
/// let generator = CounterGenerator::new();
/// assert_eq!(generator.next_token().unwrap().as_str(), "1");
/// assert_eq!(generator.next_token().unwrap().as_str(), "2");
/// ```
#[derive(Debug)]
pub struct CounterGenerator {
    // `None` once `u64::MAX` has been handed out.
    next: Mutex<Option<u64>>,
}

impl Default for CounterGenerator {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl CounterGenerator {
    /// Creates a counter whose first token is `"1"`.
    #[inline]
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a counter whose first token is `first`.
    #[inline]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: Mutex::new(Some(first)),
        }
    }

    /// Returns the value the next token will carry, or `None` once the
    /// counter is exhausted.
    #[inline]
    pub fn peek(&self) -> Option<u64> {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenGenerator for CounterGenerator {
    fn next_token(&self) -> Result<IdentityToken, TokenError> {
        let value = {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            let value = next.ok_or(TokenError::Exhausted)?;
            *next = value.checked_add(1);
            value
        };
        IdentityToken::new(value.to_string())
    }
}

// -----------------------------------------------------------------------------
// Tests
