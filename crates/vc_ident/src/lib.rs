//! Object identity tokens and the expiring identity cache.
//!
//! While a graph is being persisted every object it reaches is given a
//! durable [`IdentityToken`]. The [`IdentityCache`] remembers which object
//! holds which token for the length of a session, so a second encounter
//! of the same instance is written as a reference instead of a copy.
//! This is what makes shared sub-graphs and cycles terminate.
//!
//! ## Menu
//!
//! - [`IdentityToken`]: Opaque, totally ordered, string renderable identifier.
//! - [`ObjectId`]: Identity (address and type) of a live value, never its value.
//! - [`TokenGenerator`]: Stream of never-repeating tokens.
//!     - [`CounterGenerator`]: In-process decimal counter.
//!     - [`RewriteGenerator`]: String rewriting generator whose seed survives restarts.
//! - [`SeedStore`]: Where a [`RewriteGenerator`] persists its next seed.
//!     - [`FileSeedStore`], [`MemorySeedStore`].
//! - [`MonitorPool`]: Background timer thread driving one-shot [`MonitorHandle`]s.
//! - [`IdentityCache`]: Bidirectional `token <-> object` table with per-entry expiration.
//!
//! ## Expiration
//!
//! Every entry owns one monitor armed with the cache's idle timeout.
//! Monitors are one-shot: looking an entry up does not extend its life,
//! only a fresh insertion arms a new monitor. When a monitor fires, the
//! entry is removed from both tables at once. [`IdentityCache::clear`]
//! cancels every monitor first, so no expiration is ever reported for an
//! entry that is already gone.

#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

// -----------------------------------------------------------------------------
// Modules

mod cache;
mod error;
mod generator;
mod monitor;
mod token;

// -----------------------------------------------------------------------------
// Exports

pub use cache::{CacheConfig, EvictionObserver, IdentityCache, Resolution};
pub use error::{CacheError, EvictionError, TokenError};
pub use generator::{CounterGenerator, TokenGenerator};
pub use generator::{FileSeedStore, MemorySeedStore, SeedStore};
pub use generator::{RewriteGenerator, RewriteRule, RewriteRules};
pub use monitor::{ExpirationListener, MonitorHandle, MonitorId, MonitorPool, MonitorStatus};
pub use token::{IdentityToken, ObjectId};
