use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt::Debug;
use core::time::Duration;
use std::sync::{Mutex, MutexGuard, PoisonError};

use foldhash::fast::FixedState;
use hashbrown::HashMap;

use crate::{CacheError, EvictionError, TokenError};
use crate::{ExpirationListener, MonitorHandle, MonitorId, MonitorPool};
use crate::{IdentityToken, ObjectId};

const OBJECT_HASH_STATE: FixedState = FixedState::with_seed(0x9E37_79B9_7F4A_7C15);

// -----------------------------------------------------------------------------
// CacheConfig

/// Configuration of an [`IdentityCache`].
///
/// - [`idle_timeout`](Self::with_idle_timeout): lifetime of every entry,
///   counted from its insertion. Default: 60 seconds.
/// - [`thread_name`](Self::with_thread_name): name of the monitor thread.
///   Default: `vc-ident monitor`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    idle_timeout: Duration,
    thread_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            thread_name: MonitorPool::DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl CacheConfig {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    #[inline]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

// -----------------------------------------------------------------------------
// Resolution

/// Outcome of [`IdentityCache::resolve_or_assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The object was already known under this token.
    Existing(IdentityToken),
    /// The object was unknown and has just been given this token.
    Assigned(IdentityToken),
}

impl Resolution {
    #[inline]
    pub fn token(&self) -> &IdentityToken {
        match self {
            Self::Existing(token) | Self::Assigned(token) => token,
        }
    }

    #[inline]
    pub fn into_token(self) -> IdentityToken {
        match self {
            Self::Existing(token) | Self::Assigned(token) => token,
        }
    }

    #[inline]
    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }
}

// -----------------------------------------------------------------------------
// EvictionObserver

/// Notified after an entry was evicted by its monitor.
///
/// Runs on the monitor thread after the entry is gone from both tables.
/// Errors are logged and otherwise ignored.
pub trait EvictionObserver: Send + Sync {
    fn on_evict(&self, token: &IdentityToken, object: ObjectId) -> Result<(), EvictionError>;
}

// -----------------------------------------------------------------------------
// IdentityCache

struct Entry {
    object: ObjectId,
    monitor: MonitorHandle,
    pins: usize,
    // Set when the monitor fires while the entry is pinned.
    evicted: bool,
    // Set when the entry is released while pinned.
    released: bool,
}

impl Entry {
    #[inline]
    fn is_doomed(&self) -> bool {
        self.evicted || self.released
    }
}

struct Tables {
    by_token: BTreeMap<IdentityToken, Entry>,
    by_object: HashMap<ObjectId, IdentityToken, FixedState>,
}

impl Tables {
    fn remove(&mut self, token: &IdentityToken) -> Option<Entry> {
        let entry = self.by_token.remove(token)?;
        self.by_object.remove(&entry.object);
        Some(entry)
    }
}

struct CacheShared {
    tables: Mutex<Tables>,
    observer: Option<Box<dyn EvictionObserver>>,
}

impl CacheShared {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, token: &IdentityToken, object: ObjectId) {
        log::trace!("evicted token {token} of {object}");

        if let Some(observer) = &self.observer
            && let Err(e) = observer.on_evict(token, object)
        {
            log::warn!("eviction of token {token} could not be delivered: {e}");
        }
    }
}

impl ExpirationListener for CacheShared {
    fn on_expire(&self, token: &IdentityToken, monitor: MonitorId) {
        let evicted = {
            let mut tables = self.lock();
            // The token may have been expired by hand and assigned again
            // since this monitor fired.
            let Some(entry) = tables
                .by_token
                .get_mut(token)
                .filter(|entry| entry.monitor.id() == monitor)
            else {
                return;
            };

            if entry.pins > 0 {
                entry.evicted = true;
                log::trace!("eviction of token {token} deferred, {} pins held", entry.pins);
                None
            } else {
                tables.remove(token)
            }
        };

        if let Some(entry) = evicted {
            self.notify(token, entry.object);
        }
    }
}

/// A session-scoped, bidirectional `token <-> object` table.
///
/// Both directions live behind one lock and are always updated together.
/// Each entry is guarded by a one-shot monitor armed with the cache's idle
/// timeout when the entry is inserted; reading an entry does not extend
/// its life. All monitors of a cache share one background thread, which
/// is stopped when the cache is dropped.
///
/// An entry can be pinned while a traversal depends on it. A monitor that
/// fires on a pinned entry only marks it; the entry is evicted when its
/// last pin is released.
///
/// # Examples
///
/// ```
/// use vc_ident::{CacheConfig, CounterGenerator, IdentityCache, ObjectId, TokenGenerator};
///
/// let cache = IdentityCache::new(CacheConfig::default());
/// let generator = CounterGenerator::new();
///
/// let value = String::from("shared");
/// let object = ObjectId::of(&value);
///
/// let first = cache.resolve_or_assign(object, || generator.next_token()).unwrap();
/// let again = cache.resolve_or_assign(object, || generator.next_token()).unwrap();
///
/// assert!(first.is_assigned());
/// assert!(!again.is_assigned());
/// assert_eq!(first.token(), again.token());
///
/// assert_eq!(cache.clear(), 1);
/// assert!(!cache.exists_object(object));
/// ```
pub struct IdentityCache {
    shared: Arc<CacheShared>,
    pool: MonitorPool,
    idle_timeout: Duration,
}

impl IdentityCache {
    /// Creates an empty cache and starts its monitor thread.
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates an empty cache whose evictions are reported to `observer`.
    pub fn with_observer(config: CacheConfig, observer: impl EvictionObserver + 'static) -> Self {
        Self::build(config, Some(Box::new(observer)))
    }

    fn build(config: CacheConfig, observer: Option<Box<dyn EvictionObserver>>) -> Self {
        let tables = Tables {
            by_token: BTreeMap::new(),
            by_object: HashMap::with_hasher(OBJECT_HASH_STATE),
        };
        Self {
            shared: Arc::new(CacheShared {
                tables: Mutex::new(tables),
                observer,
            }),
            pool: MonitorPool::new(config.thread_name),
            idle_timeout: config.idle_timeout,
        }
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn exists_object(&self, object: ObjectId) -> bool {
        self.shared.lock().by_object.contains_key(&object)
    }

    pub fn exists_token(&self, token: &IdentityToken) -> bool {
        self.shared.lock().by_token.contains_key(token)
    }

    fn insert(&self, tables: &mut Tables, token: IdentityToken, object: ObjectId, pins: usize) {
        let shared: Arc<dyn ExpirationListener> = self.shared.clone();
        let listener: Weak<dyn ExpirationListener> = Arc::downgrade(&shared);
        let monitor = self.pool.prepare(token.clone(), listener);

        tables.by_object.insert(object, token.clone());
        tables.by_token.insert(
            token,
            Entry {
                object,
                monitor: monitor.clone(),
                pins,
                evicted: false,
                released: false,
            },
        );

        // The entry is in place before its timer starts.
        self.pool.start(&monitor, self.idle_timeout);
        log::trace!("assigned token {} to {object}", monitor.token());
    }

    /// Registers a new `(token, object)` pair and arms its monitor.
    ///
    /// Assigning a pair that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// - [`CacheError::DuplicateToken`] if `token` belongs to another object.
    /// - [`CacheError::ObjectAlreadyAssigned`] if `object` holds another token.
    pub fn assign(&self, token: IdentityToken, object: ObjectId) -> Result<IdentityToken, CacheError> {
        let mut tables = self.shared.lock();

        if let Some(entry) = tables.by_token.get(&token) {
            if entry.object == object {
                return Ok(token);
            }
            return Err(CacheError::DuplicateToken { token });
        }
        if let Some(existing) = tables.by_object.get(&object) {
            return Err(CacheError::ObjectAlreadyAssigned {
                object,
                existing: existing.clone(),
            });
        }

        self.insert(&mut tables, token.clone(), object, 0);
        Ok(token)
    }

    fn resolve(
        &self,
        object: ObjectId,
        generate: impl FnOnce() -> Result<IdentityToken, TokenError>,
        pins: usize,
    ) -> Result<Resolution, CacheError> {
        let mut tables = self.shared.lock();

        if let Some(token) = tables.by_object.get(&object).cloned() {
            if let Some(entry) = tables.by_token.get_mut(&token) {
                entry.pins += pins;
            }
            return Ok(Resolution::Existing(token));
        }

        let token = generate()?;
        if tables.by_token.contains_key(&token) {
            return Err(CacheError::DuplicateToken { token });
        }

        self.insert(&mut tables, token.clone(), object, pins);
        Ok(Resolution::Assigned(token))
    }

    /// Returns the token of `object`, or assigns one made by `generate`.
    ///
    /// Lookup, generation and insertion happen under one lock, so two
    /// callers racing on the same object always agree on its token.
    pub fn resolve_or_assign(
        &self,
        object: ObjectId,
        generate: impl FnOnce() -> Result<IdentityToken, TokenError>,
    ) -> Result<Resolution, CacheError> {
        self.resolve(object, generate, 0)
    }

    /// Like [`resolve_or_assign`](Self::resolve_or_assign), and pins the
    /// entry under the same lock.
    ///
    /// Each successful call must be balanced by one [`unpin`](Self::unpin).
    pub fn resolve_and_pin(
        &self,
        object: ObjectId,
        generate: impl FnOnce() -> Result<IdentityToken, TokenError>,
    ) -> Result<Resolution, CacheError> {
        self.resolve(object, generate, 1)
    }

    /// Adds a pin to the entry of `token`. Returns `false` if there is none.
    pub fn pin(&self, token: &IdentityToken) -> bool {
        match self.shared.lock().by_token.get_mut(token) {
            Some(entry) => {
                entry.pins += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one pin of `token`.
    ///
    /// When the last pin goes and the entry was evicted or released in the
    /// meantime, it is removed now. A deferred eviction is reported to the
    /// observer on the calling thread.
    pub fn unpin(&self, token: &IdentityToken) {
        let removed = {
            let mut tables = self.shared.lock();
            let Some(entry) = tables.by_token.get_mut(token) else {
                return;
            };
            entry.pins = entry.pins.saturating_sub(1);
            if entry.pins > 0 || !entry.is_doomed() {
                return;
            }
            tables.remove(token)
        };

        let Some(entry) = removed else {
            return;
        };
        entry.monitor.cancel();
        if entry.evicted {
            self.shared.notify(token, entry.object);
        } else {
            log::trace!("released token {token} of {}", entry.object);
        }
    }

    /// Returns `true` if the entry of `token` holds at least one pin.
    pub fn is_pinned(&self, token: &IdentityToken) -> bool {
        self.shared
            .lock()
            .by_token
            .get(token)
            .is_some_and(|entry| entry.pins > 0)
    }

    /// Returns the object holding `token`.
    pub fn get(&self, token: &IdentityToken) -> Result<ObjectId, CacheError> {
        self.shared
            .lock()
            .by_token
            .get(token)
            .map(|entry| entry.object)
            .ok_or_else(|| CacheError::TokenNotFound {
                token: token.clone(),
            })
    }

    /// Returns the token held by `object`.
    pub fn token_of(&self, object: ObjectId) -> Result<IdentityToken, CacheError> {
        self.shared
            .lock()
            .by_object
            .get(&object)
            .cloned()
            .ok_or(CacheError::ObjectNotFound { object })
    }

    /// Removes the entry of `token` and cancels its monitor, pinned or not.
    ///
    /// Returns `false` if no such entry exists; calling it twice is harmless.
    /// The eviction observer is not notified, it only hears about entries
    /// removed by their monitor.
    pub fn expire(&self, token: &IdentityToken) -> bool {
        let removed = self.shared.lock().remove(token);
        match removed {
            Some(entry) => {
                entry.monitor.cancel();
                log::trace!("expired token {token} of {}", entry.object);
                true
            }
            None => false,
        }
    }

    /// Removes the entry of `token` once nothing pins it.
    ///
    /// An unpinned entry is removed at once, like [`expire`](Self::expire).
    /// A pinned one stays until its last [`unpin`](Self::unpin). Returns
    /// `false` if no such entry exists.
    pub fn release(&self, token: &IdentityToken) -> bool {
        let removed = {
            let mut tables = self.shared.lock();
            match tables.by_token.get_mut(token) {
                None => return false,
                Some(entry) if entry.pins > 0 => {
                    entry.released = true;
                    return true;
                }
                Some(_) => tables.remove(token),
            }
        };

        if let Some(entry) = removed {
            entry.monitor.cancel();
            log::trace!("released token {token} of {}", entry.object);
        }
        true
    }

    /// Cancels every monitor and drops every entry, pinned ones included.
    ///
    /// Returns the number of entries dropped. A monitor firing concurrently
    /// either finds itself cancelled or finds its entry gone, so it never
    /// reports an eviction for an entry removed here.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut tables = self.shared.lock();
            for entry in tables.by_token.values() {
                entry.monitor.cancel();
            }
            tables.by_object.clear();
            core::mem::take(&mut tables.by_token).len()
        };

        let purged = self.pool.purge_cancelled();
        log::debug!("identity cache cleared: {dropped} entries, {purged} monitors cancelled");
        dropped
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.shared.lock().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of monitors that have not fired or been cancelled.
    pub fn live_monitors(&self) -> usize {
        self.pool.pending()
    }

    /// Returns the live tokens in ascending order.
    pub fn tokens(&self) -> Vec<IdentityToken> {
        self.shared.lock().by_token.keys().cloned().collect()
    }
}

impl Default for IdentityCache {
    #[inline]
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Debug for IdentityCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("idle_timeout", &self.idle_timeout)
            .field("len", &self.len())
            .field("live_monitors", &self.live_monitors())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests
