//! One-shot expiration monitors driven by a single timer thread.

use alloc::collections::BinaryHeap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::cmp::{Ordering, Reverse};
use core::fmt::Debug;
use core::panic::AssertUnwindSafe;
use core::sync::atomic::{AtomicU8, AtomicU64};
use core::sync::atomic::Ordering as AtomicOrdering;
use core::time::Duration;
use std::panic::catch_unwind;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::IdentityToken;

const ARMED: u8 = 0;
const EXPIRED: u8 = 1;
const CANCELLED: u8 = 2;

// -----------------------------------------------------------------------------
// MonitorId

/// Identifies one monitor of a [`MonitorPool`].
///
/// Ids are never reused by a pool, so a listener can tell a late
/// notification for a replaced entry from a current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonitorId(u64);

impl MonitorId {
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

// -----------------------------------------------------------------------------
// MonitorStatus

/// The state of a monitor.
///
/// `Armed` is the only non-terminal state. A monitor leaves it exactly once,
/// either by firing or by being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Armed,
    Expired,
    Cancelled,
}

// -----------------------------------------------------------------------------
// ExpirationListener

/// Receives the notification of an expired monitor.
///
/// Called on the pool thread, without any pool lock held.
pub trait ExpirationListener: Send + Sync {
    fn on_expire(&self, token: &IdentityToken, monitor: MonitorId);
}

// -----------------------------------------------------------------------------
// MonitorHandle

struct MonitorState {
    id: MonitorId,
    state: AtomicU8,
    token: IdentityToken,
    listener: Weak<dyn ExpirationListener>,
}

impl MonitorState {
    #[inline]
    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ARMED, to, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }

    #[inline]
    fn is_armed(&self) -> bool {
        self.state.load(AtomicOrdering::Acquire) == ARMED
    }
}

/// A shared handle to one monitor.
#[derive(Clone)]
pub struct MonitorHandle(Arc<MonitorState>);

impl MonitorHandle {
    #[inline]
    pub fn id(&self) -> MonitorId {
        self.0.id
    }

    /// Returns the token this monitor guards.
    #[inline]
    pub fn token(&self) -> &IdentityToken {
        &self.0.token
    }

    pub fn status(&self) -> MonitorStatus {
        match self.0.state.load(AtomicOrdering::Acquire) {
            ARMED => MonitorStatus::Armed,
            EXPIRED => MonitorStatus::Expired,
            _ => MonitorStatus::Cancelled,
        }
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.0.is_armed()
    }

    /// Cancels the monitor.
    ///
    /// Returns `false` if the monitor had already fired or been cancelled.
    /// When this returns `true` the listener is guaranteed not to be
    /// notified, even if the deadline is passing concurrently.
    #[inline]
    pub fn cancel(&self) -> bool {
        self.0.transition(CANCELLED)
    }
}

impl Debug for MonitorHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("id", &self.0.id)
            .field("token", &self.0.token)
            .field("status", &self.status())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Deadline

struct Deadline {
    at: Instant,
    monitor: Arc<MonitorState>,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.monitor.id.cmp(&other.monitor.id))
    }
}

// -----------------------------------------------------------------------------
// MonitorPool

struct PoolQueue {
    heap: BinaryHeap<Reverse<Deadline>>,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    wakeup: Condvar,
    next_id: AtomicU64,
}

impl PoolShared {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, PoolQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A timer thread that drives any number of one-shot monitors.
///
/// Deadlines are kept in a min-heap; the thread sleeps until the earliest
/// one or until a new monitor is started. A fired monitor notifies its
/// listener synchronously on the pool thread. Listener panics are caught
/// and logged, and the thread keeps serving other monitors.
///
/// Dropping the pool stops the thread. Monitors still pending at that
/// point never fire.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex, Weak};
/// use std::time::Duration;
/// use vc_ident::{ExpirationListener, IdentityToken, MonitorId, MonitorPool};
///
/// #[derive(Default)]
/// struct Log(Mutex<Vec<String>>);
///
/// impl ExpirationListener for Log {
///     fn on_expire(&self, token: &IdentityToken, _: MonitorId) {
///         self.0.lock().unwrap().push(token.to_string());
///     }
/// }
///
/// let log: Arc<dyn ExpirationListener> = Arc::new(Log::default());
/// let listener: Weak<dyn ExpirationListener> = Arc::downgrade(&log);
///
/// let pool = MonitorPool::new("doc monitor");
/// let handle = pool.arm(IdentityToken::new("7").unwrap(), listener, Duration::from_secs(60));
///
/// assert!(handle.cancel());
/// assert!(!handle.cancel());
/// assert_eq!(pool.pending(), 0);
/// ```
pub struct MonitorPool {
    shared: Arc<PoolShared>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorPool {
    pub const DEFAULT_THREAD_NAME: &'static str = "vc-ident monitor";

    /// Spawns the pool thread.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to create the thread.
    pub fn new(thread_name: impl Into<String>) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            next_id: AtomicU64::new(0),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || run(&worker))
            .expect("Failed to spawn thread.");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Creates an armed monitor without starting its timer.
    ///
    /// Until [`start`](Self::start) is called the monitor can be cancelled
    /// but will never fire. This lets a caller publish the handle before
    /// the deadline begins to run.
    pub fn prepare(
        &self,
        token: IdentityToken,
        listener: Weak<dyn ExpirationListener>,
    ) -> MonitorHandle {
        let id = MonitorId(self.shared.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        MonitorHandle(Arc::new(MonitorState {
            id,
            state: AtomicU8::new(ARMED),
            token,
            listener,
        }))
    }

    /// Starts the timer of a prepared monitor. Has no effect on a monitor
    /// that is no longer armed.
    pub fn start(&self, handle: &MonitorHandle, timeout: Duration) {
        if !handle.is_armed() {
            return;
        }

        let at = Instant::now() + timeout;
        self.shared.lock().heap.push(Reverse(Deadline {
            at,
            monitor: Arc::clone(&handle.0),
        }));
        self.shared.wakeup.notify_one();
    }

    /// Creates a monitor and starts its timer.
    pub fn arm(
        &self,
        token: IdentityToken,
        listener: Weak<dyn ExpirationListener>,
        timeout: Duration,
    ) -> MonitorHandle {
        let handle = self.prepare(token, listener);
        self.start(&handle, timeout);
        handle
    }

    /// Drops the deadlines of monitors that are no longer armed.
    ///
    /// Returns the number of deadlines removed.
    pub fn purge_cancelled(&self) -> usize {
        let mut queue = self.shared.lock();
        let before = queue.heap.len();
        queue.heap.retain(|Reverse(deadline)| deadline.monitor.is_armed());
        before - queue.heap.len()
    }

    /// Returns the number of started monitors that are still armed.
    pub fn pending(&self) -> usize {
        self.shared
            .lock()
            .heap
            .iter()
            .filter(|Reverse(deadline)| deadline.monitor.is_armed())
            .count()
    }
}

impl Default for MonitorPool {
    #[inline]
    fn default() -> Self {
        Self::new(Self::DEFAULT_THREAD_NAME)
    }
}

impl Debug for MonitorPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MonitorPool")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Drop for MonitorPool {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();

        let Some(thread) = self.thread.take() else {
            return;
        };

        // A listener that drops the last owner of the pool runs on the pool
        // thread itself, which must not join itself.
        if thread.thread().id() == thread::current().id() {
            return;
        }

        let panicking = thread::panicking();
        let res = thread.join();
        if !panicking {
            res.expect("Monitor thread panicked.");
        }
    }
}

fn run(shared: &PoolShared) {
    let mut queue = shared.lock();
    loop {
        if queue.shutdown {
            break;
        }

        let now = Instant::now();
        match queue.heap.peek().map(|Reverse(deadline)| deadline.at) {
            None => {
                queue = shared.wakeup.wait(queue).unwrap_or_else(PoisonError::into_inner);
            }
            Some(at) if at > now => {
                queue = shared
                    .wakeup
                    .wait_timeout(queue, at - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            Some(_) => {
                let Some(Reverse(due)) = queue.heap.pop() else {
                    continue;
                };
                drop(queue);
                fire(&due.monitor);
                queue = shared.lock();
            }
        }
    }
}

fn fire(monitor: &MonitorState) {
    if !monitor.transition(EXPIRED) {
        return;
    }

    let Some(listener) = monitor.listener.upgrade() else {
        return;
    };

    let notified = catch_unwind(AssertUnwindSafe(|| {
        listener.on_expire(&monitor.token, monitor.id);
    }));

    if notified.is_err() {
        log::error!(
            "expiration listener panicked for token {} (monitor {})",
            monitor.token,
            monitor.id.0,
        );
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex, Weak};
    use std::thread;
    use std::time::Duration;

    use super::{ExpirationListener, MonitorId, MonitorPool, MonitorStatus};
    use crate::IdentityToken;

    struct Channel(Mutex<Sender<(String, MonitorId)>>);

    impl ExpirationListener for Channel {
        fn on_expire(&self, token: &IdentityToken, monitor: MonitorId) {
            let _ = self.0.lock().unwrap().send((token.to_string(), monitor));
        }
    }

    struct Panicking;

    impl ExpirationListener for Panicking {
        fn on_expire(&self, _: &IdentityToken, _: MonitorId) {
            panic!("listener failure");
        }
    }

    fn channel() -> (Arc<Channel>, Receiver<(String, MonitorId)>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Channel(Mutex::new(tx))), rx)
    }

    fn weak(listener: &Arc<Channel>) -> Weak<dyn ExpirationListener> {
        let listener: Arc<dyn ExpirationListener> = listener.clone();
        Arc::downgrade(&listener)
    }

    fn token(text: &str) -> IdentityToken {
        IdentityToken::new(text).unwrap()
    }

    const LONG: Duration = Duration::from_secs(2);

    #[test]
    fn fires_once_in_deadline_order() {
        let (listener, rx) = channel();
        let pool = MonitorPool::default();

        let late = pool.arm(token("late"), weak(&listener), Duration::from_millis(60));
        let early = pool.arm(token("early"), weak(&listener), Duration::from_millis(10));

        assert_eq!(rx.recv_timeout(LONG).unwrap(), ("early".into(), early.id()));
        assert_eq!(rx.recv_timeout(LONG).unwrap(), ("late".into(), late.id()));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        assert_eq!(early.status(), MonitorStatus::Expired);
        assert!(!early.cancel());
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn cancelled_monitor_never_fires() {
        let (listener, rx) = channel();
        let pool = MonitorPool::default();

        let handle = pool.arm(token("1"), weak(&listener), Duration::from_millis(20));
        assert!(handle.cancel());
        assert_eq!(handle.status(), MonitorStatus::Cancelled);

        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        assert_eq!(pool.purge_cancelled(), 0);
    }

    #[test]
    fn prepared_monitor_waits_for_start() {
        let (listener, rx) = channel();
        let pool = MonitorPool::default();

        let handle = pool.prepare(token("1"), weak(&listener));
        assert!(handle.is_armed());
        assert_eq!(pool.pending(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        pool.start(&handle, Duration::ZERO);
        assert_eq!(rx.recv_timeout(LONG).unwrap().1, handle.id());
    }

    #[test]
    fn purge_removes_cancelled_deadlines() {
        let (listener, _rx) = channel();
        let pool = MonitorPool::default();

        let handles: Vec<_> = (0..10)
            .map(|i| pool.arm(token(&i.to_string()), weak(&listener), LONG))
            .collect();
        for handle in &handles[..6] {
            handle.cancel();
        }

        assert_eq!(pool.pending(), 4);
        assert_eq!(pool.purge_cancelled(), 6);
        assert_eq!(pool.pending(), 4);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_pool() {
        let panicking: Arc<dyn ExpirationListener> = Arc::new(Panicking);
        let (listener, rx) = channel();
        let pool = MonitorPool::default();

        let first = pool.arm(token("1"), Arc::downgrade(&panicking), Duration::ZERO);
        let second = pool.arm(token("2"), weak(&listener), Duration::from_millis(20));

        assert_eq!(rx.recv_timeout(LONG).unwrap().1, second.id());
        assert_eq!(first.status(), MonitorStatus::Expired);
    }

    #[test]
    fn dropped_listener_is_skipped() {
        let (listener, rx) = channel();
        let pool = MonitorPool::default();

        let handle = pool.arm(token("1"), weak(&listener), Duration::from_millis(10));
        drop(listener);
        thread::sleep(Duration::from_millis(100));

        assert!(rx.try_recv().is_err());
        assert_eq!(handle.status(), MonitorStatus::Expired);
    }
}
