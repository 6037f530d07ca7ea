//! Thread guards - type-level selection of the locking policy
//!
//! Every counter mutation runs inside `acquire`/`release`. The guard type is a
//! generic parameter of the whole pointer family, so the choice between the
//! spin lock and the no-op guard is made at compile time and never branches
//! on the hot path.

use crossbeam::utils::Backoff;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

/// Mutual exclusion used to serialize control block updates
pub trait ThreadGuard: Default + 'static {
    /// Short policy name used in logs and `Debug` output
    const NAME: &'static str;

    /// Block (busy-wait) until the guard is held
    fn acquire(&self);

    /// Release a guard previously taken with [`ThreadGuard::acquire`]
    fn release(&self);

    /// Acquire and return a token releasing the guard on drop
    #[inline]
    fn lock(&self) -> GuardToken<'_, Self> {
        self.acquire();
        GuardToken { guard: self }
    }
}

/// Marker for guards whose control blocks may be shared across threads
///
/// # Safety
///
/// Implementors must make `acquire`/`release` a real mutual exclusion with
/// acquire/release ordering, so counter updates from different threads are
/// serialized and visible to each other.
pub unsafe trait ThreadSafeGuard: ThreadGuard + Send + Sync {}

/// RAII token for a held guard
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken<'a, G: ThreadGuard> {
    guard: &'a G,
}

impl<G: ThreadGuard> Drop for GuardToken<'_, G> {
    #[inline]
    fn drop(&mut self) {
        self.guard.release();
    }
}

/// Test-and-set spin lock (the `safe` policy)
///
/// Suitable only for the O(1) critical sections of the control block: the
/// waiter spins with exponential backoff and never parks the thread.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Whether some thread currently holds the lock
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl ThreadGuard for SpinLock {
    const NAME: &'static str = "spin";

    #[inline]
    fn acquire(&self) {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on a plain load until the flag looks free again
            while self.locked.load(Ordering::Relaxed) {
                backoff.spin();
            }
        }
    }

    #[inline]
    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

// SAFETY: compare_exchange with Acquire on claim and a Release store on clear
// form a proper mutual exclusion.
unsafe impl ThreadSafeGuard for SpinLock {}

/// No-op guard (the `unsafe` policy)
///
/// Holds a `PhantomData<Cell<()>>` so that control blocks using it are
/// `!Sync`: pointers built on this guard cannot leave their thread.
#[derive(Debug, Default)]
pub struct NoLock {
    _not_sync: PhantomData<Cell<()>>,
}

impl NoLock {
    pub const fn new() -> Self {
        Self {
            _not_sync: PhantomData,
        }
    }
}

impl ThreadGuard for NoLock {
    const NAME: &'static str = "none";

    #[inline(always)]
    fn acquire(&self) {}

    #[inline(always)]
    fn release(&self) {}
}
