//! Control block - strong/weak counters and teardown state
//!
//! Construction leaves both counters at zero; the constructing strong
//! pointer records itself right afterwards. That keeps one block type for
//! both the monotonic factory path and the externally-owned path.

use super::guard::{ThreadGuard, ThreadSafeGuard};
use super::{RefCounter, SpinLock};
use crate::allocator::Origin;
use crate::logging::{error, log_counter_violation};
use core::cell::UnsafeCell;
use core::fmt;

/// Result of a counter test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Empty,
    NonEmpty,
}

impl State {
    #[inline]
    pub fn is_empty(self) -> bool {
        self == State::Empty
    }

    #[inline]
    fn of<C: RefCounter>(counter: C) -> Self {
        if counter.is_zero() {
            State::Empty
        } else {
            State::NonEmpty
        }
    }
}

struct Counters<C> {
    strong: C,
    weak: C,
    /// Set between the last strong release and the end of value teardown
    dropping: bool,
    /// Set while a self pointer refers to the block
    pinned: bool,
}

/// Heap-resident bookkeeping for one shared value
///
/// `G` selects the thread policy, `C` the counter width.
pub struct ControlBlock<G: ThreadGuard = SpinLock, C: RefCounter = usize> {
    counters: UnsafeCell<Counters<C>>,
    origin: Origin,
    guard: G,
}

// SAFETY: every access to `counters` happens with `guard` held, and
// `ThreadSafeGuard` guarantees that guard is a real mutual exclusion.
unsafe impl<G: ThreadSafeGuard, C: RefCounter> Sync for ControlBlock<G, C> {}

impl<G: ThreadGuard, C: RefCounter> ControlBlock<G, C> {
    /// Create a block with both counters at zero
    #[inline]
    pub fn new(origin: Origin) -> Self {
        Self {
            counters: UnsafeCell::new(Counters {
                strong: C::zero(),
                weak: C::zero(),
                dropping: false,
                pinned: false,
            }),
            origin,
            guard: G::default(),
        }
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    #[inline]
    pub fn is_monotonic_allocated(&self) -> bool {
        self.origin == Origin::Monotonic
    }

    pub fn add_strong(&self) {
        self.with_counters(|c| increment(&mut c.strong, "strong", self.address()));
    }

    pub fn add_weak(&self) {
        self.with_counters(|c| increment(&mut c.weak, "weak", self.address()));
    }

    /// Record a new strong owner only if the value is still alive
    pub fn try_add_strong(&self) -> bool {
        self.with_counters(|c| {
            if c.strong.is_zero() {
                return false;
            }
            increment(&mut c.strong, "strong", self.address());
            true
        })
    }

    /// Drop one strong owner
    ///
    /// On `Empty` the caller owns the value teardown and must finish it with
    /// [`ControlBlock::finish_value_teardown`].
    pub fn remove_and_test_strong_empty(&self) -> State {
        self.with_counters(|c| {
            decrement(&mut c.strong, "strong", self.address());
            let state = State::of(c.strong);
            if state.is_empty() {
                c.dropping = true;
            }
            state
        })
    }

    pub fn remove_and_test_weak_empty(&self) -> State {
        self.with_counters(|c| {
            decrement(&mut c.weak, "weak", self.address());
            State::of(c.weak)
        })
    }

    pub fn test_strong(&self) -> State {
        self.with_counters(|c| State::of(c.strong))
    }

    pub fn test_weak(&self) -> State {
        self.with_counters(|c| State::of(c.weak))
    }

    /// Leave the teardown state entered by the last strong release
    ///
    /// `Empty` means no weak pointer or self pointer can still reach the
    /// block and the caller must deallocate it.
    pub fn finish_value_teardown(&self) -> State {
        self.with_counters(|c| {
            debug_assert!(c.dropping, "value teardown finished twice");
            c.dropping = false;
            if c.weak.is_zero() && !c.pinned {
                State::Empty
            } else {
                State::NonEmpty
            }
        })
    }

    /// Keep the block allocated while a self pointer refers to it
    ///
    /// A self pointer neither owns the value nor counts as a weak observer;
    /// the pin only keeps the block itself from being freed under it.
    pub fn pin_self_pointer(&self) {
        self.with_counters(|c| {
            debug_assert!(!c.pinned, "control block pinned twice");
            c.pinned = true;
        });
    }

    /// Drop the self pointer pin
    ///
    /// `Empty` means the block is unreferenced and the caller must deallocate
    /// it.
    pub fn release_self_pointer(&self) -> State {
        self.with_counters(|c| {
            debug_assert!(c.pinned, "self pointer released twice");
            c.pinned = false;
            Self::unreferenced(c)
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.with_counters(|c| c.pinned)
    }

    /// Drop one weak observer, testing both counters in the same section
    ///
    /// `Empty` means the block is unreferenced (no weak, no strong, no self
    /// pointer, no value teardown in flight) and the caller must deallocate
    /// it.
    pub fn release_weak(&self) -> State {
        self.with_counters(|c| {
            decrement(&mut c.weak, "weak", self.address());
            Self::unreferenced(c)
        })
    }

    #[inline]
    fn unreferenced(c: &Counters<C>) -> State {
        if c.weak.is_zero() && c.strong.is_zero() && !c.dropping && !c.pinned {
            State::Empty
        } else {
            State::NonEmpty
        }
    }

    pub fn strong_count(&self) -> usize {
        self.with_counters(|c| c.strong.to_usize().unwrap_or(usize::MAX))
    }

    pub fn weak_count(&self) -> usize {
        self.with_counters(|c| c.weak.to_usize().unwrap_or(usize::MAX))
    }

    #[inline]
    pub(crate) fn address(&self) -> *const u8 {
        (self as *const Self).cast()
    }

    #[inline]
    fn with_counters<R>(&self, f: impl FnOnce(&mut Counters<C>) -> R) -> R {
        let _token = self.guard.lock();
        // SAFETY: the guard is held for the whole closure, and `f` never
        // re-enters the block.
        f(unsafe { &mut *self.counters.get() })
    }
}

impl<G: ThreadGuard, C: RefCounter> fmt::Debug for ControlBlock<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .field("origin", &self.origin)
            .field("guard", &G::NAME)
            .finish()
    }
}

#[inline]
fn increment<C: RefCounter>(counter: &mut C, which: &'static str, block: *const u8) {
    match counter.checked_add(&C::one()) {
        Some(next) => *counter = next,
        None => {
            // A wrapped count would let a live value be freed
            error!(event = "counter_overflow", counter = which, address = ?block);
            std::process::abort();
        }
    }
}

#[inline]
fn decrement<C: RefCounter>(counter: &mut C, which: &'static str, block: *const u8) {
    if counter.is_zero() {
        log_counter_violation(which, block);
        panic!("{which} reference count underflow");
    }
    *counter = *counter - C::one();
}
