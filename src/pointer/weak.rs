//! Weak observer pointer
//!
//! Keeps the control block alive, never the value. Liveness is re-checked
//! against the strong counter before any access.

use super::SharedPointer;
use crate::allocator::destroy_block;
use crate::error::{PointerError, Result};
use crate::logging::log_lock_expired;
use crate::refcount::{ControlBlock, RefCounter, SpinLock, ThreadGuard, ThreadSafeGuard};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Non-owning observer of a value managed by [`SharedPointer`]
///
/// # Example
///
/// ```
/// use ntsp::{SharedPointer, WeakPointer};
///
/// let weak = {
///     let shared: SharedPointer<i32> = SharedPointer::make(666);
///     WeakPointer::new(&shared).unwrap()
/// };
///
/// assert!(weak.expired());
/// assert!(weak.lock().is_empty());
/// ```
pub struct WeakPointer<T, G: ThreadGuard = SpinLock, C: RefCounter = usize> {
    block: Option<NonNull<ControlBlock<G, C>>>,
    /// Cached value address, cleared once a lock observes the value gone
    value: AtomicPtr<T>,
}

// SAFETY: the block is only touched through its thread-safe guard; the value
// is only reached through `lock`, which yields a `SharedPointer` with the same
// bounds.
unsafe impl<T: Send + Sync, G: ThreadSafeGuard, C: RefCounter> Send for WeakPointer<T, G, C> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync, G: ThreadSafeGuard, C: RefCounter> Sync for WeakPointer<T, G, C> {}

impl<T, G: ThreadGuard, C: RefCounter> WeakPointer<T, G, C> {
    /// Observe the value owned by `shared`
    ///
    /// Fails with [`PointerError::Empty`] when `shared` carries no value.
    pub fn new(shared: &SharedPointer<T, G, C>) -> Result<Self> {
        let (Some(block), Some(value)) = (shared.block(), shared.value_ptr()) else {
            return Err(PointerError::Empty);
        };
        // SAFETY: `shared` holds a strong reference, the block is alive.
        unsafe { block.as_ref() }.add_weak();
        Ok(Self {
            block: Some(block),
            value: AtomicPtr::new(value.as_ptr()),
        })
    }

    /// Whether the observed value has been released
    pub fn expired(&self) -> bool {
        self.control()
            .map_or(true, |control| control.test_strong().is_empty())
    }

    /// Obtain a strong pointer if the value is still alive
    ///
    /// Returns an empty [`SharedPointer`] otherwise, so check
    /// [`SharedPointer::is_empty`] before dereferencing.
    pub fn lock(&self) -> SharedPointer<T, G, C> {
        let Some(block) = self.block else {
            return SharedPointer::null();
        };
        // SAFETY: this weak reference keeps the block alive.
        let control = unsafe { block.as_ref() };

        if !control.try_add_strong() {
            self.value.store(ptr::null_mut(), Ordering::Relaxed);
            log_lock_expired(control.address());
            return SharedPointer::null();
        }

        SharedPointer::adopt(block, NonNull::new(self.value.load(Ordering::Relaxed)))
    }

    pub fn strong_count(&self) -> usize {
        self.control().map_or(0, ControlBlock::strong_count)
    }

    pub fn weak_count(&self) -> usize {
        self.control().map_or(0, ControlBlock::weak_count)
    }

    /// Whether both pointers observe the same control block
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    #[inline]
    fn control(&self) -> Option<&ControlBlock<G, C>> {
        // SAFETY: a held weak reference keeps the block alive.
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Drop for WeakPointer<T, G, C> {
    fn drop(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        // SAFETY: this weak reference kept the block alive until now.
        if unsafe { block.as_ref() }.release_weak().is_empty() {
            // SAFETY: no strong, no weak and no value teardown in flight.
            unsafe { destroy_block::<T, G, C>(block) };
        }
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Clone for WeakPointer<T, G, C> {
    fn clone(&self) -> Self {
        if let Some(control) = self.control() {
            control.add_weak();
        }
        Self {
            block: self.block,
            value: AtomicPtr::new(self.value.load(Ordering::Relaxed)),
        }
    }

    /// Copy-assignment; a no-op when both sides already share a block
    fn clone_from(&mut self, source: &Self) {
        if Self::ptr_eq(self, source) {
            return;
        }
        *self = source.clone();
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Default for WeakPointer<T, G, C> {
    /// Weak pointer observing nothing; it is always expired
    fn default() -> Self {
        Self {
            block: None,
            value: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl<T, G: ThreadGuard, C: RefCounter> fmt::Debug for WeakPointer<T, G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPointer")
            .field("expired", &self.expired())
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}
