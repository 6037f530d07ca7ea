//! Strong owning pointer
//!
//! Release protocol, run by `Drop` and by every reassignment:
//! 1. Decrement strong; stop while other owners remain
//! 2. Destroy the value (in place for monotonic blocks, through `Box` otherwise)
//! 3. Finish the teardown; free the block only if no weak observer is left
//!
//! Value and block are torn down in two separate steps so that weak pointers
//! can observe "value gone, block still present" safely.

use super::WeakPointer;
use crate::allocator::{allocate_external, allocate_monotonic, destroy_block, destroy_value};
use crate::error::{PointerError, Result};
use crate::refcount::{ControlBlock, RefCounter, SpinLock, State, ThreadGuard, ThreadSafeGuard};
use std::alloc::handle_alloc_error;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

/// Intrusive reference-counted strong pointer
///
/// `G` selects the thread policy ([`SpinLock`] or
/// [`NoLock`](crate::NoLock)), `C` the counter width.
///
/// # Example
///
/// ```
/// use ntsp::SharedPointer;
///
/// let s1: SharedPointer<u64> = SharedPointer::make(42);
/// let s2 = s1.clone();
///
/// assert_eq!(*s2, 42);
/// assert_eq!(s1.strong_count(), 2);
/// assert!(s1 == s2);
/// ```
pub struct SharedPointer<T, G: ThreadGuard = SpinLock, C: RefCounter = usize> {
    block: Option<NonNull<ControlBlock<G, C>>>,
    value: Option<NonNull<T>>,
    _owns: PhantomData<T>,
}

// SAFETY: the counters are serialized by a thread-safe guard and the value is
// only handed out by shared reference, as with `std::sync::Arc`.
unsafe impl<T: Send + Sync, G: ThreadSafeGuard, C: RefCounter> Send for SharedPointer<T, G, C> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync, G: ThreadSafeGuard, C: RefCounter> Sync for SharedPointer<T, G, C> {}

impl<T, G: ThreadGuard, C: RefCounter> SharedPointer<T, G, C> {
    /// Allocate block and value together and wrap them
    ///
    /// Aborts through [`handle_alloc_error`] if memory is exhausted; use
    /// [`SharedPointer::try_make`] to handle that case.
    ///
    /// Leaves an embedded [`SelfPointer`](crate::SelfPointer) unset; values
    /// implementing [`EnableSharedFromThis`](crate::EnableSharedFromThis)
    /// go through [`SharedPointer::make_shared_from_this`] instead.
    pub fn make(value: T) -> Self {
        Self::make_with(move || value)
    }

    /// Like [`SharedPointer::make`], constructing the value in place once the
    /// allocation succeeded
    pub fn make_with(init: impl FnOnce() -> T) -> Self {
        Self::try_make_with(init).unwrap_or_else(|err| match err {
            PointerError::Alloc { layout } => handle_alloc_error(layout),
            other => panic!("{other}"),
        })
    }

    pub fn try_make(value: T) -> Result<Self> {
        Self::try_make_with(move || value)
    }

    pub fn try_make_with(init: impl FnOnce() -> T) -> Result<Self> {
        let (block, value) = allocate_monotonic::<T, G, C>(init)?;
        // SAFETY: freshly allocated, nobody else references it yet.
        unsafe { block.as_ref() }.add_strong();
        Ok(Self::adopt(block, Some(value)))
    }

    /// Take ownership of an independently allocated value
    ///
    /// Like [`SharedPointer::make`], leaves an embedded self pointer unset;
    /// see [`SharedPointer::from_box_shared_from_this`].
    pub fn from_box(value: Box<T>) -> Self {
        let block = allocate_external::<G, C>();
        // SAFETY: freshly allocated, nobody else references it yet.
        unsafe { block.as_ref() }.add_strong();
        Self::adopt(block, Some(NonNull::from(Box::leak(value))))
    }

    /// Create a pointer owning a standalone block but no value
    pub fn new() -> Self {
        let block = allocate_external::<G, C>();
        // SAFETY: freshly allocated, nobody else references it yet.
        unsafe { block.as_ref() }.add_strong();
        Self::adopt(block, None)
    }

    /// Wrap a block whose strong count already includes this pointer
    #[inline]
    pub(crate) fn adopt(block: NonNull<ControlBlock<G, C>>, value: Option<NonNull<T>>) -> Self {
        Self {
            block: Some(block),
            value,
            _owns: PhantomData,
        }
    }

    /// Pointer referencing no block at all (moved-from state)
    #[inline]
    pub(crate) const fn null() -> Self {
        Self {
            block: None,
            value: None,
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<ControlBlock<G, C>>> {
        self.block
    }

    #[inline]
    pub(crate) fn value_ptr(&self) -> Option<NonNull<T>> {
        self.value
    }

    /// Move ownership out, leaving `self` empty without touching any counter
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::null())
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a held strong reference keeps the value alive.
        self.value.map(|value| unsafe { value.as_ref() })
    }

    /// Raw value pointer, null when empty
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.value.map_or(ptr::null(), |value| value.as_ptr() as *const T)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    #[inline]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Mutable access, granted only to the sole owner with no weak observers
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let block = self.control()?;
        if block.strong_count() != 1 || block.weak_count() != 0 {
            return None;
        }
        // SAFETY: no other strong or weak pointer exists and `self` is
        // borrowed mutably, so this is the only path to the value.
        self.value.map(|mut value| unsafe { value.as_mut() })
    }

    /// Create a weak observer
    ///
    /// # Panics
    ///
    /// If the pointer is empty; use [`WeakPointer::new`] to get an error
    /// instead.
    pub fn downgrade(&self) -> WeakPointer<T, G, C> {
        WeakPointer::new(self).unwrap_or_else(|err| panic!("cannot downgrade: {err}"))
    }

    pub fn strong_count(&self) -> usize {
        self.control().map_or(0, ControlBlock::strong_count)
    }

    pub fn weak_count(&self) -> usize {
        self.control().map_or(0, ControlBlock::weak_count)
    }

    pub fn is_monotonic_allocated(&self) -> bool {
        self.control().map_or(false, ControlBlock::is_monotonic_allocated)
    }

    /// Whether both pointers share one control block
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    #[inline]
    fn control(&self) -> Option<&ControlBlock<G, C>> {
        // SAFETY: a held strong reference keeps the block alive.
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    #[inline]
    fn block_addr(&self) -> usize {
        self.block.map_or(0, |block| block.as_ptr() as usize)
    }

    /// Give up this pointer's strong reference
    fn release(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        let value = self.value.take();

        // SAFETY: `block` stays allocated at least until this pointer's strong
        // reference is released.
        let control = unsafe { block.as_ref() };
        if control.remove_and_test_strong_empty() == State::NonEmpty {
            return;
        }

        // Runs even if the value destructor unwinds
        let teardown = FinishTeardown::<T, G, C> {
            block,
            _value: PhantomData,
        };
        if let Some(value) = value {
            // SAFETY: the strong count just reached zero, so this is the only
            // path left to the value.
            unsafe { destroy_value(control, value) };
        }
        drop(teardown);
    }
}

/// Second teardown phase: free the block unless weak observers remain
struct FinishTeardown<T, G: ThreadGuard, C: RefCounter> {
    block: NonNull<ControlBlock<G, C>>,
    _value: PhantomData<T>,
}

impl<T, G: ThreadGuard, C: RefCounter> Drop for FinishTeardown<T, G, C> {
    fn drop(&mut self) {
        // SAFETY: the `dropping` state pins the block until this call.
        let state = unsafe { self.block.as_ref() }.finish_value_teardown();
        if state.is_empty() {
            // SAFETY: no strong, no weak and the teardown is over.
            unsafe { destroy_block::<T, G, C>(self.block) };
        }
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Drop for SharedPointer<T, G, C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Clone for SharedPointer<T, G, C> {
    fn clone(&self) -> Self {
        match self.control() {
            Some(control) => control.add_strong(),
            None => return Self::null(),
        }
        Self {
            block: self.block,
            value: self.value,
            _owns: PhantomData,
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

impl<T, G: ThreadGuard, C: RefCounter> Default for SharedPointer<T, G, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: ThreadGuard, C: RefCounter> From<Box<T>> for SharedPointer<T, G, C> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Deref for SharedPointer<T, G, C> {
    type Target = T;

    /// # Panics
    ///
    /// If the pointer is empty.
    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPointer"),
        }
    }
}

impl<T, G: ThreadGuard, C: RefCounter> PartialEq for SharedPointer<T, G, C> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Eq for SharedPointer<T, G, C> {}

impl<T, G: ThreadGuard, C: RefCounter> PartialOrd for SharedPointer<T, G, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Ord for SharedPointer<T, G, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.block_addr().cmp(&other.block_addr())
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Hash for SharedPointer<T, G, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.block_addr().hash(state);
    }
}

impl<T: fmt::Debug, G: ThreadGuard, C: RefCounter> fmt::Debug for SharedPointer<T, G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPointer")
            .field("value", &self.get())
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}

impl<T, G: ThreadGuard, C: RefCounter> fmt::Pointer for SharedPointer<T, G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.as_ptr(), f)
    }
}

/// Allocate `value` in a monotonic block using the default thread policy
pub fn make_shared<T>(value: T) -> SharedPointer<T> {
    SharedPointer::make(value)
}
