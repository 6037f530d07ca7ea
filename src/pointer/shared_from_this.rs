//! Self-pointer capability
//!
//! A value that embeds a [`SelfPointer`] and implements
//! [`EnableSharedFromThis`] can mint strong and weak pointers to itself once
//! it is owned by a [`SharedPointer`]. The embedded field is a back
//! reference only: it never counts as an owner, so no cycle is formed. It does
//! pin the control block, which therefore outlives every attached field.
//!
//! The field only answers for the value it was attached to. Moved or swapped
//! into another value (through [`SharedPointer::get_mut`], say), it reports
//! [`PointerError::NotShared`] there.
//!
//! ```
//! use ntsp::{EnableSharedFromThis, SelfPointer, SharedPointer};
//!
//! struct Node {
//!     id: u32,
//!     this: SelfPointer<Node>,
//! }
//!
//! impl EnableSharedFromThis for Node {
//!     fn self_pointer(&self) -> &SelfPointer<Self> {
//!         &self.this
//!     }
//!
//!     fn self_pointer_mut(&mut self) -> &mut SelfPointer<Self> {
//!         &mut self.this
//!     }
//! }
//!
//! let node: SharedPointer<Node> =
//!     SharedPointer::make_shared_from_this(Node { id: 7, this: SelfPointer::new() });
//! let again = node.shared_from_this().unwrap();
//! assert_eq!(again.id, 7);
//! assert!(node == again);
//! ```

use super::{SharedPointer, WeakPointer};
use crate::allocator::{allocate_external, allocate_monotonic, destroy_block};
use crate::error::{PointerError, Result};
use crate::refcount::{ControlBlock, RefCounter, SpinLock, ThreadGuard, ThreadSafeGuard};
use std::alloc::handle_alloc_error;
use std::fmt;
use std::ptr::{self, NonNull};

/// Non-owning back reference from a value to its own control block
///
/// Unset until the value is first wrapped by one of the
/// `*_shared_from_this` constructors of [`SharedPointer`]. Once set, it holds
/// the block pinned until the field itself is dropped.
pub struct SelfPointer<T, G: ThreadGuard = SpinLock, C: RefCounter = usize> {
    slot: Option<(NonNull<ControlBlock<G, C>>, NonNull<T>)>,
}

// SAFETY: the slot only changes through `&mut`, and the pinned block is
// guarded by a thread-safe guard.
unsafe impl<T: Send + Sync, G: ThreadSafeGuard, C: RefCounter> Send for SelfPointer<T, G, C> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync, G: ThreadSafeGuard, C: RefCounter> Sync for SelfPointer<T, G, C> {}

impl<T, G: ThreadGuard, C: RefCounter> SelfPointer<T, G, C> {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    /// Whether the owning value has been wrapped by a strong pointer
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.slot.is_some()
    }

    /// Point at a freshly wrapped value
    ///
    /// A slot carried in from another value is released first.
    fn attach(&mut self, block: NonNull<ControlBlock<G, C>>, value: NonNull<T>) {
        // SAFETY: called by the wrapping constructors on a live block.
        unsafe { block.as_ref() }.pin_self_pointer();
        *self = Self {
            slot: Some((block, value)),
        };
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Drop for SelfPointer<T, G, C> {
    fn drop(&mut self) {
        let Some((block, _)) = self.slot.take() else {
            return;
        };
        // SAFETY: the pin kept the block allocated until now.
        if unsafe { block.as_ref() }.release_self_pointer().is_empty() {
            // SAFETY: no strong, no weak, no pin and no teardown in flight.
            unsafe { destroy_block::<T, G, C>(block) };
        }
    }
}

impl<T, G: ThreadGuard, C: RefCounter> Default for SelfPointer<T, G, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A copied value is a new, not yet shared object
impl<T, G: ThreadGuard, C: RefCounter> Clone for SelfPointer<T, G, C> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T, G: ThreadGuard, C: RefCounter> fmt::Debug for SelfPointer<T, G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfPointer")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Opt-in capability for values that need pointers to themselves
pub trait EnableSharedFromThis<G: ThreadGuard = SpinLock, C: RefCounter = usize>: Sized {
    fn self_pointer(&self) -> &SelfPointer<Self, G, C>;

    fn self_pointer_mut(&mut self) -> &mut SelfPointer<Self, G, C>;

    /// New strong pointer sharing ownership with the existing owners
    ///
    /// [`PointerError::NotShared`] if the value was never wrapped or its
    /// field was attached to another value, [`PointerError::Expired`] if it
    /// is being dropped.
    fn shared_from_this(&self) -> Result<SharedPointer<Self, G, C>> {
        let (block, value) = self.self_pointer().slot.ok_or(PointerError::NotShared)?;
        if !ptr::eq(value.as_ptr().cast_const(), self) {
            return Err(PointerError::NotShared);
        }
        // SAFETY: the slot pins the block. A live strong count together with
        // the address match means `self` is the value the block owns.
        if !unsafe { block.as_ref() }.try_add_strong() {
            return Err(PointerError::Expired);
        }
        Ok(SharedPointer::adopt(block, Some(value)))
    }

    /// New weak pointer observing this value
    fn weak_from_this(&self) -> Result<WeakPointer<Self, G, C>> {
        let shared = self.shared_from_this()?;
        WeakPointer::new(&shared)
    }
}

impl<T, G, C> SharedPointer<T, G, C>
where
    T: EnableSharedFromThis<G, C>,
    G: ThreadGuard,
    C: RefCounter,
{
    /// [`SharedPointer::make`] for values with the self-pointer capability
    pub fn make_shared_from_this(value: T) -> Self {
        Self::try_make_shared_from_this(value).unwrap_or_else(|err| match err {
            PointerError::Alloc { layout } => handle_alloc_error(layout),
            other => panic!("{other}"),
        })
    }

    pub fn try_make_shared_from_this(value: T) -> Result<Self> {
        let (block, slot) = allocate_monotonic::<T, G, C>(move || value)?;
        // SAFETY: freshly placed, nothing else references the value yet.
        unsafe { (*slot.as_ptr()).self_pointer_mut().attach(block, slot) };
        // SAFETY: freshly allocated block.
        unsafe { block.as_ref() }.add_strong();
        Ok(Self::adopt(block, Some(slot)))
    }

    /// [`SharedPointer::from_box`] for values with the self-pointer capability
    pub fn from_box_shared_from_this(value: Box<T>) -> Self {
        let block = allocate_external::<G, C>();
        let slot = NonNull::from(Box::leak(value));
        // SAFETY: uniquely owned until wrapped below.
        unsafe { (*slot.as_ptr()).self_pointer_mut().attach(block, slot) };
        // SAFETY: freshly allocated block.
        unsafe { block.as_ref() }.add_strong();
        Self::adopt(block, Some(slot))
    }
}
