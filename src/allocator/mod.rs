//! Allocation strategy - monotonic and external control blocks
//!
//! Design: two origins behind one teardown interface:
//! 1. Monotonic: control block and value share one raw allocation
//!    (`#[repr(C)]` header followed by the payload), constructed in place
//! 2. External: the value arrives boxed, the block gets its own `Box`
//!
//! The pointer types only ever see a `NonNull<ControlBlock>` plus a
//! `NonNull<T>`; the origin flag stored in the block picks the strategy.

#[cfg(test)]
mod tests;

use crate::error::{PointerError, Result};
use crate::logging::{log_allocation, log_allocation_failure, log_deallocation, log_value_teardown};
use crate::refcount::{ControlBlock, RefCounter, ThreadGuard};
use std::alloc::{alloc, dealloc, Layout};
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

/// Where a control block (and its value) came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Block and value live in one combined allocation
    Monotonic,
    /// Block and value were allocated independently
    External,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Monotonic => "monotonic",
            Origin::External => "external",
        }
    }
}

/// Layout of a monotonic allocation: header first, payload after
///
/// Never dropped as a whole; both fields are constructed and destroyed
/// individually.
#[repr(C)]
pub(crate) struct MonotonicBlock<T, G: ThreadGuard, C: RefCounter> {
    block: ControlBlock<G, C>,
    value: ManuallyDrop<T>,
}

impl<T, G: ThreadGuard, C: RefCounter> MonotonicBlock<T, G, C> {
    #[inline]
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }
}

/// Raw allocation owned while the value constructor runs
///
/// Releases the memory (and the already-written block) if the constructor
/// unwinds, so no partially built unit ever escapes.
struct PendingAllocation<T, G: ThreadGuard, C: RefCounter> {
    raw: NonNull<MonotonicBlock<T, G, C>>,
}

impl<T, G: ThreadGuard, C: RefCounter> Drop for PendingAllocation<T, G, C> {
    fn drop(&mut self) {
        // SAFETY: `raw` came from `alloc` with this layout and only the block
        // field has been initialized.
        unsafe {
            ptr::drop_in_place(ptr::addr_of_mut!((*self.raw.as_ptr()).block));
            dealloc(self.raw.as_ptr().cast(), MonotonicBlock::<T, G, C>::layout());
        }
    }
}

/// Allocate a block and value in one raw allocation
///
/// The block is written first (origin `Monotonic`, counters at zero), then
/// `init` runs and its result is written right behind it.
pub(crate) fn allocate_monotonic<T, G, C>(
    init: impl FnOnce() -> T,
) -> Result<(NonNull<ControlBlock<G, C>>, NonNull<T>)>
where
    G: ThreadGuard,
    C: RefCounter,
{
    let layout = MonotonicBlock::<T, G, C>::layout();

    // SAFETY: the layout is never zero-sized, it contains the control block.
    let raw = unsafe { alloc(layout) }.cast::<MonotonicBlock<T, G, C>>();
    let Some(raw) = NonNull::new(raw) else {
        log_allocation_failure(layout.size(), layout.align());
        return Err(PointerError::Alloc { layout });
    };

    // SAFETY: `raw` is valid for writes of the whole layout.
    unsafe {
        ptr::addr_of_mut!((*raw.as_ptr()).block).write(ControlBlock::new(Origin::Monotonic));
    }

    let pending = PendingAllocation { raw };
    let value = init();
    std::mem::forget(pending);

    // SAFETY: as above; `block` is the first field of a `#[repr(C)]` struct,
    // so the block pointer and the allocation pointer coincide.
    unsafe {
        ptr::addr_of_mut!((*raw.as_ptr()).value).write(ManuallyDrop::new(value));
        let value = NonNull::new_unchecked(ptr::addr_of_mut!((*raw.as_ptr()).value).cast::<T>());
        log_allocation(Origin::Monotonic.as_str(), layout.size(), raw.as_ptr().cast());
        Ok((raw.cast(), value))
    }
}

/// Allocate a standalone block for an independently owned value
pub(crate) fn allocate_external<G, C>() -> NonNull<ControlBlock<G, C>>
where
    G: ThreadGuard,
    C: RefCounter,
{
    let block = NonNull::from(Box::leak(Box::new(ControlBlock::new(Origin::External))));
    log_allocation(
        Origin::External.as_str(),
        std::mem::size_of::<ControlBlock<G, C>>(),
        block.as_ptr().cast(),
    );
    block
}

/// Destroy the value owned by `block`, leaving the block itself alive
///
/// # Safety
///
/// `value` must be the live value registered with `block`, and the caller
/// must have observed the strong count reaching zero.
pub(crate) unsafe fn destroy_value<T, G, C>(block: &ControlBlock<G, C>, value: NonNull<T>)
where
    G: ThreadGuard,
    C: RefCounter,
{
    let origin = block.origin();
    log_value_teardown(origin.as_str(), block.address());

    match origin {
        // SAFETY: placed by `allocate_monotonic`, memory stays with the block.
        Origin::Monotonic => unsafe { ptr::drop_in_place(value.as_ptr()) },
        // SAFETY: produced by `Box::into_raw` on external construction.
        Origin::External => drop(unsafe { Box::from_raw(value.as_ptr()) }),
    }
}

/// Destroy and free a control block
///
/// # Safety
///
/// The block must be unreferenced (no strong, no weak, no teardown in
/// flight), and `T` must be the value type it was allocated for.
pub(crate) unsafe fn destroy_block<T, G, C>(block: NonNull<ControlBlock<G, C>>)
where
    G: ThreadGuard,
    C: RefCounter,
{
    // SAFETY: the block is still allocated, the caller only promised no one
    // else references it.
    let origin = unsafe { block.as_ref() }.origin();
    log_deallocation(origin.as_str(), block.as_ptr().cast());

    match origin {
        Origin::Monotonic => {
            // SAFETY: the block heads a `MonotonicBlock<T, G, C>` allocation
            // whose value was already destroyed.
            unsafe {
                ptr::drop_in_place(block.as_ptr());
                dealloc(block.as_ptr().cast(), MonotonicBlock::<T, G, C>::layout());
            }
        }
        // SAFETY: produced by `allocate_external`.
        Origin::External => drop(unsafe { Box::from_raw(block.as_ptr()) }),
    }
}
