//! Allocator tests
//!
//! Test suite organized by origin:
//! - Monotonic: combined block + value allocation
//! - External: standalone blocks
//! - Unwinding: constructor panics never leak a half-built unit

use super::*;
use crate::refcount::{NoLock, SpinLock, State};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

struct DropCounter(Rc<Cell<usize>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

// ===== Monotonic Tests =====

#[test]
fn monotonic_places_value_behind_block() {
    let (block, value) = allocate_monotonic::<u64, SpinLock, usize>(|| 42).expect("alloc");

    unsafe {
        assert_eq!(*value.as_ptr(), 42);
        assert!(block.as_ref().is_monotonic_allocated());
        assert_eq!(block.as_ref().strong_count(), 0);
        assert_eq!(block.as_ref().weak_count(), 0);

        // Value lives inside the same allocation, after the header
        let start = block.as_ptr() as usize;
        let end = start + MonotonicBlock::<u64, SpinLock, usize>::layout().size();
        let addr = value.as_ptr() as usize;
        assert!(addr >= start + std::mem::size_of::<ControlBlock<SpinLock, usize>>());
        assert!(addr + std::mem::size_of::<u64>() <= end);

        block.as_ref().add_strong();
        assert_eq!(block.as_ref().remove_and_test_strong_empty(), State::Empty);
        destroy_value(block.as_ref(), value);
        assert_eq!(block.as_ref().finish_value_teardown(), State::Empty);
        destroy_block::<u64, SpinLock, usize>(block);
    }
}

#[test]
fn monotonic_value_alignment_respected() {
    #[repr(align(64))]
    struct Aligned(u8);

    let (block, value) = allocate_monotonic::<Aligned, NoLock, u8>(|| Aligned(7)).expect("alloc");
    assert_eq!(value.as_ptr() as usize % 64, 0);

    unsafe {
        assert_eq!((*value.as_ptr()).0, 7);
        block.as_ref().add_strong();
        let _ = block.as_ref().remove_and_test_strong_empty();
        destroy_value(block.as_ref(), value);
        let _ = block.as_ref().finish_value_teardown();
        destroy_block::<Aligned, NoLock, u8>(block);
    }
}

#[test]
fn monotonic_value_drop_runs_once() {
    let drops = Rc::new(Cell::new(0));
    let counter = DropCounter(Rc::clone(&drops));
    let (block, value) =
        allocate_monotonic::<DropCounter, NoLock, usize>(move || counter).expect("alloc");

    unsafe {
        block.as_ref().add_strong();
        let _ = block.as_ref().remove_and_test_strong_empty();
        destroy_value(block.as_ref(), value);
        assert_eq!(drops.get(), 1);

        let _ = block.as_ref().finish_value_teardown();
        destroy_block::<DropCounter, NoLock, usize>(block);
    }

    // Freeing the block must not run the value destructor again
    assert_eq!(drops.get(), 1);
}

#[test]
fn zero_sized_value_is_supported() {
    let (block, value) = allocate_monotonic::<(), SpinLock, u32>(|| ()).expect("alloc");
    unsafe {
        assert!(block.as_ref().is_monotonic_allocated());
        block.as_ref().add_strong();
        let _ = block.as_ref().remove_and_test_strong_empty();
        destroy_value(block.as_ref(), value);
        let _ = block.as_ref().finish_value_teardown();
        destroy_block::<(), SpinLock, u32>(block);
    }
}

// ===== External Tests =====

#[test]
fn external_block_starts_empty() {
    let block = allocate_external::<SpinLock, usize>();
    unsafe {
        assert!(!block.as_ref().is_monotonic_allocated());
        assert_eq!(block.as_ref().origin(), Origin::External);
        assert_eq!(block.as_ref().test_strong(), State::Empty);
        assert_eq!(block.as_ref().test_weak(), State::Empty);
        destroy_block::<u64, SpinLock, usize>(block);
    }
}

#[test]
fn external_value_freed_through_box() {
    let drops = Rc::new(Cell::new(0));
    let block = allocate_external::<NoLock, usize>();
    let value = NonNull::from(Box::leak(Box::new(DropCounter(Rc::clone(&drops)))));

    unsafe {
        block.as_ref().add_strong();
        let _ = block.as_ref().remove_and_test_strong_empty();
        destroy_value(block.as_ref(), value);
        assert_eq!(drops.get(), 1);
        let _ = block.as_ref().finish_value_teardown();
        destroy_block::<DropCounter, NoLock, usize>(block);
    }
}

// ===== Unwinding Tests =====

#[test]
fn constructor_panic_releases_allocation() {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        allocate_monotonic::<String, SpinLock, usize>(|| panic!("constructor failed"))
    }));
    assert!(result.is_err());
}

#[test]
fn origin_names() {
    assert_eq!(Origin::Monotonic.as_str(), "monotonic");
    assert_eq!(Origin::External.as_str(), "external");
}
