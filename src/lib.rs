//! ntsp - intrusive reference-counted smart pointers
//!
//! A strong owning pointer, a weak observer and an opt-in self-pointer
//! capability, sharing one control block per object. Two compile-time
//! configuration points shape every instantiation:
//!
//! - the thread policy: [`SpinLock`] (safe across threads) or [`NoLock`]
//!   (single thread, no locking cost)
//! - the counter width: any primitive integer, `usize` by default
//!
//! Values built through [`SharedPointer::make`] share a single allocation with
//! their control block; values adopted through [`SharedPointer::from_box`]
//! keep their own allocation. Both behave identically through the public API.
//!
//! ```
//! use ntsp::{LocalShared, WeakPointer};
//!
//! let s1 = LocalShared::make(1488);
//! let mut s2 = LocalShared::make(666);
//! s2.clone_from(&s1);
//!
//! assert_eq!(*s2, 1488);
//! assert_eq!(s1.strong_count(), 2);
//!
//! let weak = WeakPointer::new(&s1).unwrap();
//! drop((s1, s2));
//! assert!(weak.expired());
//! ```

pub mod allocator;
pub mod error;
pub mod logging;
pub mod pointer;
pub mod refcount;

// Re-export core types
pub use allocator::Origin;
pub use error::{PointerError, Result};
pub use pointer::{
    make_shared, EnableSharedFromThis, LocalShared, LocalWeak, SelfPointer, SharedPointer,
    SyncShared, SyncWeak, WeakPointer,
};
pub use refcount::{ControlBlock, NoLock, RefCounter, SpinLock, State, ThreadGuard, ThreadSafeGuard};
