//! Pointer family - strong, weak and self pointers over one control block

mod shared;
mod shared_from_this;
mod weak;


pub use shared::{make_shared, SharedPointer};
pub use shared_from_this::{EnableSharedFromThis, SelfPointer};
pub use weak::WeakPointer;

use crate::refcount::{NoLock, SpinLock};

/// Strong pointer usable across threads
pub type SyncShared<T> = SharedPointer<T, SpinLock, usize>;

/// Weak pointer usable across threads
pub type SyncWeak<T> = WeakPointer<T, SpinLock, usize>;

/// Strong pointer confined to one thread, with no-op locking
pub type LocalShared<T> = SharedPointer<T, NoLock, usize>;

/// Weak pointer confined to one thread, with no-op locking
pub type LocalWeak<T> = WeakPointer<T, NoLock, usize>;
