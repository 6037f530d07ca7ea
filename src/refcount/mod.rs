//! Reference counting engine - control blocks and thread guards
//!
//! Design: one control block per logical object, holding the strong and weak
//! counters and the allocation origin. All counter updates go through the
//! block's guard; the pointer types never touch the counters directly.

mod control;
mod guard;


pub use control::{ControlBlock, State};
pub use guard::{GuardToken, NoLock, SpinLock, ThreadGuard, ThreadSafeGuard};

use core::fmt::Debug;
use num_traits::PrimInt;

/// Integral type usable as a strong/weak counter
///
/// Any primitive integer qualifies; the width is chosen per pointer family
/// through the `C` type parameter (`usize` by default).
pub trait RefCounter: PrimInt + Debug + Send + Sync + 'static {}

impl<C> RefCounter for C where C: PrimInt + Debug + Send + Sync + 'static {}
