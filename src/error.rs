//! Error kinds reported by the pointer family
//!
//! Double release and use-after-free never show up here: the counter protocol
//! rules them out structurally. What remains are allocation failures and
//! checked usage errors.

use std::alloc::Layout;
use std::fmt;

pub type Result<T> = std::result::Result<T, PointerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    /// Raw allocation of a control block (and value) failed
    Alloc { layout: Layout },
    /// The strong pointer carries no value
    Empty,
    /// `shared_from_this`/`weak_from_this` called on a value that was never
    /// wrapped by a strong pointer
    NotShared,
    /// The value is being (or has been) destroyed
    Expired,
}

impl fmt::Display for PointerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc { layout } => {
                write!(
                    f,
                    "Allocation failed: {} bytes aligned to {}",
                    layout.size(),
                    layout.align()
                )
            }
            Self::Empty => write!(f, "Pointer is empty"),
            Self::NotShared => {
                write!(f, "Value is not owned by any shared pointer")
            }
            Self::Expired => write!(f, "Value has already been released"),
        }
    }
}

impl std::error::Error for PointerError {}
