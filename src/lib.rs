//! A fixed-capacity binary buddy allocator.
//!
//! [`BuddyTree`] manages an arena of `capacity` units, where `capacity` is a
//! power of two. It hands out offsets of contiguous, power-of-two-sized blocks
//! and coalesces freed buddies back into larger blocks. It never touches the
//! memory it describes; turning offsets into pointers is left to the caller.
//!
//! The allocator state is a complete binary tree stored in a flat array. Each
//! node records the size of the largest free block anywhere in its subtree,
//! so allocation, deallocation and size lookup are all `O(log capacity)`.
//!
//! ```
//! use buddy_tree::BuddyTree;
//!
//! let mut tree = BuddyTree::new(8).unwrap();
//!
//! // Requests are rounded up to the next power of two.
//! let a = tree.allocate(3).unwrap();
//! assert_eq!(a, 0);
//! assert_eq!(tree.size_of(a), Ok(4));
//!
//! let b = tree.allocate(4).unwrap();
//! assert_eq!(b, 4);
//! assert_eq!(tree.largest_free(), 0);
//!
//! tree.free(a).unwrap();
//! tree.free(b).unwrap();
//! assert_eq!(tree.largest_free(), 8);
//! ```
//!
//! ## Features
//!
//! - `std`: implements `std::error::Error` for the error types and enables
//!   `MutexBuddyTree`.
//! - `log`: emits allocator events through the [`log`] facade.
//!
//! [`log`]: https://docs.rs/log

#![doc(html_root_url = "https://docs.rs/buddy_tree/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docs_rs, feature(doc_cfg))]

extern crate alloc;

#[cfg(feature = "log")]
#[macro_use]
extern crate log;

// No-op stand-ins for the `log` macros, so call sites need no `cfg`.
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

pub mod sync;
pub mod tree;


use core::{alloc::Layout, fmt};

#[cfg(feature = "std")]
pub use crate::sync::MutexBuddyTree;
pub use crate::{
    sync::RefCellBuddyTree,
    tree::{BuddyTree, MAX_DUMP_UNITS},
};

/// The error type for allocator constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// The requested capacity is invalid.
    ///
    /// The capacity must be a nonzero power of two, and small enough that the
    /// tree's node count fits in a `usize`.
    InvalidCapacity,

    /// The tree metadata could not be allocated.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::InvalidCapacity => {
                f.write_str("capacity must be a nonzero power of two")
            }
            AllocInitError::AllocFailed(layout) => write!(
                f,
                "failed to allocate tree metadata (size={}, align={})",
                layout.size(),
                layout.align()
            ),
        }
    }
}

/// Indicates an allocation failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// A block of zero units was requested.
    ZeroSize,

    /// No free block is large enough to satisfy the request.
    ///
    /// The request is measured after rounding up to a power of two.
    OutOfSpace,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => f.write_str("zero-sized allocation requested"),
            AllocError::OutOfSpace => f.write_str("no free block large enough"),
        }
    }
}

/// Indicates that an offset passed to [`BuddyTree::free`] or
/// [`BuddyTree::size_of`] could not be resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OffsetError {
    /// The offset lies outside the arena.
    OutOfRange {
        /// The offending offset.
        offset: usize,
        /// The capacity of the allocator.
        capacity: usize,
    },

    /// No allocated block contains the offset.
    ///
    /// Only returned by [`BuddyTree::size_of`]; freeing an unallocated offset
    /// is a no-op.
    NotAllocated,
}

impl fmt::Display for OffsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetError::OutOfRange { offset, capacity } => {
                write!(f, "offset {offset} out of range for capacity {capacity}")
            }
            OffsetError::NotAllocated => f.write_str("offset is not allocated"),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
impl std::error::Error for AllocInitError {}

#[cfg(feature = "std")]
#[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
impl std::error::Error for AllocError {}

#[cfg(feature = "std")]
#[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
impl std::error::Error for OffsetError {}
