//! Shared wrappers around [`BuddyTree`].
//!
//! `BuddyTree` operations take `&mut self`. These wrappers guard a single tree
//! with a single lock so that it can be shared, either within one thread
//! ([`RefCellBuddyTree`]) or, with the `std` feature, across threads
//! (`MutexBuddyTree`). Every operation is short and holds the lock for exactly
//! one tree walk.

use core::cell::RefCell;

#[cfg(feature = "std")]
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{AllocError, AllocInitError, BuddyTree, OffsetError};

/// Declares a wrapper that guards a `BuddyTree` with a lock type.
///
/// `$method` must borrow the tree mutably through the lock.
macro_rules! declare_wrappers {
    ($($(#[$attr:meta])* $wrapper:ident uses $typename:ident via $method:path)*) => {
        $(
            #[doc = concat!("A `BuddyTree` wrapped by a `", stringify!($typename), "`.")]
            ///
            /// Methods mirror those of [`BuddyTree`] but take `&self`.
            $(#[$attr])*
            #[derive(Debug)]
            pub struct $wrapper {
                inner: $typename<BuddyTree>,
            }

            impl $wrapper {
                /// Constructs a new wrapped tree managing `capacity` units.
                ///
                /// # Errors
                ///
                /// See [`BuddyTree::new`].
                pub fn new(capacity: usize) -> Result<Self, AllocInitError> {
                    BuddyTree::new(capacity).map(Self::from)
                }

                /// Returns a reference to the inner lock.
                pub fn inner(&self) -> &$typename<BuddyTree> {
                    &self.inner
                }

                /// Allocates a block of at least `size` units.
                ///
                /// See [`BuddyTree::allocate`].
                pub fn allocate(&self, size: usize) -> Result<usize, AllocError> {
                    $method(&self.inner).allocate(size)
                }

                /// Frees the allocated block containing `offset`.
                ///
                /// See [`BuddyTree::free`].
                pub fn free(&self, offset: usize) -> Result<(), OffsetError> {
                    $method(&self.inner).free(offset)
                }

                /// Returns the size of the allocated block containing `offset`.
                ///
                /// See [`BuddyTree::size_of`].
                pub fn size_of(&self, offset: usize) -> Result<usize, OffsetError> {
                    $method(&self.inner).size_of(offset)
                }

                /// Returns the size of the largest block that can currently be
                /// allocated.
                pub fn largest_free(&self) -> usize {
                    $method(&self.inner).largest_free()
                }
            }

            impl From<BuddyTree> for $wrapper {
                fn from(tree: BuddyTree) -> Self {
                    $wrapper {
                        inner: $typename::new(tree),
                    }
                }
            }
        )*
    };
}

declare_wrappers! {
    RefCellBuddyTree uses RefCell via RefCell::borrow_mut
}

// A panic while the lock is held cannot leave the tree half-updated, since
// every operation validates before it mutates.
#[cfg(feature = "std")]
fn lock_ignoring_poison(mutex: &Mutex<BuddyTree>) -> MutexGuard<'_, BuddyTree> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(feature = "std")]
declare_wrappers! {
    #[cfg_attr(docs_rs, doc(cfg(feature = "std")))]
    MutexBuddyTree uses Mutex via lock_ignoring_poison
}
