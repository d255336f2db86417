//! Binary-buddy allocation over an implicit tree.
//!
//! A [`BuddyTree`] divides an arena of `capacity` units into power-of-two
//! blocks. Its metadata is a complete binary tree of `2 * capacity - 1` nodes
//! stored in a flat array: node 0 covers the whole arena, node `i` has
//! children `2i + 1` and `2i + 2`, and each level halves the span of the one
//! above it. The leaves are the individual units.
//!
//! Every node stores the size of the largest free block in its subtree. A
//! node whose whole span is free stores its span; an allocated block is
//! marked by storing 0 at the node covering it.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case       |
//! |--------------------------|-----------|------------------|
//! | Allocate                 | O(1)      | O(log capacity)  |
//! | Free                     | O(1)      | O(log capacity)  |
//! | Size lookup              | O(1)      | O(log capacity)  |
//!
//! #### Fragmentation
//!
//! Requests are rounded up to the next power of two, so a request of `n`
//! units wastes up to `n - 1` units internally. Two free blocks only merge
//! when they are buddies, so external fragmentation is possible when live
//! blocks separate free regions of the arena.

use alloc::{boxed::Box, string::String, vec, vec::Vec};
use core::{alloc::Layout, cmp, fmt, iter};

use crate::{AllocError, AllocInitError, OffsetError};

/// The largest capacity that [`BuddyTree::dump`] will render.
pub const MAX_DUMP_UNITS: usize = 64;

#[inline]
const fn left_child(index: usize) -> usize {
    2 * index + 1
}

#[inline]
const fn right_child(index: usize) -> usize {
    2 * index + 2
}

#[inline]
const fn parent(index: usize) -> usize {
    (index + 1) / 2 - 1
}

/// Rounds a requested size up to the size of the block that will hold it.
fn normalize(size: usize) -> Result<usize, AllocError> {
    match size {
        0 => Err(AllocError::ZeroSize),
        // A request above the largest representable power of two can never
        // fit, whatever the capacity.
        s => s.checked_next_power_of_two().ok_or(AllocError::OutOfSpace),
    }
}

/// A fixed-capacity binary-buddy allocator.
///
/// For a discussion of the layout, see the [module-level documentation].
///
/// `BuddyTree` hands out offsets in `[0, capacity)`; it never reads or writes
/// the memory those offsets describe. Dropping the tree releases its metadata.
///
/// [module-level documentation]: crate::tree
pub struct BuddyTree {
    /// The number of units in the arena. Always a power of two.
    capacity: usize,
    /// The largest free block in each node's subtree.
    longest: Box<[usize]>,
}

impl BuddyTree {
    /// Constructs a new `BuddyTree` managing `capacity` units.
    ///
    /// The whole arena starts out free.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidCapacity`] if `capacity` is zero, is
    /// not a power of two, or is too large for its tree to be indexed. Returns
    /// [`AllocInitError::AllocFailed`] if the tree itself cannot be allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use buddy_tree::{AllocInitError, BuddyTree};
    ///
    /// let tree = BuddyTree::new(1024).unwrap();
    /// assert_eq!(tree.capacity(), 1024);
    /// assert_eq!(tree.largest_free(), 1024);
    ///
    /// assert_eq!(BuddyTree::new(0).unwrap_err(), AllocInitError::InvalidCapacity);
    /// assert_eq!(BuddyTree::new(12).unwrap_err(), AllocInitError::InvalidCapacity);
    /// ```
    pub fn new(capacity: usize) -> Result<BuddyTree, AllocInitError> {
        if !capacity.is_power_of_two() {
            return Err(AllocInitError::InvalidCapacity);
        }

        let num_nodes = capacity
            .checked_mul(2)
            .ok_or(AllocInitError::InvalidCapacity)?
            - 1;
        let layout =
            Layout::array::<usize>(num_nodes).map_err(|_| AllocInitError::InvalidCapacity)?;

        let mut longest = Vec::new();
        longest
            .try_reserve_exact(num_nodes)
            .map_err(|_| AllocInitError::AllocFailed(layout))?;

        // Each level has twice the nodes of the one above it, at half the span.
        let mut span = capacity;
        let mut level_len = 1;
        while span > 0 {
            longest.extend(iter::repeat(span).take(level_len));
            span /= 2;
            level_len *= 2;
        }

        debug_assert_eq!(longest.len(), num_nodes);

        Ok(BuddyTree {
            capacity,
            longest: longest.into_boxed_slice(),
        })
    }

    /// Returns the number of units managed by this allocator.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the size of the largest block that can currently be allocated.
    ///
    /// This is 0 when the arena is fully occupied and `capacity()` when it is
    /// entirely free.
    #[inline]
    pub fn largest_free(&self) -> usize {
        self.longest[0]
    }

    /// Returns the number of units spanned by the node at `index`.
    #[inline]
    fn span_of(&self, index: usize) -> usize {
        let depth = (index + 1).ilog2();
        self.capacity >> depth
    }

    /// Returns the arena offset of the first unit covered by a node.
    #[inline]
    fn offset_of(&self, index: usize, span: usize) -> usize {
        (index + 1) * span - self.capacity
    }

    /// Returns the index of the leaf covering `offset`.
    fn leaf_index(&self, offset: usize) -> Result<usize, OffsetError> {
        if offset >= self.capacity {
            return Err(OffsetError::OutOfRange {
                offset,
                capacity: self.capacity,
            });
        }

        Ok(offset + self.capacity - 1)
    }

    /// Finds the node marking the allocated block that contains the leaf at
    /// `index`, along with that block's size.
    ///
    /// An allocated block is marked by the only zero on the path from any of
    /// its leaves to the root. Returns `None` if the path has no zero.
    fn find_allocated(&self, mut index: usize) -> Option<(usize, usize)> {
        let mut block_size = 1;

        while self.longest[index] != 0 {
            if index == 0 {
                return None;
            }

            index = parent(index);
            block_size *= 2;
        }

        Some((index, block_size))
    }

    /// Allocates a block of at least `size` units.
    ///
    /// `size` is rounded up to the next power of two, and the returned offset
    /// is aligned to that rounded size. The search descends from the root,
    /// taking the left half whenever it can hold the request.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ZeroSize`] if `size` is zero, or
    /// [`AllocError::OutOfSpace`] if no free block is large enough. The
    /// allocator is unchanged on failure.
    ///
    /// # Example
    ///
    /// ```
    /// use buddy_tree::{AllocError, BuddyTree};
    ///
    /// let mut tree = BuddyTree::new(16).unwrap();
    ///
    /// let ofs = tree.allocate(5).unwrap();
    /// assert_eq!(tree.size_of(ofs), Ok(8));
    ///
    /// assert_eq!(tree.allocate(16), Err(AllocError::OutOfSpace));
    /// ```
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        let target = normalize(size)?;

        if self.longest[0] < target {
            debug!(
                "allocate: no free block for {} units (rounded to {}, largest free {})",
                size, target, self.longest[0]
            );
            return Err(AllocError::OutOfSpace);
        }

        // Descend toward a node spanning exactly `target` units, preferring
        // the left child. The parent's value is the max of its children, so
        // if the left child can't fit the request, the right one can.
        let mut index = 0;
        let mut span = self.capacity;
        while span != target {
            span /= 2;

            let left = left_child(index);
            index = if self.longest[left] >= target {
                left
            } else {
                right_child(index)
            };
        }

        self.longest[index] = 0;
        let offset = self.offset_of(index, span);

        while index != 0 {
            index = parent(index);
            self.longest[index] = cmp::max(
                self.longest[left_child(index)],
                self.longest[right_child(index)],
            );
        }

        trace!("allocate: {} units at offset {}", span, offset);

        Ok(offset)
    }

    /// Frees the allocated block containing `offset`.
    ///
    /// The freed block is merged with its buddy, and the result with its own
    /// buddy, for as long as both halves are entirely free.
    ///
    /// `offset` should be an offset returned by [`allocate`]. Any other offset
    /// inside a live block frees that whole block. If no live block contains
    /// `offset`, this is a no-op, so a repeated free is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`OffsetError::OutOfRange`] if `offset` is not less than the
    /// capacity. The allocator is unchanged on failure.
    ///
    /// [`allocate`]: BuddyTree::allocate
    pub fn free(&mut self, offset: usize) -> Result<(), OffsetError> {
        let leaf = self.leaf_index(offset)?;

        let (mut index, mut block_size) = match self.find_allocated(leaf) {
            Some(found) => found,
            None => {
                debug!("free: offset {} is not allocated", offset);
                return Ok(());
            }
        };

        self.longest[index] = block_size;
        trace!("free: {} units at offset {}", block_size, offset);

        while index != 0 {
            index = parent(index);
            block_size *= 2;

            let left = self.longest[left_child(index)];
            let right = self.longest[right_child(index)];

            // Buddies coalesce only when both are entirely free.
            self.longest[index] = if left + right == block_size {
                block_size
            } else {
                cmp::max(left, right)
            };
        }

        Ok(())
    }

    /// Returns the size of the allocated block containing `offset`.
    ///
    /// For an offset returned by [`allocate`], this is the requested size
    /// rounded up to a power of two.
    ///
    /// # Errors
    ///
    /// Returns [`OffsetError::OutOfRange`] if `offset` is not less than the
    /// capacity, or [`OffsetError::NotAllocated`] if no live block contains
    /// it.
    ///
    /// [`allocate`]: BuddyTree::allocate
    pub fn size_of(&self, offset: usize) -> Result<usize, OffsetError> {
        let leaf = self.leaf_index(offset)?;

        self.find_allocated(leaf)
            .map(|(_, block_size)| block_size)
            .ok_or(OffsetError::NotAllocated)
    }

    /// Renders the arena as one character per unit: `*` for allocated units
    /// and `_` for free ones.
    ///
    /// Returns `None` if the capacity exceeds [`MAX_DUMP_UNITS`].
    ///
    /// # Example
    ///
    /// ```
    /// use buddy_tree::BuddyTree;
    ///
    /// let mut tree = BuddyTree::new(8).unwrap();
    /// tree.allocate(2).unwrap();
    /// tree.allocate(1).unwrap();
    ///
    /// assert_eq!(tree.dump().as_deref(), Some("***_____"));
    /// ```
    pub fn dump(&self) -> Option<String> {
        if self.capacity > MAX_DUMP_UNITS {
            return None;
        }

        let first_leaf = self.capacity - 1;
        let mut canvas = vec![b'_'; self.capacity];

        for (index, &longest) in self.longest.iter().enumerate() {
            if longest != 0 {
                continue;
            }

            if index >= first_leaf {
                canvas[index - first_leaf] = b'*';
            } else if self.longest[left_child(index)] != 0 && self.longest[right_child(index)] != 0
            {
                // A zero above two nonzero children marks an allocated block.
                // A zero above zeroes is just full, and its allocations are
                // painted further down.
                let span = self.span_of(index);
                let offset = self.offset_of(index, span);
                canvas[offset..offset + span].fill(b'*');
            }
        }

        Some(canvas.into_iter().map(char::from).collect())
    }

    /// Asserts that every node agrees with its children.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let first_leaf = self.capacity - 1;

        for (index, &longest) in self.longest.iter().enumerate() {
            let span = self.span_of(index);
            assert!(
                longest == 0 || (longest.is_power_of_two() && longest <= span),
                "node {index}: longest {longest} invalid for span {span}"
            );

            if index >= first_leaf {
                continue;
            }

            let left = self.longest[left_child(index)];
            let right = self.longest[right_child(index)];
            let half = span / 2;

            if left == half && right == half {
                // Either an allocated block or an entirely free one.
                assert!(
                    longest == 0 || longest == span,
                    "node {index}: free children but longest {longest}"
                );
            } else {
                assert_eq!(
                    longest,
                    cmp::max(left, right),
                    "node {index}: longest is not the max of its children"
                );
            }
        }
    }
}

impl fmt::Debug for BuddyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyTree")
            .field("capacity", &self.capacity)
            .field("largest_free", &self.largest_free())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::prelude::rust_2021::*;

    use super::*;

    #[test]
    fn new_rejects_invalid_capacity() {
        for capacity in [0, 3, 6, 12, 100, usize::MAX] {
            assert_eq!(
                BuddyTree::new(capacity).unwrap_err(),
                AllocInitError::InvalidCapacity
            );
        }
    }

    #[test]
    fn new_rejects_unindexable_capacity() {
        let capacity = 1 << (usize::BITS - 1);
        assert_eq!(
            BuddyTree::new(capacity).unwrap_err(),
            AllocInitError::InvalidCapacity
        );
    }

    #[test]
    fn new_starts_entirely_free() {
        for shift in 0..=12 {
            let capacity = 1 << shift;
            let tree = BuddyTree::new(capacity).unwrap();

            assert_eq!(tree.capacity(), capacity);
            assert_eq!(tree.largest_free(), capacity);
            assert_eq!(tree.longest.len(), 2 * capacity - 1);
            tree.check_invariants();

            for (index, &longest) in tree.longest.iter().enumerate() {
                assert_eq!(longest, tree.span_of(index));
            }
        }
    }

    #[test]
    fn normalize_rounds_up() {
        assert_eq!(normalize(0), Err(AllocError::ZeroSize));
        assert_eq!(normalize(1), Ok(1));
        assert_eq!(normalize(3), Ok(4));
        assert_eq!(normalize(4), Ok(4));
        assert_eq!(normalize(5), Ok(8));
        assert_eq!(normalize(usize::MAX), Err(AllocError::OutOfSpace));
    }

    #[test]
    fn capacity_eight_scenario() {
        let mut tree = BuddyTree::new(8).unwrap();

        assert_eq!(tree.allocate(3), Ok(0));
        assert_eq!(tree.largest_free(), 4);

        assert_eq!(tree.allocate(4), Ok(4));
        assert_eq!(tree.largest_free(), 0);
        assert_eq!(tree.dump().as_deref(), Some("********"));

        tree.free(0).unwrap();
        assert_eq!(tree.largest_free(), 4);
        assert_eq!(tree.dump().as_deref(), Some("____****"));

        tree.free(4).unwrap();
        assert_eq!(tree.largest_free(), 8);
        assert_eq!(tree.dump().as_deref(), Some("________"));

        tree.check_invariants();
    }

    #[test]
    fn single_unit_arena() {
        let mut tree = BuddyTree::new(1).unwrap();

        assert_eq!(tree.allocate(1), Ok(0));
        assert_eq!(tree.allocate(1), Err(AllocError::OutOfSpace));
        assert_eq!(tree.size_of(0), Ok(1));

        tree.free(0).unwrap();
        assert_eq!(tree.largest_free(), 1);
        assert_eq!(tree.size_of(0), Err(OffsetError::NotAllocated));

        // Freeing again is a no-op.
        tree.free(0).unwrap();
        assert_eq!(tree.largest_free(), 1);
    }

    #[test]
    fn size_of_reports_rounded_size() {
        let mut tree = BuddyTree::new(16).unwrap();

        let ofs = tree.allocate(5).unwrap();
        assert_eq!(tree.size_of(ofs), Ok(8));

        let ofs = tree.allocate(3).unwrap();
        assert_eq!(tree.size_of(ofs), Ok(4));

        let ofs = tree.allocate(1).unwrap();
        assert_eq!(tree.size_of(ofs), Ok(1));
    }

    #[test]
    fn size_of_inside_block() {
        let mut tree = BuddyTree::new(16).unwrap();

        let ofs = tree.allocate(8).unwrap();
        for inner in ofs..ofs + 8 {
            assert_eq!(tree.size_of(inner), Ok(8));
        }
        for outer in ofs + 8..16 {
            assert_eq!(tree.size_of(outer), Err(OffsetError::NotAllocated));
        }
    }

    #[test]
    fn oversized_allocation_fails_without_change() {
        let mut tree = BuddyTree::new(16).unwrap();
        tree.allocate(2).unwrap();
        let before = tree.largest_free();

        assert_eq!(tree.allocate(17), Err(AllocError::OutOfSpace));
        assert_eq!(tree.allocate(usize::MAX), Err(AllocError::OutOfSpace));
        assert_eq!(tree.allocate(0), Err(AllocError::ZeroSize));
        assert_eq!(tree.largest_free(), before);
        tree.check_invariants();
    }

    #[test]
    fn allocation_round_trip_restores_root() {
        let mut tree = BuddyTree::new(64).unwrap();
        tree.allocate(4).unwrap();
        tree.allocate(16).unwrap();

        for size in 1..=32 {
            let before = tree.largest_free();
            let ofs = tree.allocate(size).unwrap();
            tree.free(ofs).unwrap();
            assert_eq!(tree.largest_free(), before, "size {size}");
            tree.check_invariants();
        }
    }

    #[test]
    fn freed_buddies_coalesce() {
        let mut tree = BuddyTree::new(16).unwrap();

        let a = tree.allocate(4).unwrap();
        let b = tree.allocate(4).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 4);
        assert_eq!(b - a, 4);

        // The freed block is reused before the untouched half.
        tree.free(a).unwrap();
        assert_eq!(tree.allocate(4), Ok(a));

        tree.free(a).unwrap();
        tree.free(b).unwrap();

        // Both buddies merged, so an 8-unit block fits where they were.
        assert_eq!(tree.allocate(8), Ok(0));
        assert_eq!(tree.largest_free(), 8);
    }

    #[test]
    fn non_buddies_do_not_coalesce() {
        let mut tree = BuddyTree::new(8).unwrap();

        let offsets: Vec<usize> = (0..4).map(|_| tree.allocate(2).unwrap()).collect();
        assert_eq!(offsets, [0, 2, 4, 6]);

        // 2..4 and 4..6 are adjacent but not buddies.
        tree.free(2).unwrap();
        tree.free(4).unwrap();
        assert_eq!(tree.largest_free(), 2);
        assert_eq!(tree.allocate(4), Err(AllocError::OutOfSpace));
        assert_eq!(tree.dump().as_deref(), Some("**____**"));
        tree.check_invariants();
    }

    #[test]
    fn free_in_any_order_restores_capacity() {
        let mut tree = BuddyTree::new(32).unwrap();
        let sizes = [1, 7, 2, 4, 3, 1, 8];

        let offsets: Vec<usize> = sizes.iter().map(|&s| tree.allocate(s).unwrap()).collect();
        tree.check_invariants();

        for &ofs in offsets.iter().rev().step_by(2) {
            tree.free(ofs).unwrap();
        }
        for &ofs in offsets.iter().rev().skip(1).step_by(2) {
            tree.free(ofs).unwrap();
        }

        assert_eq!(tree.largest_free(), 32);
        tree.check_invariants();
    }

    #[test]
    fn double_free_is_a_no_op() {
        let mut tree = BuddyTree::new(8).unwrap();
        let a = tree.allocate(2).unwrap();
        let b = tree.allocate(2).unwrap();

        tree.free(a).unwrap();
        tree.free(a).unwrap();

        assert_eq!(tree.size_of(b), Ok(2));
        assert_eq!(tree.dump().as_deref(), Some("__**____"));

        // Never allocated.
        tree.free(7).unwrap();
        assert_eq!(tree.dump().as_deref(), Some("__**____"));
        tree.check_invariants();
    }

    #[test]
    fn out_of_range_offsets_are_rejected() {
        let mut tree = BuddyTree::new(8).unwrap();
        tree.allocate(8).unwrap();

        let err = OffsetError::OutOfRange {
            offset: 8,
            capacity: 8,
        };
        assert_eq!(tree.free(8), Err(err));
        assert_eq!(tree.size_of(8), Err(err));
        assert_eq!(tree.largest_free(), 0);
    }

    #[test]
    fn dump_is_capped() {
        assert!(BuddyTree::new(MAX_DUMP_UNITS).unwrap().dump().is_some());
        assert!(BuddyTree::new(MAX_DUMP_UNITS * 2).unwrap().dump().is_none());
    }

    #[test]
    fn debug_shows_capacity_and_largest_free() {
        let mut tree = BuddyTree::new(4).unwrap();
        tree.allocate(1).unwrap();

        assert_eq!(
            std::format!("{tree:?}"),
            "BuddyTree { capacity: 4, largest_free: 2 }"
        );
    }
}
