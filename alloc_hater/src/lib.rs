//! A small library for ~~hating on~~ evaluating the correctness of offset
//! allocators.
//!
//! An allocator under test hands out offsets into an arena it does not own.
//! The [`Evaluator`] keeps a shadow copy of that arena, paints every live block
//! with the id of the operation that allocated it, and verifies the paint
//! before the block is freed. Overlapping or out-of-bounds blocks show up as
//! a [`Failed`] evaluation.

use std::fmt::Debug;

/// Upper bound on the arena an [`Evaluator`] will shadow.
pub const MAX_SHADOW_UNITS: usize = 1 << 20;

/// An allocation size which implements `Arbitrary`.
///
/// Sizes are spread evenly across powers of two rather than across the whole
/// `usize` range, so that most of them are small enough to succeed.
#[derive(Copy, Clone, Debug)]
pub struct ArbSize(pub usize);

impl arbitrary::Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        // Select a random bit index and shift to obtain a bound.
        let shift = u8::arbitrary(u)? % (usize::BITS - 1) as u8;
        let bound: usize = 1 << shift;

        Ok(ArbSize(usize::arbitrary(u)? % bound))
    }
}

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
}

#[derive(Clone, Debug)]
pub enum AllocatorOp {
    /// Allocate a block of the given size.
    Alloc(usize),
    /// Free an outstanding block.
    ///
    /// Given `n` outstanding blocks, the block to free is at index
    /// `index % n`.
    Dealloc(usize),
}

impl arbitrary::Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(ArbSize::arbitrary(u)?.0),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
        };

        Ok(op)
    }
}

/// An allocator that hands out offsets into a fixed arena.
pub trait Subject {
    type AllocError: Debug;
    type FreeError: Debug;

    /// Returns the number of units in the arena.
    fn capacity(&self) -> usize;

    /// Allocates a block of at least `size` units, returning its offset.
    fn allocate(&mut self, size: usize) -> Result<usize, Self::AllocError>;

    /// Frees the block at `offset`.
    fn free(&mut self, offset: usize) -> Result<(), Self::FreeError>;

    /// Returns the actual size of the live block at `offset`.
    ///
    /// This may exceed the size that was requested for it.
    fn block_size(&self, offset: usize) -> Option<usize>;
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of the arena.
#[derive(Copy, Clone, Debug)]
pub struct Block {
    // The offset of the first unit.
    offset: usize,
    // The number of units actually granted.
    len: usize,
    // The unique ID of the operation that allocated this block.
    id: u64,
}

impl Block {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A shadow copy of the arena, recording which operation owns each unit.
pub struct Shadow {
    units: Vec<Option<u64>>,
}

impl Shadow {
    pub fn new(capacity: usize) -> Shadow {
        Shadow {
            units: vec![None; capacity],
        }
    }

    /// "Paints" the units of `block` with its id.
    ///
    /// Returns `false` without painting if the block leaves the arena or
    /// overlaps a live block.
    pub fn paint(&mut self, block: &Block) -> bool {
        let Some(units) = self.units.get_mut(block.offset..block.offset + block.len) else {
            return false;
        };

        if units.iter().any(Option::is_some) {
            return false;
        }

        units.fill(Some(block.id));
        true
    }

    /// Verifies that the units of `block` still carry its paint.
    pub fn verify(&self, block: &Block) -> bool {
        self.units[block.offset..block.offset + block.len]
            .iter()
            .all(|&owner| owner == Some(block.id))
    }

    /// Clears the paint from the units of `block`.
    pub fn clear(&mut self, block: &Block) {
        self.units[block.offset..block.offset + block.len].fill(None);
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: AllocatorOp,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let capacity = self.subject.capacity();
        assert!(
            capacity <= MAX_SHADOW_UNITS,
            "arena of {capacity} units is too large to shadow"
        );

        let mut completed = Vec::new();
        let mut blocks = Blocks::new();
        let mut shadow = Shadow::new(capacity);

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();

            let ok = match op {
                AllocatorOp::Alloc(size) => match self.subject.allocate(size) {
                    Ok(offset) => match self.subject.block_size(offset) {
                        Some(len) if len >= size => {
                            let block = Block {
                                offset,
                                len,
                                id: op_id,
                            };

                            blocks.push(block);
                            shadow.paint(&block)
                        }
                        _ => false,
                    },
                    Err(_) => true,
                },

                AllocatorOp::Dealloc(raw_idx) => match blocks.remove_modulo(raw_idx) {
                    Some(block) => {
                        let intact = shadow.verify(&block);
                        shadow.clear(&block);
                        intact && self.subject.free(block.offset).is_ok()
                    }
                    None => true,
                },
            };

            if !ok {
                return Err(Failed {
                    completed,
                    failed_op: op,
                });
            }

            completed.push(op);
        }

        for block in blocks {
            if !shadow.verify(&block) || self.subject.free(block.offset).is_err() {
                return Err(Failed {
                    completed,
                    failed_op: AllocatorOp::Dealloc(0),
                });
            }
        }

        Ok(())
    }
}
