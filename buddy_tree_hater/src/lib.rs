use alloc_hater::Subject;
use buddy_tree::{AllocError, AllocInitError, BuddyTree, OffsetError};

pub struct BuddyTreeSubject(BuddyTree);

impl BuddyTreeSubject {
    pub fn new(capacity: usize) -> Result<Self, AllocInitError> {
        let t = BuddyTree::new(capacity)?;
        Ok(BuddyTreeSubject(t))
    }
}

impl Subject for BuddyTreeSubject {
    type AllocError = AllocError;
    type FreeError = OffsetError;

    fn capacity(&self) -> usize {
        self.0.capacity()
    }

    fn allocate(&mut self, size: usize) -> Result<usize, Self::AllocError> {
        self.0.allocate(size)
    }

    fn free(&mut self, offset: usize) -> Result<(), Self::FreeError> {
        self.0.free(offset)
    }

    fn block_size(&self, offset: usize) -> Option<usize> {
        self.0.size_of(offset).ok()
    }
}
