#![no_main]

use arbitrary::Arbitrary;
use buddy_tree::{AllocError, BuddyTree, OffsetError};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
enum TreeOp {
    Allocate(usize),
    Free(usize),
    SizeOf(usize),
}

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    capacity: usize,
    ops: Vec<TreeOp>,
}

fuzz_target!(|args: Args| {
    // Unlike `buddy_tree`, any capacity is accepted here; invalid ones must be
    // rejected cleanly.
    let mut tree = match BuddyTree::new(args.capacity % (1 << 20)) {
        Ok(t) => t,
        Err(_) => return,
    };

    let capacity = tree.capacity();
    let mut outstanding = Vec::new();

    for op in args.ops {
        match op {
            TreeOp::Allocate(size) => match tree.allocate(size) {
                Ok(offset) => {
                    assert!(offset < capacity);
                    assert_eq!(tree.size_of(offset), Ok(size.next_power_of_two()));
                    outstanding.push(offset);
                }
                Err(AllocError::ZeroSize) => assert_eq!(size, 0),
                Err(AllocError::OutOfSpace) => assert!(size
                    .checked_next_power_of_two()
                    .map_or(true, |s| s > tree.largest_free())),
            },

            // Arbitrary offsets may land inside live blocks and free them, so
            // only the error contract is checked.
            TreeOp::Free(raw) => {
                let res = tree.free(raw);
                assert_eq!(res.is_err(), raw >= capacity);
                outstanding.retain(|&ofs| tree.size_of(ofs).is_ok());
            }

            TreeOp::SizeOf(raw) => match tree.size_of(raw) {
                Ok(size) => assert!(size.is_power_of_two() && size <= capacity),
                Err(OffsetError::OutOfRange { .. }) => assert!(raw >= capacity),
                Err(OffsetError::NotAllocated) => assert!(raw < capacity),
            },
        }
    }

    for offset in outstanding {
        tree.free(offset).unwrap();
    }

    assert_eq!(tree.largest_free(), capacity);
});
