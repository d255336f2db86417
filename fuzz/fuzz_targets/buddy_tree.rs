#![no_main]
use alloc_hater::AllocatorOp;
use arbitrary::{Arbitrary, Unstructured};
use buddy_tree_hater::BuddyTreeSubject;
use libfuzzer_sys::fuzz_target;

const MAX_CAPACITY_BITS: u8 = 16;

#[derive(Clone, Debug)]
struct Args {
    capacity: usize,
    ops: Vec<AllocatorOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let capacity = 1 << (u8::arbitrary(un)? % (MAX_CAPACITY_BITS + 1));
        let ops = Vec::arbitrary(un)?;

        Ok(Args { capacity, ops })
    }
}

fuzz_target!(|args: Args| {
    let Args { capacity, ops } = args;

    let tree = match BuddyTreeSubject::new(capacity) {
        Ok(t) => t,
        Err(_) => return,
    };

    let mut eval = alloc_hater::Evaluator::new(tree);
    eval.evaluate(ops).unwrap();
});
