//! Property tests for the address-range pool
//!
//! Random allocate/free sequences against a 0..64 page window, checking the
//! list after every step.

use exo_tasking::memory::{PageAddress, PhysicalPool, PAGE_SIZE};
use exo_tasking::{PhysicalAddress, RangeError, RangeFlags};
use proptest::prelude::*;

const PAGES: usize = 64;

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    /// Free the n-th live allocation (modulo count)
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..10).prop_map(Op::Allocate),
        any::<usize>().prop_map(Op::Free),
    ]
}

fn pool() -> PhysicalPool {
    let mut pool = PhysicalPool::new();
    pool.initialize(PhysicalAddress::new(0), PhysicalAddress::new(PAGES * PAGE_SIZE));
    pool
}

/// Ranges tile the window exactly, in address order
fn assert_coverage(pool: &PhysicalPool) {
    let mut expected = 0;
    let mut pages = 0;
    for range in pool.iter() {
        assert_eq!(range.base.value(), expected, "gap or overlap at {:#x}", expected);
        assert!(range.page_count > 0);
        expected = range.end();
        pages += range.page_count;
    }
    assert_eq!(expected, PAGES * PAGE_SIZE);
    assert_eq!(pages, PAGES);
    assert_eq!(pool.free_pages() + pool.used_pages(), PAGES);
}

fn assert_no_adjacent_free(pool: &PhysicalPool) {
    let ranges = pool.dump(false);
    for pair in ranges.windows(2) {
        assert!(
            pair[0].used || pair[1].used,
            "free neighbours at {:?} and {:?}",
            pair[0].base,
            pair[1].base
        );
    }
}

proptest! {
    #[test]
    fn pool_invariants_hold(ops in prop::collection::vec(op(), 1..64)) {
        let mut pool = pool();
        let mut live: Vec<(PhysicalAddress, usize)> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(pages) => {
                    let free_before = pool.free_pages();
                    match pool.allocate(pages, RangeFlags::empty()) {
                        Ok(base) => {
                            let granted = pages.max(1);
                            prop_assert!(base.is_page_aligned());
                            prop_assert_eq!(pool.free_pages(), free_before - granted);
                            live.push((base, granted));
                        }
                        Err(RangeError::OutOfSpace { requested }) => {
                            prop_assert_eq!(requested, pages.max(1));
                            prop_assert_eq!(pool.free_pages(), free_before);
                        }
                        Err(other) => prop_assert!(false, "unexpected {:?}", other),
                    }
                }
                Op::Free(n) if !live.is_empty() => {
                    let (base, granted) = live.swap_remove(n % live.len());
                    prop_assert_eq!(pool.free(base), Ok(granted));
                    assert_no_adjacent_free(&pool);
                }
                Op::Free(_) => {}
            }
            assert_coverage(&pool);
        }

        for (base, granted) in live.drain(..) {
            prop_assert_eq!(pool.free(base), Ok(granted));
        }
        prop_assert_eq!(pool.range_count(), 1);
        prop_assert_eq!(pool.free_pages(), PAGES);
    }

    #[test]
    fn double_free_leaves_pool_unchanged(sizes in prop::collection::vec(1usize..6, 2..8)) {
        let mut pool = pool();
        let bases: Vec<PhysicalAddress> = sizes
            .iter()
            .map(|&pages| pool.allocate(pages, RangeFlags::HEAP).unwrap())
            .collect();

        // the last range's successor is the free remainder, so it merges
        let target = bases[0];
        pool.free(target).unwrap();
        let before = pool.dump(false);

        prop_assert_eq!(
            pool.free(target),
            Err(RangeError::DoubleFree { base: target.value() })
        );
        prop_assert_eq!(pool.dump(false), before);
    }

    #[test]
    fn allocation_round_trip(pages in 1usize..PAGES) {
        let mut pool = pool();
        let base = pool.allocate(pages, RangeFlags::STACK).unwrap();
        prop_assert_eq!(base, PhysicalAddress::new(0));
        prop_assert_eq!(pool.range_containing(base).map(|r| r.page_count), Some(pages));
        prop_assert_eq!(pool.free(base), Ok(pages));
        prop_assert_eq!(pool.range_count(), 1);
        prop_assert_eq!(pool.dump(true)[0].page_count, PAGES);
    }
}
