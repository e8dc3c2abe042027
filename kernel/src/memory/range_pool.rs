//! Address Range Pool - page-granular first-fit range allocator
//!
//! Manages a linear space (physical pages or a process's virtual window) as a
//! list of used/free ranges sorted by base address.
//!
//! - First-fit allocation in ascending base order, splitting oversized ranges
//! - Eager coalescing of free neighbours after every free
//! - Ranges live in an index-addressed arena, list links are slot indices
//!
//! The pool is not internally locked. The kernel-wide physical pool sits
//! behind a `GlobalLock`, process pools behind the process table lock.

use super::address::PageAddress;
use super::PAGE_SIZE;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Consumer-defined allocation flags carried by used ranges
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RangeFlags: u32 {
        const CACHE_DISABLE = 1 << 0;
        const WRITE_THROUGH = 1 << 1;
        const USER          = 1 << 2;
        const STACK         = 1 << 3;
        const TLS           = 1 << 4;
        const IMAGE         = 1 << 5;
        const HEAP          = 1 << 6;
        const PAGE_TABLE    = 1 << 7;
    }
}

/// One contiguous run of pages with uniform allocation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange<A> {
    pub base: A,
    pub page_count: usize,
    pub used: bool,
    pub flags: RangeFlags,
}

impl<A: PageAddress> AddressRange<A> {
    /// First address past the range
    pub fn end(&self) -> usize {
        self.base.value() + self.page_count * PAGE_SIZE
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base.value() && addr < self.end()
    }
}

/// Recoverable pool failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// No free range large enough
    OutOfSpace { requested: usize },
    /// No range starts at this base
    NotFound { base: usize },
    /// The range at this base is already free
    DoubleFree { base: usize },
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSpace { requested } => {
                write!(f, "no free range of {} pages", requested)
            }
            Self::NotFound { base } => write!(f, "no range at {:#x}", base),
            Self::DoubleFree { base } => write!(f, "range at {:#x} already free", base),
        }
    }
}

#[derive(Debug, Clone)]
struct RangeNode<A> {
    range: AddressRange<A>,
    next: Option<usize>,
}

/// Sorted, coalescing free-list allocator over a page-granular space
#[derive(Debug, Clone)]
pub struct AddressRangePool<A> {
    /// Arena of range nodes, `None` marks a recycled slot
    nodes: Vec<Option<RangeNode<A>>>,
    /// Vacant arena slots, reused before growing `nodes`
    vacant: Vec<usize>,
    /// Lowest range
    head: Option<usize>,
    /// Pages handed to `initialize`
    total_pages: usize,
}

impl<A: PageAddress> AddressRangePool<A> {
    /// Create an empty pool; `initialize` must run before first use
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            head: None,
            total_pages: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.head.is_some()
    }

    /// Insert a single free range spanning `[start, end)`
    ///
    /// # Panics
    /// If the bounds are unaligned or empty, or if the pool already holds
    /// ranges (`clear` first).
    pub fn initialize(&mut self, start: A, end: A) {
        crate::kassert!(
            !self.is_initialized(),
            "range pool re-initialized without clear()"
        );
        crate::kassert!(
            start.is_page_aligned() && end.is_page_aligned(),
            "range pool bounds not page aligned"
        );
        crate::kassert!(end > start, "range pool bounds empty or inverted");

        let page_count = (end.value() - start.value()) / PAGE_SIZE;
        let idx = self.insert_node(RangeNode {
            range: AddressRange {
                base: start,
                page_count,
                used: false,
                flags: RangeFlags::empty(),
            },
            next: None,
        });
        self.head = Some(idx);
        self.total_pages = page_count;

        log::debug!(
            "range pool initialized: {:?}..{:?} ({} pages)",
            start,
            end,
            page_count
        );
    }

    /// Deep-copy `other`'s ranges into this (empty) pool
    ///
    /// The copy is independent: later changes to either pool do not show in
    /// the other.
    pub fn initialize_from(&mut self, other: &Self) {
        crate::kassert!(
            !self.is_initialized(),
            "range pool re-initialized without clear()"
        );

        let mut previous: Option<usize> = None;
        for range in other.iter() {
            let idx = self.insert_node(RangeNode { range, next: None });
            match previous {
                Some(prev) => self.node_mut(prev).next = Some(idx),
                None => self.head = Some(idx),
            }
            previous = Some(idx);
        }
        self.total_pages = other.total_pages;
    }

    /// Allocate `page_count` pages, first fit in ascending base order
    ///
    /// A request for 0 pages is served as 1 page. Returns the base of the
    /// new used range.
    pub fn allocate(&mut self, page_count: usize, flags: RangeFlags) -> Result<A, RangeError> {
        let pages = page_count.max(1);

        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            let next = node.next;

            if !node.range.used && node.range.page_count >= pages {
                let base = node.range.base;
                let remainder = node.range.page_count - pages;

                if remainder > 0 {
                    let split_base = match base.checked_add_pages(pages) {
                        Some(addr) => addr,
                        None => panic!("[KERNEL CRITICAL] range at {:?} overflows", base),
                    };
                    let split = self.insert_node(RangeNode {
                        range: AddressRange {
                            base: split_base,
                            page_count: remainder,
                            used: false,
                            flags: RangeFlags::empty(),
                        },
                        next,
                    });
                    let node = self.node_mut(idx);
                    node.range.page_count = pages;
                    node.next = Some(split);
                }

                let node = self.node_mut(idx);
                node.range.used = true;
                node.range.flags = flags;
                return Ok(base);
            }

            cursor = next;
        }

        log::warn!(
            "range pool: no free range of {} pages (free pages: {})",
            pages,
            self.free_pages()
        );
        Err(RangeError::OutOfSpace { requested: pages })
    }

    /// Free the range starting at `base`
    ///
    /// Returns the page count of the freed range itself, before it is merged
    /// into any free neighbour.
    pub fn free(&mut self, base: A) -> Result<usize, RangeError> {
        let idx = match self.find(base) {
            Some(idx) => idx,
            None => {
                log::warn!("range pool: free of unknown base {:?}", base);
                return Err(RangeError::NotFound { base: base.value() });
            }
        };

        let node = self.node_mut(idx);
        if !node.range.used {
            log::warn!("range pool: double free of {:?}", base);
            return Err(RangeError::DoubleFree { base: base.value() });
        }

        node.range.used = false;
        node.range.flags = RangeFlags::empty();
        let freed = node.range.page_count;

        self.merge();
        Ok(freed)
    }

    /// Release every range; the pool must be initialized again before reuse
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.vacant.clear();
        self.head = None;
        self.total_pages = 0;
    }

    /// Log the ranges in ascending order and return them
    pub fn dump(&self, only_free: bool) -> Vec<AddressRange<A>> {
        let ranges: Vec<_> = self
            .iter()
            .filter(|range| !only_free || !range.used)
            .collect();

        log::debug!(
            "range pool: {} ranges, {} of {} pages free",
            self.range_count(),
            self.free_pages(),
            self.total_pages
        );
        for range in &ranges {
            log::debug!(
                "  {:?} {:>6} pages {} {:?}",
                range.base,
                range.page_count,
                if range.used { "used" } else { "free" },
                range.flags
            );
        }
        ranges
    }

    /// Ranges in ascending base order
    pub fn iter(&self) -> RangeIter<'_, A> {
        RangeIter {
            pool: self,
            cursor: self.head,
        }
    }

    pub fn range_count(&self) -> usize {
        self.iter().count()
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn free_pages(&self) -> usize {
        self.iter()
            .filter(|range| !range.used)
            .map(|range| range.page_count)
            .sum()
    }

    pub fn used_pages(&self) -> usize {
        self.total_pages - self.free_pages()
    }

    /// Range covering `addr`, if any
    pub fn range_containing(&self, addr: A) -> Option<AddressRange<A>> {
        self.iter().find(|range| range.contains(addr.value()))
    }

    /// Single forward pass joining each free range with free successors
    fn merge(&mut self) {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            let next = node.next;

            if let Some(next_idx) = next {
                let current = node.range;
                let following = self.node(next_idx).range;
                if !current.used && !following.used && current.end() == following.base.value() {
                    let after = self.node(next_idx).next;
                    let node = self.node_mut(idx);
                    node.range.page_count += following.page_count;
                    node.next = after;
                    self.release_node(next_idx);
                    // stay on `idx`, its new successor may merge too
                    continue;
                }
            }

            cursor = next;
        }
    }

    fn find(&self, base: A) -> Option<usize> {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            if node.range.base == base {
                return Some(idx);
            }
            if node.range.base > base {
                // sorted: nothing further can match
                return None;
            }
            cursor = node.next;
        }
        None
    }

    fn insert_node(&mut self, node: RangeNode<A>) -> usize {
        match self.vacant.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release_node(&mut self, idx: usize) {
        self.nodes[idx] = None;
        self.vacant.push(idx);
    }

    fn node(&self, idx: usize) -> &RangeNode<A> {
        match &self.nodes[idx] {
            Some(node) => node,
            None => panic!("[KERNEL CRITICAL] range list links vacant slot {}", idx),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut RangeNode<A> {
        match &mut self.nodes[idx] {
            Some(node) => node,
            None => panic!("[KERNEL CRITICAL] range list links vacant slot {}", idx),
        }
    }
}

impl<A: PageAddress> Default for AddressRangePool<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending iterator over a pool's ranges (by value)
pub struct RangeIter<'a, A> {
    pool: &'a AddressRangePool<A>,
    cursor: Option<usize>,
}

impl<'a, A: PageAddress> Iterator for RangeIter<'a, A> {
    type Item = AddressRange<A>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.pool.node(idx);
        self.cursor = node.next;
        Some(node.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PhysicalAddress;
    use alloc::vec;

    fn page(n: usize) -> PhysicalAddress {
        PhysicalAddress::new(n * PAGE_SIZE)
    }

    fn pool(pages: usize) -> AddressRangePool<PhysicalAddress> {
        let mut pool = AddressRangePool::new();
        pool.initialize(page(0), page(pages));
        pool
    }

    /// (first page, page count, used) per range
    fn layout(pool: &AddressRangePool<PhysicalAddress>) -> Vec<(usize, usize, bool)> {
        pool.iter()
            .map(|r| (r.base.value() / PAGE_SIZE, r.page_count, r.used))
            .collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut pool = pool(100);

        assert_eq!(pool.allocate(10, RangeFlags::empty()), Ok(page(0)));
        assert_eq!(layout(&pool), vec![(0, 10, true), (10, 90, false)]);

        assert_eq!(pool.allocate(20, RangeFlags::empty()), Ok(page(10)));
        assert_eq!(layout(&pool), vec![(0, 10, true), (10, 20, true), (30, 70, false)]);

        assert_eq!(pool.free(page(0)), Ok(10));
        assert_eq!(layout(&pool), vec![(0, 10, false), (10, 20, true), (30, 70, false)]);

        assert_eq!(pool.free(page(10)), Ok(20));
        assert_eq!(layout(&pool), vec![(0, 100, false)]);
    }

    #[test]
    fn test_first_fit_takes_lowest_fitting_range() {
        // free ranges of 3, 5 and 2 pages separated by used single pages
        let mut pool = pool(12);
        let a = pool.allocate(3, RangeFlags::empty()).unwrap();
        pool.allocate(1, RangeFlags::empty()).unwrap();
        let c = pool.allocate(5, RangeFlags::empty()).unwrap();
        pool.allocate(1, RangeFlags::empty()).unwrap();
        let e = pool.allocate(2, RangeFlags::empty()).unwrap();
        pool.free(a).unwrap();
        pool.free(c).unwrap();
        pool.free(e).unwrap();
        assert_eq!(
            layout(&pool),
            vec![(0, 3, false), (3, 1, true), (4, 5, false), (9, 1, true), (10, 2, false)]
        );

        assert_eq!(pool.allocate(2, RangeFlags::HEAP), Ok(page(0)));
        assert_eq!(
            layout(&pool),
            vec![
                (0, 2, true),
                (2, 1, false),
                (3, 1, true),
                (4, 5, false),
                (9, 1, true),
                (10, 2, false)
            ]
        );
    }

    #[test]
    fn test_exact_match_does_not_split() {
        let mut pool = pool(8);
        let a = pool.allocate(4, RangeFlags::empty()).unwrap();
        pool.allocate(4, RangeFlags::empty()).unwrap();
        pool.free(a).unwrap();
        let count = pool.range_count();

        assert_eq!(pool.allocate(4, RangeFlags::STACK), Ok(a));
        assert_eq!(pool.range_count(), count);
        assert_eq!(pool.iter().next().unwrap().flags, RangeFlags::STACK);
    }

    #[test]
    fn test_zero_pages_is_one_page() {
        let mut pool = pool(4);
        let a = pool.allocate(0, RangeFlags::empty()).unwrap();
        assert_eq!(pool.free(a), Ok(1));
    }

    #[test]
    fn test_out_of_space_leaves_pool_untouched() {
        let mut pool = pool(4);
        pool.allocate(3, RangeFlags::empty()).unwrap();
        let before = layout(&pool);

        assert_eq!(
            pool.allocate(2, RangeFlags::empty()),
            Err(RangeError::OutOfSpace { requested: 2 })
        );
        assert_eq!(layout(&pool), before);
    }

    #[test]
    fn test_double_free_is_reported_and_harmless() {
        let mut pool = pool(10);
        let a = pool.allocate(2, RangeFlags::empty()).unwrap();
        pool.allocate(2, RangeFlags::empty()).unwrap();

        assert_eq!(pool.free(a), Ok(2));
        let after_first = layout(&pool);
        assert_eq!(
            pool.free(a),
            Err(RangeError::DoubleFree { base: a.value() })
        );
        assert_eq!(layout(&pool), after_first);
    }

    #[test]
    fn test_free_unknown_base() {
        let mut pool = pool(10);
        pool.allocate(4, RangeFlags::empty()).unwrap();
        // inside a range but not its base
        assert_eq!(
            pool.free(page(1)),
            Err(RangeError::NotFound { base: page(1).value() })
        );
        assert_eq!(
            pool.free(page(50)),
            Err(RangeError::NotFound { base: page(50).value() })
        );
    }

    #[test]
    fn test_free_merges_both_neighbours() {
        let mut pool = pool(9);
        let a = pool.allocate(3, RangeFlags::empty()).unwrap();
        let b = pool.allocate(3, RangeFlags::empty()).unwrap();
        let c = pool.allocate(3, RangeFlags::empty()).unwrap();
        pool.free(a).unwrap();
        pool.free(c).unwrap();
        assert_eq!(layout(&pool), vec![(0, 3, false), (3, 3, true), (6, 3, false)]);

        assert_eq!(pool.free(b), Ok(3));
        assert_eq!(layout(&pool), vec![(0, 9, false)]);
        assert_eq!(pool.free_pages(), 9);
    }

    #[test]
    fn test_initialize_from_is_independent() {
        let mut source = pool(16);
        let a = source.allocate(4, RangeFlags::IMAGE).unwrap();

        let mut copy = AddressRangePool::new();
        copy.initialize_from(&source);
        assert_eq!(layout(&copy), layout(&source));
        assert_eq!(copy.total_pages(), 16);

        copy.free(a).unwrap();
        copy.allocate(8, RangeFlags::empty()).unwrap();
        assert_eq!(layout(&source), vec![(0, 4, true), (4, 12, false)]);
        assert_eq!(layout(&copy), vec![(0, 8, true), (8, 8, false)]);
    }

    #[test]
    fn test_clear_then_reinitialize() {
        let mut pool = pool(8);
        pool.allocate(2, RangeFlags::empty()).unwrap();
        pool.clear();
        assert!(!pool.is_initialized());
        assert_eq!(pool.range_count(), 0);
        assert_eq!(pool.total_pages(), 0);

        pool.initialize(page(100), page(104));
        assert_eq!(layout(&pool), vec![(100, 4, false)]);
    }

    #[test]
    fn test_dump_only_free() {
        let mut pool = pool(8);
        pool.allocate(2, RangeFlags::empty()).unwrap();
        assert_eq!(pool.dump(false).len(), 2);
        let free = pool.dump(true);
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].base, page(2));
    }

    #[test]
    fn test_range_containing() {
        let mut pool = pool(8);
        pool.allocate(2, RangeFlags::TLS).unwrap();
        let range = pool.range_containing(PhysicalAddress::new(PAGE_SIZE + 12)).unwrap();
        assert_eq!(range.base, page(0));
        assert!(range.used);
        assert!(pool.range_containing(page(8)).is_none());
    }

    #[test]
    fn test_arena_slots_are_recycled() {
        let mut pool = pool(64);
        for _ in 0..32 {
            let a = pool.allocate(3, RangeFlags::empty()).unwrap();
            pool.free(a).unwrap();
        }
        assert!(pool.nodes.len() <= 2);
    }

    #[test]
    #[should_panic(expected = "not page aligned")]
    fn test_unaligned_initialize_panics() {
        let mut pool = AddressRangePool::new();
        pool.initialize(PhysicalAddress::new(0x1001), page(4));
    }

    #[test]
    #[should_panic(expected = "empty or inverted")]
    fn test_inverted_initialize_panics() {
        let mut pool = AddressRangePool::new();
        pool.initialize(page(4), page(4));
    }

    #[test]
    #[should_panic(expected = "without clear")]
    fn test_double_initialize_panics() {
        let mut pool = pool(4);
        pool.initialize(page(8), page(12));
    }
}
