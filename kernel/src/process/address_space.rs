//! Per-process address space
//!
//! The root page directory and every other physical allocation charged to
//! the process, plus the process's virtual-range tracker. Mapping itself is
//! done by architecture code; this only keeps the books so teardown can
//! return everything to the physical pool.

use crate::memory::{PhysicalAddress, PhysicalPool, RangeFlags, VirtualAddress, VirtualPool};
use crate::scheduler::core::error::TaskingResult;
use alloc::vec::Vec;

pub struct AddressSpace {
    /// Root page directory
    directory: PhysicalAddress,
    /// Physical allocations other than the directory (page tables, image)
    backing: Vec<PhysicalAddress>,
    /// User virtual ranges in use
    virtual_ranges: VirtualPool,
}

impl AddressSpace {
    /// Allocate a directory and track `[user_start, user_end)`
    pub fn create(
        physical: &mut PhysicalPool,
        user_start: VirtualAddress,
        user_end: VirtualAddress,
    ) -> TaskingResult<Self> {
        let directory = physical.allocate(1, RangeFlags::PAGE_TABLE)?;
        let mut virtual_ranges = VirtualPool::new();
        virtual_ranges.initialize(user_start, user_end);
        Ok(Self {
            directory,
            backing: Vec::new(),
            virtual_ranges,
        })
    }

    /// Like `create`, with the virtual ranges copied from `parent`
    pub fn fork(physical: &mut PhysicalPool, parent: &AddressSpace) -> TaskingResult<Self> {
        let directory = physical.allocate(1, RangeFlags::PAGE_TABLE)?;
        let mut virtual_ranges = VirtualPool::new();
        virtual_ranges.initialize_from(&parent.virtual_ranges);
        Ok(Self {
            directory,
            backing: Vec::new(),
            virtual_ranges,
        })
    }

    pub fn directory(&self) -> PhysicalAddress {
        self.directory
    }

    pub fn virtual_ranges(&self) -> &VirtualPool {
        &self.virtual_ranges
    }

    pub fn virtual_ranges_mut(&mut self) -> &mut VirtualPool {
        &mut self.virtual_ranges
    }

    /// Allocate physical pages and charge them to this address space
    pub fn charge(
        &mut self,
        physical: &mut PhysicalPool,
        pages: usize,
        flags: RangeFlags,
    ) -> TaskingResult<PhysicalAddress> {
        let base = physical.allocate(pages, flags)?;
        self.backing.push(base);
        Ok(base)
    }

    /// Return the directory and all charged pages; returns the page count
    pub fn release(mut self, physical: &mut PhysicalPool) -> usize {
        let mut pages = 0;
        for base in self.backing.drain(..).chain(core::iter::once(self.directory)) {
            match physical.free(base) {
                Ok(count) => pages += count,
                Err(err) => log::error!("address space: releasing {:?}: {}", base, err),
            }
        }
        self.virtual_ranges.clear();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    fn physical(pages: usize) -> PhysicalPool {
        let mut pool = PhysicalPool::new();
        pool.initialize(PhysicalAddress::new(0), PhysicalAddress::new(pages * PAGE_SIZE));
        pool
    }

    fn window() -> (VirtualAddress, VirtualAddress) {
        (VirtualAddress::new(0x40_0000), VirtualAddress::new(0x80_0000))
    }

    #[test]
    fn test_release_returns_everything() {
        let mut phys = physical(16);
        let (start, end) = window();
        let mut space = AddressSpace::create(&mut phys, start, end).unwrap();
        space.charge(&mut phys, 3, RangeFlags::IMAGE).unwrap();
        assert_eq!(phys.used_pages(), 4);

        assert_eq!(space.release(&mut phys), 4);
        assert_eq!(phys.used_pages(), 0);
        assert_eq!(phys.range_count(), 1);
    }

    #[test]
    fn test_fork_copies_virtual_ranges() {
        let mut phys = physical(16);
        let (start, end) = window();
        let mut parent = AddressSpace::create(&mut phys, start, end).unwrap();
        let image = parent
            .virtual_ranges_mut()
            .allocate(8, RangeFlags::IMAGE)
            .unwrap();

        let mut child = AddressSpace::fork(&mut phys, &parent).unwrap();
        assert_ne!(child.directory(), parent.directory());
        assert_eq!(child.virtual_ranges().used_pages(), 8);

        child.virtual_ranges_mut().free(image).unwrap();
        assert_eq!(parent.virtual_ranges().used_pages(), 8);
    }

    #[test]
    fn test_create_fails_when_physical_exhausted() {
        let mut phys = physical(1);
        let (start, end) = window();
        let _first = AddressSpace::create(&mut phys, start, end).unwrap();
        assert!(AddressSpace::create(&mut phys, start, end).is_err());
    }
}
