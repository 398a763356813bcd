//! Per-level page-table accessor.
//!
//! A [`PageTableLevel`] describes one level of the radix tree: which slice
//! of the virtual address it indexes, and the page size a leaf installed at
//! that level maps. It is constructed per walk step and holds no state
//! beyond the bit range.

use crate::address::{PhysAddr, VirtAddr};
use crate::port::MemoryPort;
use crate::pte::Pte;
use crate::sv39;

/// One level of the Sv39 table hierarchy, parameterized by the
/// virtual-address bit range of the index field it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableLevel {
    high_bit: u32,
    low_bit: u32,
}

impl PageTableLevel {
    /// Creates the accessor for the given level (0 = lowest, 2 = root).
    ///
    /// # Panics
    ///
    /// Panics if `level` is out of range (0-2).
    pub const fn new(level: usize) -> Self {
        let low_bit = sv39::log_page_size(level);
        Self {
            high_bit: low_bit + sv39::LEVEL_BITS - 1,
            low_bit,
        }
    }

    /// Returns the index this level's slice of `vaddr` selects.
    #[inline]
    pub const fn index(self, vaddr: VirtAddr) -> u64 {
        let bits = self.high_bit - self.low_bit + 1;
        (vaddr.as_u64() >> self.low_bit) & ((1 << bits) - 1)
    }

    /// Returns the page size in bytes a leaf at this level maps.
    #[inline]
    pub const fn page_size(self) -> u64 {
        1 << self.low_bit
    }

    /// Returns log2 of the page size a leaf at this level maps.
    #[inline]
    pub const fn log_page_size(self) -> u32 {
        self.low_bit
    }

    /// Computes the physical address of this level's entry for `vaddr` in
    /// the table at `table_base`.
    #[inline]
    pub fn entry_address(self, table_base: PhysAddr, vaddr: VirtAddr) -> PhysAddr {
        table_base + self.index(vaddr) * sv39::PTE_SIZE
    }

    /// Reads this level's entry for `vaddr` from the table at `table_base`.
    pub fn read_entry<P: MemoryPort>(
        self,
        port: &mut P,
        table_base: PhysAddr,
        vaddr: VirtAddr,
    ) -> Pte {
        Pte::from_raw(port.read_u64(self.entry_address(table_base, vaddr)))
    }

    /// Stores an entry back at the address it was read from (used for
    /// accessed/dirty updates).
    pub fn write_entry<P: MemoryPort>(port: &mut P, entry_address: PhysAddr, pte: Pte) {
        port.write_u64(entry_address, pte.raw());
    }
}
