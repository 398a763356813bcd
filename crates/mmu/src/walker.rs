//! Page-table walker.
//!
//! The walker traverses the three-level tree from the root named by SATP
//! down to a leaf, applying the validity, alignment, and permission rules,
//! and produces either a resolved mapping or a typed fault. A walk performs
//! at most three port reads and one optional write (the accessed/dirty
//! update) and never suspends.

use core::fmt;

use crate::address::{PhysAddr, VirtAddr};
use crate::level::PageTableLevel;
use crate::port::MemoryPort;
use crate::pte::{Permissions, Pte};
use crate::satp::{Satp, TranslationMode};
use crate::sv39;

/// The kind of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// Data load.
    Read,
    /// Data store.
    Write,
    /// Instruction fetch.
    Fetch,
}

/// The privilege mode the access executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeMode {
    User,
    Supervisor,
}

/// The reasons a translation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A valid bit was clear, or the entry encoding was reserved.
    NotPresent,
    /// The leaf's permission bits deny the access.
    PermissionDenied,
    /// A superpage leaf's physical page number violates its alignment.
    Misaligned,
    /// The table is structurally malformed (pointer at the last level) or
    /// the translation configuration is unusable.
    AccessFault,
}

impl FaultKind {
    /// Returns whether this fault routes to an architectural page-fault
    /// trap cause, as opposed to an access-fault cause.
    pub const fn is_page_fault(self) -> bool {
        !matches!(self, Self::AccessFault)
    }
}

/// A failed translation, carrying what the trap-raising mechanism needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub vaddr: VirtAddr,
    pub access: AccessType,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} translating {} for {:?}",
            self.kind, self.vaddr, self.access
        )
    }
}

impl std::error::Error for Fault {}

/// A successful translation of one virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// The translated physical address.
    pub paddr: PhysAddr,
    /// The virtual base of the containing page.
    pub page_base: VirtAddr,
    /// log2 of the page size.
    pub log_size: u32,
    /// The permissions the resolving leaf grants.
    pub perms: Permissions,
}

impl Translation {
    /// Returns the size in bytes of the containing page.
    pub const fn page_size(&self) -> u64 {
        1 << self.log_size
    }
}

/// The outcome of a translation request.
pub type TranslationResult = Result<Translation, Fault>;

/// A resolved mapping, as produced by a completed walk.
///
/// Covers the whole page, not just the requested address; the translation
/// cache stores exactly this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// The leaf entry, after any accessed/dirty update.
    pub pte: Pte,
    /// The virtual base of the mapped page.
    pub page_base: VirtAddr,
    /// The physical base of the mapped page.
    pub paddr_base: PhysAddr,
    /// log2 of the page size.
    pub log_size: u32,
}

impl Resolved {
    /// Returns the size in bytes of the mapped page.
    pub const fn page_size(&self) -> u64 {
        1 << self.log_size
    }

    /// Projects this mapping onto one virtual address within the page.
    pub fn translation(&self, vaddr: VirtAddr) -> Translation {
        let offset = vaddr.as_u64() & (self.page_size() - 1);
        Translation {
            paddr: self.paddr_base + offset,
            page_base: self.page_base,
            log_size: self.log_size,
            perms: self.pte.permissions(),
        }
    }
}

/// Walks the page table for `vaddr` and resolves it to a mapping or a
/// typed fault.
///
/// Accessed/dirty bits are hardware-managed: the walker sets the accessed
/// bit on every access and the dirty bit on writes, storing the updated
/// entry back through the port in a single combined write.
pub fn walk<P: MemoryPort>(
    port: &mut P,
    satp: Satp,
    vaddr: VirtAddr,
    access: AccessType,
    privilege: PrivilegeMode,
) -> Result<Resolved, Fault> {
    let fault = |kind| {
        log::debug!("walk of {} for {:?} faulted: {:?}", vaddr, access, kind);
        Err(Fault {
            kind,
            vaddr,
            access,
        })
    };

    if satp.mode() != Some(TranslationMode::Sv39) {
        return fault(FaultKind::AccessFault);
    }
    if !vaddr.is_canonical() {
        return fault(FaultKind::NotPresent);
    }

    let mut table = satp.root_address();
    for level in (0..sv39::LEVELS).rev() {
        let accessor = PageTableLevel::new(level);
        let entry_address = accessor.entry_address(table, vaddr);
        let pte = Pte::from_raw(port.read_u64(entry_address));
        log::trace!("level {} entry at {}: {:?}", level, entry_address, pte);

        if !pte.is_valid() {
            return fault(FaultKind::NotPresent);
        }

        if pte.is_pointer() {
            if level == 0 {
                // Exhausted every level without finding a leaf.
                return fault(FaultKind::AccessFault);
            }
            table = pte.address();
            continue;
        }

        // Write-without-read is a reserved leaf encoding.
        if pte.can_write() && !pte.can_read() {
            return fault(FaultKind::NotPresent);
        }

        // A leaf above level 0 maps a superpage; the low bits of its ppn
        // must be clear.
        let align_mask = (1u64 << (level as u32 * sv39::LEVEL_BITS)) - 1;
        if pte.ppn() & align_mask != 0 {
            return fault(FaultKind::Misaligned);
        }

        if !pte.permissions().allows(access, privilege) {
            return fault(FaultKind::PermissionDenied);
        }

        let mut updated = pte;
        if !pte.is_accessed() {
            updated.set_accessed(true);
        }
        if access == AccessType::Write && !pte.is_dirty() {
            updated.set_dirty(true);
        }
        if updated != pte {
            PageTableLevel::write_entry(port, entry_address, updated);
        }

        let log_size = accessor.log_page_size();
        return Ok(Resolved {
            pte: updated,
            page_base: vaddr.align_down(1 << log_size),
            paddr_base: updated.address(),
            log_size,
        });
    }

    fault(FaultKind::AccessFault)
}
