//! Page-table entry codec.
//!
//! An Sv39 page-table entry is one 64-bit word:
//!
//! - Bits 53:10 — physical page number (`ppn`), also viewable as the
//!   per-level slices `ppn2` @53:28, `ppn1` @27:19, `ppn0` @18:10
//! - Bit 7 — dirty, bit 6 — accessed, bit 5 — global, bit 4 — user
//! - Bit 3 — exec, bit 2 — write, bit 1 — read, bit 0 — valid
//!
//! A valid entry with read, write, and exec all clear is a pointer to the
//! next table level; a valid entry with any of them set is a leaf. The
//! accessors here are plain shifts and masks over the word, so the in-memory
//! representation is exactly the architectural one.

use core::fmt;

use crate::address::PhysAddr;
use crate::sv39;
use crate::walker::{AccessType, PrivilegeMode};

/// A single Sv39 page-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(u64);

impl Pte {
    /// Valid bit (bit 0).
    const VALID: u64 = 1 << 0;

    /// Read permission bit (bit 1).
    const READ: u64 = 1 << 1;

    /// Write permission bit (bit 2).
    const WRITE: u64 = 1 << 2;

    /// Execute permission bit (bit 3).
    const EXEC: u64 = 1 << 3;

    /// User-accessible bit (bit 4).
    const USER: u64 = 1 << 4;

    /// Global mapping bit (bit 5).
    const GLOBAL: u64 = 1 << 5;

    /// Accessed bit (bit 6).
    const ACCESSED: u64 = 1 << 6;

    /// Dirty bit (bit 7).
    const DIRTY: u64 = 1 << 7;

    /// Shift of the physical page number field (bits 53:10).
    const PPN_SHIFT: u32 = 10;

    /// Mask for the 44-bit physical page number.
    const PPN_MASK: u64 = (1 << 44) - 1;

    /// Creates an entry from a raw 64-bit word.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit word.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Creates a valid pointer entry referencing the table at `ppn`.
    pub const fn pointer(ppn: u64) -> Self {
        Self(((ppn & Self::PPN_MASK) << Self::PPN_SHIFT) | Self::VALID)
    }

    /// Creates a valid leaf entry mapping the page at `ppn` with the given
    /// permissions.
    pub const fn leaf(ppn: u64, perms: Permissions) -> Self {
        let mut raw = ((ppn & Self::PPN_MASK) << Self::PPN_SHIFT) | Self::VALID;
        if perms.read {
            raw |= Self::READ;
        }
        if perms.write {
            raw |= Self::WRITE;
        }
        if perms.exec {
            raw |= Self::EXEC;
        }
        if perms.user {
            raw |= Self::USER;
        }
        Self(raw)
    }

    /// Returns whether the valid bit is set.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    /// Sets or clears the valid bit.
    pub fn set_valid(&mut self, valid: bool) {
        self.set_bit(Self::VALID, valid);
    }

    /// Returns whether the read permission bit is set.
    #[inline]
    pub const fn can_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    /// Sets or clears the read permission bit.
    pub fn set_read(&mut self, read: bool) {
        self.set_bit(Self::READ, read);
    }

    /// Returns whether the write permission bit is set.
    #[inline]
    pub const fn can_write(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    /// Sets or clears the write permission bit.
    pub fn set_write(&mut self, write: bool) {
        self.set_bit(Self::WRITE, write);
    }

    /// Returns whether the execute permission bit is set.
    #[inline]
    pub const fn can_exec(self) -> bool {
        self.0 & Self::EXEC != 0
    }

    /// Sets or clears the execute permission bit.
    pub fn set_exec(&mut self, exec: bool) {
        self.set_bit(Self::EXEC, exec);
    }

    /// Returns whether the user-accessible bit is set.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 & Self::USER != 0
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        self.set_bit(Self::USER, user);
    }

    /// Returns whether the global mapping bit is set.
    #[inline]
    pub const fn is_global(self) -> bool {
        self.0 & Self::GLOBAL != 0
    }

    /// Sets or clears the global mapping bit.
    pub fn set_global(&mut self, global: bool) {
        self.set_bit(Self::GLOBAL, global);
    }

    /// Returns whether the accessed bit is set.
    #[inline]
    pub const fn is_accessed(self) -> bool {
        self.0 & Self::ACCESSED != 0
    }

    /// Sets or clears the accessed bit.
    pub fn set_accessed(&mut self, accessed: bool) {
        self.set_bit(Self::ACCESSED, accessed);
    }

    /// Returns whether the dirty bit is set.
    #[inline]
    pub const fn is_dirty(self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    /// Sets or clears the dirty bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.set_bit(Self::DIRTY, dirty);
    }

    /// Returns the 44-bit physical page number (bits 53:10).
    #[inline]
    pub const fn ppn(self) -> u64 {
        (self.0 >> Self::PPN_SHIFT) & Self::PPN_MASK
    }

    /// Sets the physical page number, preserving the flag bits.
    pub fn set_ppn(&mut self, ppn: u64) {
        self.0 &= !(Self::PPN_MASK << Self::PPN_SHIFT);
        self.0 |= (ppn & Self::PPN_MASK) << Self::PPN_SHIFT;
    }

    /// Returns the level-2 slice of the physical page number (bits 53:28).
    #[inline]
    pub const fn ppn2(self) -> u64 {
        (self.0 >> 28) & ((1 << 26) - 1)
    }

    /// Returns the level-1 slice of the physical page number (bits 27:19).
    #[inline]
    pub const fn ppn1(self) -> u64 {
        (self.0 >> 19) & sv39::LEVEL_MASK
    }

    /// Returns the level-0 slice of the physical page number (bits 18:10).
    #[inline]
    pub const fn ppn0(self) -> u64 {
        (self.0 >> 10) & sv39::LEVEL_MASK
    }

    /// Returns whether this entry is a leaf (any of read/write/exec set).
    #[inline]
    pub const fn is_leaf(self) -> bool {
        self.0 & (Self::READ | Self::WRITE | Self::EXEC) != 0
    }

    /// Returns whether this entry is a pointer to the next table level.
    #[inline]
    pub const fn is_pointer(self) -> bool {
        !self.is_leaf()
    }

    /// Returns the physical address of the page or table this entry
    /// references.
    #[inline]
    pub const fn address(self) -> PhysAddr {
        PhysAddr::new(self.ppn() << sv39::PAGE_SHIFT)
    }

    /// Returns the permissions this entry grants.
    #[inline]
    pub const fn permissions(self) -> Permissions {
        Permissions {
            read: self.can_read(),
            write: self.can_write(),
            exec: self.can_exec(),
            user: self.is_user(),
        }
    }

    fn set_bit(&mut self, bit: u64, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pte({:#x})", self.0)
    }
}

/// The permissions a leaf entry grants, extracted from its flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub user: bool,
}

impl Permissions {
    /// Read/write/exec, supervisor-only.
    pub const fn rwx() -> Self {
        Self {
            read: true,
            write: true,
            exec: true,
            user: false,
        }
    }

    /// Read-only, supervisor-only.
    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            exec: false,
            user: false,
        }
    }

    /// Returns a copy with the user bit set.
    pub const fn user(mut self) -> Self {
        self.user = true;
        self
    }

    /// Returns whether these permissions allow the given access from the
    /// given privilege mode.
    ///
    /// User mode requires the user bit; supervisor mode is denied access to
    /// user pages (`sstatus.SUM`/`MXR` modifiers are applied by the
    /// privileged-register owner before calling in).
    pub fn allows(self, access: AccessType, privilege: PrivilegeMode) -> bool {
        let permitted = match access {
            AccessType::Read => self.read,
            AccessType::Write => self.write,
            AccessType::Fetch => self.exec,
        };
        let privileged = match privilege {
            PrivilegeMode::User => self.user,
            PrivilegeMode::Supervisor => !self.user,
        };
        permitted && privileged
    }
}

impl From<Pte> for Permissions {
    fn from(pte: Pte) -> Self {
        pte.permissions()
    }
}
