//! # Sv39 address translation core
//!
//! This crate models the RISC-V Sv39 virtual-to-physical translation path
//! of a cycle-level simulator. It provides:
//!
//! - Bit-exact codecs for page-table entries and the SATP register.
//! - A three-level page-table walker with typed faults.
//! - A per-hart translation cache with longest-prefix lookup, address-space
//!   scoping, and recency-based eviction.
//! - Checkpoint save/restore of cached translations.
//!
//! The simulator supplies the collaborators at the edges: a [`MemoryPort`]
//! over guest physical memory, a [`CheckpointStore`] for persistence, the
//! SATP snapshot from its privileged-register state, and a trap mechanism
//! consuming the [`Fault`] results. In-process doubles for the first two
//! ([`EmulatedMemory`], [`MemStore`]) are available to harnesses through
//! the `emulation` feature.

mod address;
mod checkpoint;
mod index;
mod level;
mod port;
mod pte;
mod satp;
mod sv39;
mod tlb;
mod walker;

pub use address::{PhysAddr, VirtAddr};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use index::{EntryHandle, TranslationIndex};
pub use level::PageTableLevel;
pub use port::MemoryPort;
pub use pte::{Permissions, Pte};
pub use satp::{Satp, TranslationMode};
pub use tlb::{DEFAULT_CAPACITY, Tlb, TlbEntry};
pub use walker::{
    AccessType, Fault, FaultKind, PrivilegeMode, Resolved, Translation, TranslationResult, walk,
};

#[cfg(any(test, feature = "emulation"))]
pub use checkpoint::MemStore;
#[cfg(any(test, feature = "emulation"))]
pub use port::EmulatedMemory;

pub use sv39::{LEVELS, PAGE_SHIFT, PAGE_SIZE};
