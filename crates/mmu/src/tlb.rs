//! Translation cache.
//!
//! A [`Tlb`] is the per-hart front end of the translation path: it probes
//! the index for a cached mapping, falls back to the page-table walker on a
//! miss, and installs the resolved mapping, evicting by recency when full.
//! Each hart owns its own instance; there is no shared translation state.

use crate::address::{PhysAddr, VirtAddr};
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::index::{EntryHandle, TranslationIndex};
use crate::port::MemoryPort;
use crate::pte::{Permissions, Pte};
use crate::satp::Satp;
use crate::walker::{
    self, AccessType, Fault, FaultKind, PrivilegeMode, Resolved, Translation, TranslationResult,
};

/// Default number of cached translations, matching the modeled hardware.
pub const DEFAULT_CAPACITY: usize = 64;

/// One cached translation: a resolved page-sized (or superpage-sized)
/// virtual-to-physical mapping, scoped to an address space.
///
/// The leaf entry is snapshotted so permission re-checks on later hits do
/// not re-walk the table. The handle back-reference into the index is
/// runtime-only and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlbEntry {
    /// Page-aligned virtual base of the mapping.
    pub vaddr: VirtAddr,
    /// Physical base of the mapping.
    pub paddr: PhysAddr,
    /// log2 of the page size.
    pub log_size: u32,
    /// Address space the mapping belongs to (ignored when global).
    pub asid: u16,
    /// Snapshot of the resolving leaf entry.
    pub pte: Pte,
    pub(crate) recency: u64,
    pub(crate) handle: Option<EntryHandle>,
}

impl TlbEntry {
    /// Builds an entry from a completed walk, scoped to `asid`.
    pub fn from_walk(resolved: &Resolved, asid: u16) -> Self {
        Self {
            vaddr: resolved.page_base,
            paddr: resolved.paddr_base,
            log_size: resolved.log_size,
            asid,
            pte: resolved.pte,
            recency: 0,
            handle: None,
        }
    }

    /// Returns the page size in bytes.
    pub const fn size(&self) -> u64 {
        1 << self.log_size
    }

    /// Returns whether `vaddr` falls inside the mapped range.
    pub fn contains(&self, vaddr: VirtAddr) -> bool {
        vaddr.align_down(self.size()) == self.vaddr
    }

    /// Returns whether the mapping is global (matches every address space).
    pub fn is_global(&self) -> bool {
        self.pte.is_global()
    }

    /// Returns the permissions the snapshotted leaf grants.
    pub fn permissions(&self) -> Permissions {
        self.pte.permissions()
    }

    /// Returns the recency marker assigned by the index.
    pub fn recency(&self) -> u64 {
        self.recency
    }

    /// Returns the index back-reference, if the entry is currently live in
    /// an index.
    pub fn handle(&self) -> Option<EntryHandle> {
        self.handle
    }

    /// Translates one virtual address within the mapped range.
    pub fn translate(&self, vaddr: VirtAddr) -> PhysAddr {
        debug_assert!(self.contains(vaddr));
        self.paddr + (vaddr.as_u64() & (self.size() - 1))
    }

    /// Writes every persistent field to the store under `prefix`.
    ///
    /// The index handle is volatile and deliberately not saved.
    pub fn save<S: CheckpointStore>(&self, store: &mut S, prefix: &str) {
        store.store(&format!("{prefix}vaddr"), self.vaddr.as_u64());
        store.store(&format!("{prefix}paddr"), self.paddr.as_u64());
        store.store(&format!("{prefix}log_size"), self.log_size as u64);
        store.store(&format!("{prefix}asid"), self.asid as u64);
        store.store(&format!("{prefix}pte"), self.pte.raw());
        store.store(&format!("{prefix}recency"), self.recency);
    }

    /// Reconstructs an entry from the store.
    ///
    /// The restored entry has no index handle; re-insert it to obtain one.
    pub fn restore<S: CheckpointStore>(store: &S, prefix: &str) -> Result<Self, CheckpointError> {
        Ok(Self {
            vaddr: VirtAddr::new(store.require(&format!("{prefix}vaddr"))?),
            paddr: PhysAddr::new(store.require(&format!("{prefix}paddr"))?),
            log_size: store.require(&format!("{prefix}log_size"))? as u32,
            asid: store.require(&format!("{prefix}asid"))? as u16,
            pte: Pte::from_raw(store.require(&format!("{prefix}pte"))?),
            recency: store.require(&format!("{prefix}recency"))?,
            handle: None,
        })
    }
}

/// The per-hart translation cache.
pub struct Tlb {
    index: TranslationIndex,
}

impl Tlb {
    /// Creates a cache bounded to `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            index: TranslationIndex::new(capacity),
        }
    }

    /// Returns the number of cached translations.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the capacity bound.
    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    /// Translates `vaddr` for the given access, walking the page table on a
    /// miss and caching the result.
    ///
    /// Cached hits are re-checked against the snapshotted leaf permissions;
    /// a denial faults without invalidating the entry. A write hit whose
    /// snapshot has the dirty bit clear re-walks so the in-memory entry is
    /// updated and the snapshot refreshed.
    pub fn translate<P: MemoryPort>(
        &mut self,
        port: &mut P,
        satp: Satp,
        vaddr: VirtAddr,
        access: AccessType,
        privilege: PrivilegeMode,
    ) -> TranslationResult {
        let asid = satp.asid();

        if let Some(entry) = self.index.lookup(asid, vaddr) {
            if !entry.permissions().allows(access, privilege) {
                log::debug!("cached mapping for {} denies {:?}", vaddr, access);
                return Err(Fault {
                    kind: FaultKind::PermissionDenied,
                    vaddr,
                    access,
                });
            }
            let needs_dirty = access == AccessType::Write && !entry.pte.is_dirty();
            if !needs_dirty {
                return Ok(Translation {
                    paddr: entry.translate(vaddr),
                    page_base: entry.vaddr,
                    log_size: entry.log_size,
                    perms: entry.permissions(),
                });
            }
            // Fall through to the walker to set the dirty bit in memory;
            // the insert below replaces the stale snapshot.
        }

        let resolved = walker::walk(port, satp, vaddr, access, privilege)?;
        let translation = resolved.translation(vaddr);
        if let Some(victim) = self.index.insert(TlbEntry::from_walk(&resolved, asid)) {
            log::trace!("translation cache full, evicted {}", victim.vaddr);
        }
        Ok(translation)
    }

    /// Removes every cached translation matching the predicate, returning
    /// how many were removed.
    pub fn invalidate<F: FnMut(&TlbEntry) -> bool>(&mut self, matches: F) -> usize {
        self.index.invalidate(matches)
    }

    /// Removes every cached translation.
    pub fn flush_all(&mut self) -> usize {
        self.index.invalidate(|_| true)
    }

    /// Removes the cached translations of one address space, sparing
    /// global mappings.
    pub fn flush_asid(&mut self, asid: u16) -> usize {
        self.index
            .invalidate(|entry| !entry.is_global() && entry.asid == asid)
    }

    /// Removes every cached translation covering `vaddr`, in any address
    /// space.
    pub fn flush_page(&mut self, vaddr: VirtAddr) -> usize {
        self.index.invalidate(|entry| entry.contains(vaddr))
    }

    /// Removes the cached translations covering `vaddr` that are visible to
    /// `asid` (its own and global ones).
    pub fn flush_page_asid(&mut self, vaddr: VirtAddr, asid: u16) -> usize {
        self.index
            .invalidate(|entry| entry.contains(vaddr) && (entry.is_global() || entry.asid == asid))
    }

    /// Writes the whole cache to the store as `size` plus `entry<N>.*`
    /// scalars.
    pub fn save<S: CheckpointStore>(&self, store: &mut S) {
        let mut count = 0;
        for entry in self.index.iter() {
            entry.save(store, &format!("entry{count}."));
            count += 1;
        }
        store.store("size", count);
    }

    /// Replaces the cache contents with the entries in the store.
    ///
    /// Entries are re-inserted in recency order, so each obtains a fresh
    /// handle while the relative eviction order survives the round trip.
    pub fn restore<S: CheckpointStore>(&mut self, store: &S) -> Result<(), CheckpointError> {
        let count = store.require("size")?;
        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            entries.push(TlbEntry::restore(store, &format!("entry{i}."))?);
        }
        entries.sort_by_key(TlbEntry::recency);

        self.index.invalidate(|_| true);
        for entry in entries {
            self.index.insert(entry);
        }
        Ok(())
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::EmulatedMemory;
    use crate::satp::TranslationMode;
    use crate::sv39;

    /// Port wrapper counting reads, to distinguish cached hits from walks.
    struct CountingPort {
        inner: EmulatedMemory,
        reads: usize,
    }

    impl CountingPort {
        fn new(size: usize) -> Self {
            Self {
                inner: EmulatedMemory::new(size),
                reads: 0,
            }
        }
    }

    impl MemoryPort for CountingPort {
        fn read_bytes(&mut self, addr: PhysAddr, buf: &mut [u8]) {
            self.reads += 1;
            self.inner.read_bytes(addr, buf);
        }

        fn write_bytes(&mut self, addr: PhysAddr, data: &[u8]) {
            self.inner.write_bytes(addr, data);
        }
    }

    const ROOT_PPN: u64 = 0x1;

    fn satp_for(asid: u16) -> Satp {
        Satp::new(TranslationMode::Sv39, asid, ROOT_PPN)
    }

    fn set_entry<P: MemoryPort>(port: &mut P, table_ppn: u64, index: u64, pte: Pte) {
        let addr = PhysAddr::new((table_ppn << sv39::PAGE_SHIFT) + index * sv39::PTE_SIZE);
        port.write_u64(addr, pte.raw());
    }

    fn map_4k<P: MemoryPort>(port: &mut P, vaddr: VirtAddr, leaf_ppn: u64, perms: Permissions) {
        // Derive distinct intermediate tables from the vaddr so several
        // mappings can coexist in one test.
        let l1_ppn = 0x10 + vaddr.page_index(2);
        let l0_ppn = 0x300 + vaddr.page_index(2) * 0x200 + vaddr.page_index(1);
        set_entry(port, ROOT_PPN, vaddr.page_index(2), Pte::pointer(l1_ppn));
        set_entry(port, l1_ppn, vaddr.page_index(1), Pte::pointer(l0_ppn));
        set_entry(port, l0_ppn, vaddr.page_index(0), Pte::leaf(leaf_ppn, perms));
    }

    #[test]
    fn miss_walks_then_hit_uses_cache() {
        let mut port = CountingPort::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::rwx());

        port.reads = 0;
        let first = tlb
            .translate(
                &mut port,
                satp_for(1),
                vaddr,
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap();
        assert_eq!(first.paddr, PhysAddr::new(0x50_0000));
        assert_eq!(port.reads, 3);
        assert_eq!(tlb.len(), 1);

        port.reads = 0;
        let second = tlb
            .translate(
                &mut port,
                satp_for(1),
                vaddr + 0x123,
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap();
        assert_eq!(second.paddr, PhysAddr::new(0x50_0123));
        assert_eq!(port.reads, 0);
    }

    #[test]
    fn faulting_walk_caches_nothing() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::default();

        let fault = tlb
            .translate(
                &mut port,
                satp_for(1),
                VirtAddr::new(0x4000),
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::NotPresent);
        assert!(tlb.is_empty());
    }

    #[test]
    fn cached_hit_rechecks_permissions() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::read_only());

        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();

        let fault = tlb
            .translate(
                &mut port,
                satp_for(1),
                vaddr,
                AccessType::Write,
                PrivilegeMode::Supervisor,
            )
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::PermissionDenied);
        // The read mapping stays cached.
        assert_eq!(tlb.len(), 1);
    }

    #[test]
    fn write_hit_on_clean_snapshot_rewalks() {
        let mut port = CountingPort::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::rwx());

        // Fill with a read: the snapshot has A=1, D=0.
        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();

        port.reads = 0;
        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Write,
            PrivilegeMode::Supervisor,
        )
        .unwrap();
        // The write re-walked to set the dirty bit in memory.
        assert_eq!(port.reads, 3);
        let l0_ppn = 0x300;
        let leaf = Pte::from_raw(port.read_u64(PhysAddr::new(
            (l0_ppn << sv39::PAGE_SHIFT) + vaddr.page_index(0) * sv39::PTE_SIZE,
        )));
        assert!(leaf.is_dirty());
        assert_eq!(tlb.len(), 1);

        // The refreshed snapshot makes the next write a pure hit.
        port.reads = 0;
        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Write,
            PrivilegeMode::Supervisor,
        )
        .unwrap();
        assert_eq!(port.reads, 0);
    }

    #[test]
    fn flush_prevents_stale_hits() {
        let mut port = CountingPort::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::rwx());

        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();
        assert_eq!(tlb.flush_all(), 1);
        assert!(tlb.is_empty());

        // The next translation walks again.
        port.reads = 0;
        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();
        assert_eq!(port.reads, 3);
    }

    #[test]
    fn flush_asid_spares_global_entries() {
        let mut tlb = Tlb::default();
        let mut scoped = TlbEntry {
            vaddr: VirtAddr::new(0x1000),
            paddr: PhysAddr::new(0x10_0000),
            log_size: 12,
            asid: 1,
            pte: Pte::leaf(0x100, Permissions::rwx()),
            recency: 0,
            handle: None,
        };
        let mut global = scoped.clone();
        global.vaddr = VirtAddr::new(0x2000);
        global.pte.set_global(true);
        tlb.index.insert(scoped.clone());
        tlb.index.insert(global);

        assert_eq!(tlb.flush_asid(1), 1);
        assert_eq!(tlb.len(), 1);
        assert!(tlb.index.lookup(1, VirtAddr::new(0x2000)).is_some());

        scoped.vaddr = VirtAddr::new(0x3000);
        tlb.index.insert(scoped);
        assert_eq!(tlb.flush_all(), 2);
    }

    #[test]
    fn flush_page_is_range_scoped() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::default();
        let kept = VirtAddr::new(0x4000);
        let flushed = VirtAddr::new(0x5000);
        map_4k(&mut port, kept, 0x500, Permissions::rwx());
        map_4k(&mut port, flushed, 0x600, Permissions::rwx());
        for vaddr in [kept, flushed] {
            tlb.translate(
                &mut port,
                satp_for(1),
                vaddr,
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap();
        }

        assert_eq!(tlb.flush_page(flushed + 0x123), 1);
        assert_eq!(tlb.len(), 1);
        assert!(tlb.index.lookup(1, kept).is_some());
    }

    #[test]
    fn targeted_invalidation() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::rwx());
        for asid in [1, 2] {
            tlb.translate(
                &mut port,
                satp_for(asid),
                vaddr,
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap();
        }
        assert_eq!(tlb.len(), 2);

        // Fence the page in address space 1 only.
        assert_eq!(tlb.flush_page_asid(vaddr + 0x10, 1), 1);
        assert!(tlb.index.lookup(2, vaddr).is_some());
        assert!(tlb.index.lookup(1, vaddr).is_none());

        // Arbitrary predicates reach anything the flush helpers do not.
        assert_eq!(tlb.invalidate(|entry| entry.asid == 2), 1);
        assert!(tlb.is_empty());
    }

    #[test]
    fn entry_checkpoint_round_trip() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::rwx().user());
        tlb.translate(
            &mut port,
            satp_for(7),
            vaddr,
            AccessType::Read,
            PrivilegeMode::User,
        )
        .unwrap();

        let original = tlb.index.lookup(7, vaddr).unwrap().clone();
        assert!(original.handle().is_some());

        let mut store = crate::checkpoint::MemStore::new();
        original.save(&mut store, "");
        let restored = TlbEntry::restore(&store, "").unwrap();

        assert_eq!(restored.vaddr, original.vaddr);
        assert_eq!(restored.paddr, original.paddr);
        assert_eq!(restored.log_size, original.log_size);
        assert_eq!(restored.asid, original.asid);
        assert_eq!(restored.pte, original.pte);
        assert_eq!(restored.recency(), original.recency());
        // The handle is volatile: gone until re-insertion.
        assert!(restored.handle().is_none());

        let mut other = Tlb::new(4);
        other.index.insert(restored);
        assert!(other.index.lookup(7, vaddr).unwrap().handle().is_some());
    }

    #[test]
    fn restore_fails_on_missing_field() {
        let store = crate::checkpoint::MemStore::new();
        let err = TlbEntry::restore(&store, "entry0.").unwrap_err();
        assert_eq!(
            err,
            CheckpointError::MissingField("entry0.vaddr".to_string())
        );
    }

    #[test]
    fn whole_tlb_round_trip_preserves_eviction_order() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::new(3);
        let pages = [0x4000u64, 0x5000, 0x6000];
        for &page in &pages {
            map_4k(&mut port, VirtAddr::new(page), page >> 12, Permissions::rwx());
            tlb.translate(
                &mut port,
                satp_for(1),
                VirtAddr::new(page),
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap();
        }
        // Refresh the oldest so 0x5000 becomes least recent.
        tlb.translate(
            &mut port,
            satp_for(1),
            VirtAddr::new(0x4000),
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();

        let mut store = crate::checkpoint::MemStore::new();
        tlb.save(&mut store);
        assert_eq!(store.load("size"), Some(3));

        let mut restored = Tlb::new(3);
        restored.restore(&store).unwrap();
        assert_eq!(restored.len(), 3);

        // Overflowing the restored cache evicts the same victim the
        // original would have chosen.
        map_4k(&mut port, VirtAddr::new(0x7000), 0x7, Permissions::rwx());
        restored
            .translate(
                &mut port,
                satp_for(1),
                VirtAddr::new(0x7000),
                AccessType::Read,
                PrivilegeMode::Supervisor,
            )
            .unwrap();
        assert!(restored.index.lookup(1, VirtAddr::new(0x5000)).is_none());
        assert!(restored.index.lookup(1, VirtAddr::new(0x4000)).is_some());
        assert!(restored.index.lookup(1, VirtAddr::new(0x6000)).is_some());
    }

    #[test]
    fn asid_scoping_through_translate() {
        let mut port = EmulatedMemory::new(0x100_0000);
        let mut tlb = Tlb::default();
        let vaddr = VirtAddr::new(0x4000);
        map_4k(&mut port, vaddr, 0x500, Permissions::rwx());

        tlb.translate(
            &mut port,
            satp_for(1),
            vaddr,
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();

        // A different address space misses and re-walks into its own entry.
        tlb.translate(
            &mut port,
            satp_for(2),
            vaddr,
            AccessType::Read,
            PrivilegeMode::Supervisor,
        )
        .unwrap();
        assert_eq!(tlb.len(), 2);
    }
}
