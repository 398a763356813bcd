//! Prefix-keyed index over cached translations.
//!
//! The index answers "which live mapping covers this virtual address in
//! this address space" with longest-prefix semantics: Sv39 has three page
//! size classes, and the lookup probes them smallest first, so a 4 KiB
//! mapping always shadows a superpage that contains it.
//!
//! Entries live in a slot vector with a free list; an [`EntryHandle`] is a
//! stable slot number, so removal through a handle never rescans the
//! structure. One page-base hash map per size class holds the per-class
//! buckets. The index owns the recency counter: every hit and every
//! insertion bumps it, and capacity eviction removes the entry with the
//! smallest recency across all live entries.

use std::collections::HashMap;

use crate::address::VirtAddr;
use crate::sv39;
use crate::tlb::TlbEntry;

/// A stable reference to an entry's slot in the index backing store.
///
/// Handles are runtime-only: a restored entry has none until it is
/// re-inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(usize);

/// The per-hart index of cached translations.
pub struct TranslationIndex {
    /// Backing store; `None` slots are on the free list.
    slots: Vec<Option<TlbEntry>>,
    free: Vec<usize>,
    /// Page base -> slot numbers, one map per size class (smallest first).
    classes: [HashMap<u64, Vec<usize>>; sv39::LEVELS],
    capacity: usize,
    live: usize,
    /// Recency clock; bumped on every hit and insertion.
    clock: u64,
}

impl TranslationIndex {
    /// Creates an index bounded to `capacity` live entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "index capacity must be non-zero");
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            classes: core::array::from_fn(|_| HashMap::new()),
            capacity,
            live: 0,
            clock: 0,
        }
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Finds the most specific live entry covering `vaddr` whose address
    /// space matches `asid` (or which is global), bumping its recency.
    pub fn lookup(&mut self, asid: u16, vaddr: VirtAddr) -> Option<&TlbEntry> {
        let slot = self.find_slot(asid, vaddr)?;
        self.clock += 1;
        let entry = self.slots[slot]
            .as_mut()
            .expect("index bucket references a dead slot");
        entry.recency = self.clock;
        Some(&*entry)
    }

    /// Inserts an entry, dropping any stale alias at the same size class
    /// and address-space scope first. If the index is at capacity, the
    /// least recent live entry is evicted and returned.
    pub fn insert(&mut self, mut entry: TlbEntry) -> Option<TlbEntry> {
        let class = class_of(entry.log_size);
        let base = entry.vaddr.as_u64();
        debug_assert!(
            entry.vaddr.is_aligned(1 << entry.log_size),
            "entry base must be aligned to its page size"
        );

        // Stale-alias invariant: an overlapping mapping at the same
        // specificity and scope is invalid and must go before the new one
        // lands.
        let conflicts: Vec<usize> = self.classes[class]
            .get(&base)
            .map(|bucket| {
                bucket
                    .iter()
                    .copied()
                    .filter(|&slot| {
                        let old = self.slots[slot]
                            .as_ref()
                            .expect("index bucket references a dead slot");
                        entry.is_global() || old.is_global() || old.asid == entry.asid
                    })
                    .collect()
            })
            .unwrap_or_default();
        for slot in conflicts {
            let stale = self.detach(slot);
            log::debug!("dropping stale alias {} (asid {})", stale.vaddr, stale.asid);
        }

        let mut evicted = None;
        if self.live == self.capacity {
            let victim = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(slot, e)| e.as_ref().map(|e| (slot, e.recency)))
                .min_by_key(|&(_, recency)| recency)
                .map(|(slot, _)| slot)
                .expect("a full index has a least recent entry");
            let victim = self.detach(victim);
            log::trace!("evicting {} (asid {})", victim.vaddr, victim.asid);
            evicted = Some(victim);
        }

        self.clock += 1;
        entry.recency = self.clock;

        let slot = self.free.pop().unwrap_or_else(|| {
            self.slots.push(None);
            self.slots.len() - 1
        });
        entry.handle = Some(EntryHandle(slot));
        self.classes[class].entry(base).or_default().push(slot);
        self.slots[slot] = Some(entry);
        self.live += 1;

        evicted
    }

    /// Removes the entry the handle refers to, if it is still live.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<TlbEntry> {
        if self.slots.get(handle.0)?.is_some() {
            Some(self.detach(handle.0))
        } else {
            None
        }
    }

    /// Removes every live entry matching the predicate, returning how many
    /// were removed. Takes effect before returning: no later lookup can
    /// observe a removed mapping.
    pub fn invalidate<F: FnMut(&TlbEntry) -> bool>(&mut self, mut matches: F) -> usize {
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.as_ref().map(|e| (slot, matches(e))))
            .filter(|&(_, matched)| matched)
            .map(|(slot, _)| slot)
            .collect();
        let count = doomed.len();
        for slot in doomed {
            self.detach(slot);
        }
        count
    }

    /// Iterates over the live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &TlbEntry> {
        self.slots.iter().filter_map(|e| e.as_ref())
    }

    fn find_slot(&self, asid: u16, vaddr: VirtAddr) -> Option<usize> {
        for class in 0..sv39::LEVELS {
            let base = vaddr.as_u64() & !(sv39::page_size(class) - 1);
            let Some(bucket) = self.classes[class].get(&base) else {
                continue;
            };
            let mut global_hit = None;
            for &slot in bucket {
                let entry = self.slots[slot]
                    .as_ref()
                    .expect("index bucket references a dead slot");
                if entry.is_global() {
                    global_hit = Some(slot);
                } else if entry.asid == asid {
                    // An exact address-space match outranks a global entry.
                    return Some(slot);
                }
            }
            if global_hit.is_some() {
                return global_hit;
            }
        }
        None
    }

    /// Unlinks a live slot from its class bucket and frees it.
    fn detach(&mut self, slot: usize) -> TlbEntry {
        let mut entry = self.slots[slot]
            .take()
            .expect("detaching a dead slot");
        let class = class_of(entry.log_size);
        let base = entry.vaddr.as_u64();
        let bucket = self.classes[class]
            .get_mut(&base)
            .expect("live entry missing from its class bucket");
        bucket.retain(|&s| s != slot);
        if bucket.is_empty() {
            self.classes[class].remove(&base);
        }
        self.free.push(slot);
        self.live -= 1;
        entry.handle = None;
        entry
    }
}

/// Maps a page-size exponent to its size class (0 = 4 KiB, 1 = 2 MiB,
/// 2 = 1 GiB).
fn class_of(log_size: u32) -> usize {
    let class = ((log_size - sv39::PAGE_SHIFT) / sv39::LEVEL_BITS) as usize;
    assert!(class < sv39::LEVELS, "page size has no Sv39 size class");
    class
}
