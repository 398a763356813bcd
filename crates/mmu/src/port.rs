//! Memory-access port over guest physical addresses.
//!
//! The walker fetches and stores page-table entries through this port; the
//! surrounding simulation provides the implementation (and any timing model
//! around it). Calls are synchronous and blocking.

use crate::address::PhysAddr;

/// A synchronous read/write port over guest physical memory.
///
/// Only the byte-level accessors are required; the typed helpers are
/// provided on top and read little-endian, matching the guest ISA.
pub trait MemoryPort {
    /// Reads `buf.len()` bytes starting at `addr`.
    fn read_bytes(&mut self, addr: PhysAddr, buf: &mut [u8]);

    /// Writes `data` starting at `addr`.
    fn write_bytes(&mut self, addr: PhysAddr, data: &[u8]);

    /// Reads a little-endian 64-bit word at `addr`.
    fn read_u64(&mut self, addr: PhysAddr) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf);
        u64::from_le_bytes(buf)
    }

    /// Writes a little-endian 64-bit word at `addr`.
    fn write_u64(&mut self, addr: PhysAddr, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}

/// A flat in-process guest memory, for harness and test use.
///
/// Reads beyond the configured size return zeros and writes there are
/// dropped, both logged at `warn`; a walk that chases a corrupt entry out
/// of range therefore resolves to a fault on the all-zeroes entry rather
/// than aborting the host.
#[cfg(any(test, feature = "emulation"))]
pub struct EmulatedMemory {
    bytes: Vec<u8>,
}

#[cfg(any(test, feature = "emulation"))]
impl EmulatedMemory {
    /// Creates a zeroed memory region of the given size.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    /// Returns the size of the region in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(any(test, feature = "emulation"))]
impl MemoryPort for EmulatedMemory {
    fn read_bytes(&mut self, addr: PhysAddr, buf: &mut [u8]) {
        let start = addr.as_u64() as usize;
        match start.checked_add(buf.len()) {
            Some(end) if end <= self.bytes.len() => {
                buf.copy_from_slice(&self.bytes[start..end]);
            }
            _ => {
                log::warn!(
                    "read of {} bytes at {} is outside emulated memory",
                    buf.len(),
                    addr
                );
                buf.fill(0);
            }
        }
    }

    fn write_bytes(&mut self, addr: PhysAddr, data: &[u8]) {
        let start = addr.as_u64() as usize;
        match start.checked_add(data.len()) {
            Some(end) if end <= self.bytes.len() => {
                self.bytes[start..end].copy_from_slice(data);
            }
            _ => {
                log::warn!(
                    "write of {} bytes at {} is outside emulated memory",
                    data.len(),
                    addr
                );
            }
        }
    }
}
