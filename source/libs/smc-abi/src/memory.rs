// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Observer-side access to normal-world memory referenced by SMC commands.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::param::{Operation, OPERATION_WIRE_LEN};
use crate::PhysAddr;

/// Errors surfaced when a reference cannot be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MemoryFault {
    /// No mapping covers the requested range.
    #[error("unmapped range {addr:#X}+{len:#X}")]
    Unmapped {
        /// Start of the requested range.
        addr: PhysAddr,
        /// Requested length.
        len: usize,
    },
}

/// Read-only view of memory addressed by [`PhysAddr`] references.
///
/// Implementations must be callable from multiple producer threads at once.
pub trait MemoryView: Send + Sync {
    /// Copies `out.len()` bytes starting at `addr` into `out`.
    fn read_into(&self, addr: PhysAddr, out: &mut [u8]) -> Result<(), MemoryFault>;

    /// Reads and decodes the operation block at `addr`.
    fn read_operation(&self, addr: PhysAddr) -> Result<Operation, MemoryFault> {
        let mut raw = [0u8; OPERATION_WIRE_LEN];
        self.read_into(addr, &mut raw)?;
        Operation::from_bytes(&raw).ok_or(MemoryFault::Unmapped { addr, len: OPERATION_WIRE_LEN })
    }
}

impl<T: MemoryView + ?Sized> MemoryView for std::sync::Arc<T> {
    fn read_into(&self, addr: PhysAddr, out: &mut [u8]) -> Result<(), MemoryFault> {
        (**self).read_into(addr, out)
    }
}

/// Base of the bump region used by [`HostMemory::allocate_bytes`].
const HOST_ALLOC_BASE: u32 = 0x1000_0000;

/// In-process memory map standing in for normal-world physical memory.
///
/// Regions never overlap; a read must fall entirely inside one region.
pub struct HostMemory {
    inner: RwLock<HostRegions>,
}

struct HostRegions {
    regions: BTreeMap<u32, Vec<u8>>,
    next_unused: u32,
}

impl HostMemory {
    /// Creates an empty memory map.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HostRegions { regions: BTreeMap::new(), next_unused: HOST_ALLOC_BASE }),
        }
    }

    /// Maps `data` at `addr`, replacing any region starting at the same address.
    pub fn map(&self, addr: PhysAddr, data: Vec<u8>) {
        self.inner.write().regions.insert(addr.0, data);
    }

    /// Copies `data` into the bump region and returns its address.
    pub fn allocate_bytes(&self, data: &[u8]) -> PhysAddr {
        let mut inner = self.inner.write();
        let addr = inner.next_unused;
        // Keep allocations word aligned and never hand out a zero-sized hole.
        let span = (data.len().max(1) as u32 + 3) & !3;
        inner.next_unused = inner.next_unused.wrapping_add(span);
        inner.regions.insert(addr, data.to_vec());
        PhysAddr(addr)
    }

    /// Overwrites bytes inside an existing region.
    pub fn write(&self, addr: PhysAddr, data: &[u8]) -> Result<(), MemoryFault> {
        let mut inner = self.inner.write();
        let fault = MemoryFault::Unmapped { addr, len: data.len() };
        let (base, region) = inner.regions.range_mut(..=addr.0).next_back().ok_or(fault)?;
        let start = (addr.0 - *base) as usize;
        let end = start.checked_add(data.len()).ok_or(fault)?;
        let window = region.get_mut(start..end).ok_or(fault)?;
        window.copy_from_slice(data);
        Ok(())
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryView for HostMemory {
    fn read_into(&self, addr: PhysAddr, out: &mut [u8]) -> Result<(), MemoryFault> {
        let inner = self.inner.read();
        let fault = MemoryFault::Unmapped { addr, len: out.len() };
        let (base, region) = inner.regions.range(..=addr.0).next_back().ok_or(fault)?;
        let start = (addr.0 - *base) as usize;
        let end = start.checked_add(out.len()).ok_or(fault)?;
        out.copy_from_slice(region.get(start..end).ok_or(fault)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_inside_region_only() {
        let mem = HostMemory::new();
        mem.map(PhysAddr(0x100), vec![1, 2, 3, 4]);
        let mut out = [0u8; 2];
        mem.read_into(PhysAddr(0x102), &mut out).unwrap();
        assert_eq!(out, [3, 4]);
        assert!(mem.read_into(PhysAddr(0x103), &mut out).is_err());
        assert!(mem.read_into(PhysAddr(0x50), &mut out).is_err());
    }

    #[test]
    fn bump_allocations_do_not_overlap() {
        let mem = HostMemory::new();
        let a = mem.allocate_bytes(b"abc");
        let b = mem.allocate_bytes(b"defg");
        assert!(b.0 >= a.0 + 3);
        let mut out = [0u8; 3];
        mem.read_into(a, &mut out).unwrap();
        assert_eq!(&out, b"abc");
        mem.write(b.checked_add(1).unwrap(), b"XY").unwrap();
        let mut out = [0u8; 4];
        mem.read_into(b, &mut out).unwrap();
        assert_eq!(&out, b"dXYg");
    }
}
