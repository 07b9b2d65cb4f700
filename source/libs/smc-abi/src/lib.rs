// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared SMC command ABI consumed by the forwarder and its host tooling
//! OWNERS: @runtime
//! PUBLIC API: PhysAddr, CommandRecord, Operation, ParamType, Direction, ParamClass, MemoryView, HostMemory
//! DEPENDS_ON: bitflags, parking_lot, thiserror
//! INVARIANTS: Command is 14 LE words (56 bytes); operation is 1 + 4x2 LE words (36 bytes);
//!             parameter tags are 4 bits, slot `i` at bits `4*i..4*i+4`

mod command;
mod memory;
mod param;

pub use command::{CommandRecord, COMMAND_WIRE_LEN};
pub use memory::{HostMemory, MemoryFault, MemoryView};
pub use param::{
    pack_param_types, param_type_get, Direction, Operation, ParamClass, ParamType, RawParam,
    OPERATION_WIRE_LEN, PARAM_COUNT,
};

/// Opaque normal-world reference (physical address word) carried by SMC commands.
///
/// The value is only meaningful to the [`MemoryView`] that resolves it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u32);

impl PhysAddr {
    /// The null reference.
    pub const NULL: PhysAddr = PhysAddr(0);

    /// Returns `true` for the null reference.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offsets the reference, returning `None` on 32-bit overflow.
    #[inline]
    pub fn checked_add(self, offset: u32) -> Option<PhysAddr> {
        self.0.checked_add(offset).map(PhysAddr)
    }
}

impl core::fmt::UpperHex for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::UpperHex::fmt(&self.0, f)
    }
}

pub(crate) fn read_u32_le(bytes: &[u8], word: usize) -> u32 {
    let at = word * 4;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
