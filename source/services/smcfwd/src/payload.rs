// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Captured per-slot data that travels alongside each [`CommandRecord`].
//!
//! [`CommandRecord`]: smc_abi::CommandRecord

use smc_abi::{PhysAddr, PARAM_COUNT};

/// Fixed window captured from every registered agent segment.
pub const AGENT_WINDOW_LEN: usize = 4096;

/// Bytes of UUID material read from `uuid_ref` (16-byte UUID + login byte).
pub const UUID_LEN: usize = 17;

/// One captured parameter slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ParamSlot {
    /// Tag carries nothing this capture understands.
    #[default]
    Empty,
    /// Two opaque scalar words.
    Value {
        /// First scalar word.
        value_a: u32,
        /// Second scalar word.
        value_b: u32,
    },
    /// Heap copy of a referenced buffer.
    Memory {
        /// Owned copy; `None` when the reference could not be resolved.
        bytes: Option<Vec<u8>>,
        /// Buffer size as reported by the operation.
        size: u32,
        /// Normal-world reference the bytes were read from.
        original_reference: PhysAddr,
    },
}

/// Snapshot of one externally registered agent segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSnapshot {
    /// Registered base address of the segment.
    pub addr: PhysAddr,
    /// Copy of the segment's fixed window.
    pub bytes: Vec<u8>,
}

/// Data captured for one ring slot, parallel to its `CommandRecord`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedPayload {
    /// Rendered as `SMC_RETURN_START` when set.
    pub is_response: bool,
    /// Packed parameter tags as read from the operation (0 when absent).
    pub param_types: u32,
    /// Parameter slots in operation order.
    pub params: [ParamSlot; PARAM_COUNT],
    /// Uppercase hex of the UUID bytes, or empty.
    pub uuid: String,
    /// Agent segment snapshots (only for agent callbacks).
    pub agent_snapshots: Vec<AgentSnapshot>,
}

impl CapturedPayload {
    /// Total owned bytes held by this payload.
    pub fn owned_bytes(&self) -> usize {
        let params: usize = self
            .params
            .iter()
            .map(|slot| match slot {
                ParamSlot::Memory { bytes: Some(bytes), .. } => bytes.len(),
                _ => 0,
            })
            .sum();
        params + self.agent_snapshots.iter().map(|snap| snap.bytes.len()).sum::<usize>()
    }
}

/// Addressing a slot hands on to later responses/callbacks that correlate with it.
///
/// Survives consumption of the slot; only owned buffers are released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressContext {
    /// UUID reference valid in the observer's address space.
    pub uuid_ref: PhysAddr,
    /// Operation reference valid in the observer's address space.
    pub operation_ref: PhysAddr,
    /// Per-parameter buffer references recorded from the originating request.
    pub memory_refs: [PhysAddr; PARAM_COUNT],
}
