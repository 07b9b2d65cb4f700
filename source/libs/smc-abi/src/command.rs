// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{read_u32_le, PhysAddr};

/// Size of the encoded command structure (14 little-endian words).
pub const COMMAND_WIRE_LEN: usize = 14 * 4;

/// One SMC command as exchanged between the normal-world driver and the TEE.
///
/// `agent_id == 0` marks an ordinary request/response; any other value is a
/// secure-world agent callback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandRecord {
    /// Reference to the 17-byte target UUID (null when absent).
    pub uuid_ref: PhysAddr,
    /// Command identifier.
    pub cmd_id: u32,
    /// Device file identifier of the caller.
    pub dev_file_id: u32,
    /// TEE session/context identifier.
    pub context_id: u32,
    /// Non-zero for agent callbacks.
    pub agent_id: u32,
    /// Reference to the [`crate::Operation`] block (null when absent).
    pub operation_ref: PhysAddr,
    /// Login method.
    pub login_method: u32,
    /// Login data word.
    pub login_data: u32,
    /// Origin of the returned error.
    pub err_origin: u32,
    /// Return value.
    pub ret_val: u32,
    /// Per-command event number, used as correlation key.
    pub event_nr: u32,
    /// Remap flag.
    pub remap: u32,
    /// Caller uid.
    pub uid: u32,
    /// Started flag.
    pub started: u32,
}

impl CommandRecord {
    /// Decodes the 56-byte little-endian command layout.
    ///
    /// Returns `None` when `bytes` is shorter than [`COMMAND_WIRE_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < COMMAND_WIRE_LEN {
            return None;
        }
        let w = |i| read_u32_le(bytes, i);
        Some(Self {
            uuid_ref: PhysAddr(w(0)),
            cmd_id: w(1),
            dev_file_id: w(2),
            context_id: w(3),
            agent_id: w(4),
            operation_ref: PhysAddr(w(5)),
            login_method: w(6),
            login_data: w(7),
            err_origin: w(8),
            ret_val: w(9),
            event_nr: w(10),
            remap: w(11),
            uid: w(12),
            started: w(13),
        })
    }

    /// Encodes the command into its 56-byte little-endian layout.
    pub fn to_bytes(&self) -> [u8; COMMAND_WIRE_LEN] {
        let words = [
            self.uuid_ref.0,
            self.cmd_id,
            self.dev_file_id,
            self.context_id,
            self.agent_id,
            self.operation_ref.0,
            self.login_method,
            self.login_data,
            self.err_origin,
            self.ret_val,
            self.event_nr,
            self.remap,
            self.uid,
            self.started,
        ];
        let mut out = [0u8; COMMAND_WIRE_LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Returns `true` for secure-world agent callbacks.
    #[inline]
    pub fn is_agent(&self) -> bool {
        self.agent_id != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_golden_layout() {
        let cmd = CommandRecord {
            uuid_ref: PhysAddr(0x1000),
            cmd_id: 2,
            agent_id: 0x4147_4E54,
            operation_ref: PhysAddr(0x2000),
            event_nr: 7,
            uid: 1000,
            ..Default::default()
        };
        let bytes = cmd.to_bytes();
        assert_eq!(&bytes[0..4], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[16..20], &[0x54, 0x4E, 0x47, 0x41]);
        assert_eq!(&bytes[40..44], &[7, 0, 0, 0]);
        assert_eq!(CommandRecord::from_bytes(&bytes), Some(cmd));
    }

    #[test]
    fn command_rejects_short_input() {
        assert_eq!(CommandRecord::from_bytes(&[0u8; COMMAND_WIRE_LEN - 1]), None);
    }
}
