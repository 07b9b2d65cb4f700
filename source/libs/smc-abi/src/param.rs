// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{read_u32_le, PhysAddr};

/// Number of parameter slots per operation.
pub const PARAM_COUNT: usize = 4;

/// Size of the encoded operation block (`param_types` + 4 word pairs).
pub const OPERATION_WIRE_LEN: usize = 4 + PARAM_COUNT * 8;

bitflags::bitflags! {
    /// Data direction encoded in the low bits of a parameter tag.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Direction: u8 {
        /// Normal world to TEE.
        const INPUT = 1 << 0;
        /// TEE to normal world.
        const OUTPUT = 1 << 1;
    }
}

/// Decoded 4-bit parameter tag (GlobalPlatform client API numbering).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Slot unused.
    None,
    /// Two scalar words.
    Value(Direction),
    /// Temporary memory reference (buffer + size).
    TempMemory(Direction),
    /// Whole registered memory reference.
    WholeMemory,
    /// Partial registered memory reference.
    PartialMemory(Direction),
    /// Tag value with no assigned meaning.
    Reserved(u8),
}

/// Coarse classification driving extraction and rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamClass {
    /// Copy the two scalar words.
    Value,
    /// Snapshot the referenced temporary buffer.
    TempMemory,
    /// Carried through untouched.
    Other,
}

impl ParamType {
    /// Decodes a 4-bit tag; upper bits are ignored.
    pub fn from_tag(tag: u8) -> Self {
        let tag = tag & 0x0F;
        let dir = Direction::from_bits_truncate(tag & 0x3);
        match tag {
            0x0 => ParamType::None,
            0x1..=0x3 => ParamType::Value(dir),
            0x5..=0x7 => ParamType::TempMemory(dir),
            0xC => ParamType::WholeMemory,
            0xD..=0xF => ParamType::PartialMemory(Direction::from_bits_truncate(tag - 0xC)),
            other => ParamType::Reserved(other),
        }
    }

    /// Encodes the tag back into its 4-bit value.
    pub fn tag(self) -> u8 {
        match self {
            ParamType::None => 0x0,
            ParamType::Value(dir) => dir.bits(),
            ParamType::TempMemory(dir) => 0x4 | dir.bits(),
            ParamType::WholeMemory => 0xC,
            ParamType::PartialMemory(dir) => 0xC + dir.bits(),
            ParamType::Reserved(tag) => tag & 0x0F,
        }
    }

    /// Extraction class of this tag.
    pub fn class(self) -> ParamClass {
        match self {
            ParamType::Value(dir) if !dir.is_empty() => ParamClass::Value,
            ParamType::TempMemory(dir) if !dir.is_empty() => ParamClass::TempMemory,
            _ => ParamClass::Other,
        }
    }
}

/// Returns the tag of parameter `index` from a packed `param_types` word.
#[inline]
pub fn param_type_get(param_types: u32, index: usize) -> ParamType {
    ParamType::from_tag(((param_types >> (4 * index)) & 0x0F) as u8)
}

/// Packs four tags into a `param_types` word.
pub fn pack_param_types(types: [ParamType; PARAM_COUNT]) -> u32 {
    types
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, ty)| acc | (u32::from(ty.tag()) << (4 * i)))
}

/// One raw parameter: two words whose meaning depends on the tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawParam {
    /// `value.a`, or `memref.buffer` for memory parameters.
    pub a: u32,
    /// `value.b`, or `memref.size` for memory parameters.
    pub b: u32,
}

impl RawParam {
    /// Buffer reference of a memory parameter.
    #[inline]
    pub fn buffer(&self) -> PhysAddr {
        PhysAddr(self.a)
    }

    /// Buffer size of a memory parameter.
    #[inline]
    pub fn size(&self) -> u32 {
        self.b
    }
}

/// Operation block referenced by [`crate::CommandRecord::operation_ref`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Operation {
    /// Four packed 4-bit parameter tags.
    pub param_types: u32,
    /// Parameter words.
    pub params: [RawParam; PARAM_COUNT],
}

impl Operation {
    /// Decodes the 36-byte little-endian operation layout.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < OPERATION_WIRE_LEN {
            return None;
        }
        let mut params = [RawParam::default(); PARAM_COUNT];
        for (i, param) in params.iter_mut().enumerate() {
            param.a = read_u32_le(bytes, 1 + 2 * i);
            param.b = read_u32_le(bytes, 2 + 2 * i);
        }
        Some(Self { param_types: read_u32_le(bytes, 0), params })
    }

    /// Encodes the operation into its 36-byte layout.
    pub fn to_bytes(&self) -> [u8; OPERATION_WIRE_LEN] {
        let mut out = [0u8; OPERATION_WIRE_LEN];
        out[0..4].copy_from_slice(&self.param_types.to_le_bytes());
        for (i, param) in self.params.iter().enumerate() {
            let at = 4 + i * 8;
            out[at..at + 4].copy_from_slice(&param.a.to_le_bytes());
            out[at + 4..at + 8].copy_from_slice(&param.b.to_le_bytes());
        }
        out
    }

    /// Tag of parameter `index`.
    #[inline]
    pub fn param_type(&self, index: usize) -> ParamType {
        param_type_get(self.param_types, index)
    }
}
