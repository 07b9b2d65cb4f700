// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Parameter extraction – copies scalars and snapshots referenced memory
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE: Tests in `source/services/smcfwd/tests/extract_params.rs`
//!
//! INVARIANTS:
//! - Runs without any ring lock held; every buffer is allocated fallibly
//! - Responses and callbacks never dereference their own (secure-world) addresses; they
//!   reuse the address context of the slot they were paired with
//! - A failed allocation discards everything copied so far for the record

use log::debug;
use smc_abi::{CommandRecord, MemoryView, ParamClass, PhysAddr, PARAM_COUNT};

use crate::error::{CaptureError, CopyTarget};
use crate::payload::{
    AddressContext, AgentSnapshot, CapturedPayload, ParamSlot, AGENT_WINDOW_LEN, UUID_LEN,
};

/// Default ceiling for one memory-reference copy. Its hex dump fits the default staging limit.
pub const DEFAULT_MAX_PARAM_LEN: usize = 4 * 1024 * 1024;

/// Size bounds applied while copying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Largest memory-reference buffer that will be copied; larger ones fail as out of memory.
    pub max_param_len: usize,
    /// Bytes snapshotted from each agent segment.
    pub agent_window: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self { max_param_len: DEFAULT_MAX_PARAM_LEN, agent_window: AGENT_WINDOW_LEN }
    }
}

/// Where memory references are resolved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSource {
    /// Originating request: use the command's own references and record them.
    Request,
    /// Response or callback: use the references stored with the paired slot.
    Origin(AddressContext),
}

/// Result of a successful extraction.
#[derive(Debug)]
pub struct Extraction {
    /// Captured payload ready to be committed.
    pub payload: CapturedPayload,
    /// Addressing handed on to later responses pairing with this slot.
    pub context: AddressContext,
}

/// Copies a command's parameters out of normal-world memory.
pub struct ParameterExtractor<'m> {
    memory: &'m dyn MemoryView,
    limits: ExtractLimits,
}

impl<'m> ParameterExtractor<'m> {
    /// Creates an extractor over `memory`.
    pub fn new(memory: &'m dyn MemoryView, limits: ExtractLimits) -> Self {
        Self { memory, limits }
    }

    /// Builds the payload for `cmd`.
    ///
    /// `agents` are the registered agent segments; they are snapshotted only for agent
    /// callbacks (`agent_id != 0`).
    pub fn extract(
        &self,
        cmd: &CommandRecord,
        is_response: bool,
        source: AddressSource,
        agents: &[PhysAddr],
    ) -> Result<Extraction, CaptureError> {
        let mut context = match source {
            AddressSource::Request => AddressContext {
                uuid_ref: cmd.uuid_ref,
                operation_ref: cmd.operation_ref,
                memory_refs: [PhysAddr::NULL; PARAM_COUNT],
            },
            AddressSource::Origin(context) => context,
        };
        let mut payload = CapturedPayload { is_response, ..Default::default() };

        payload.uuid = self.read_uuid(context.uuid_ref);

        if !context.operation_ref.is_null() {
            match self.memory.read_operation(context.operation_ref) {
                Ok(op) => {
                    payload.param_types = op.param_types;
                    for (index, raw) in op.params.iter().enumerate() {
                        payload.params[index] = match op.param_type(index).class() {
                            ParamClass::Value => ParamSlot::Value { value_a: raw.a, value_b: raw.b },
                            ParamClass::TempMemory => {
                                let addr = match source {
                                    AddressSource::Request => {
                                        context.memory_refs[index] = raw.buffer();
                                        raw.buffer()
                                    }
                                    AddressSource::Origin(_) => context.memory_refs[index],
                                };
                                let bytes = if addr.is_null() {
                                    None
                                } else {
                                    self.copy(
                                        addr,
                                        raw.size() as usize,
                                        self.limits.max_param_len,
                                        CopyTarget::Param(index),
                                    )?
                                };
                                ParamSlot::Memory { bytes, size: raw.size(), original_reference: addr }
                            }
                            ParamClass::Other => ParamSlot::Empty,
                        };
                    }
                }
                Err(fault) => debug!("operation at {:X} unreadable: {fault}", context.operation_ref),
            }
        }

        if cmd.agent_id != 0 {
            payload.agent_snapshots = Vec::with_capacity(agents.len());
            for (index, &addr) in agents.iter().enumerate() {
                let window = self.limits.agent_window;
                if let Some(bytes) =
                    self.copy(addr, window, window, CopyTarget::AgentSegment(index))?
                {
                    payload.agent_snapshots.push(AgentSnapshot { addr, bytes });
                }
            }
        }

        Ok(Extraction { payload, context })
    }

    fn read_uuid(&self, addr: PhysAddr) -> String {
        if addr.is_null() {
            return String::new();
        }
        let mut raw = [0u8; UUID_LEN];
        match self.memory.read_into(addr, &mut raw) {
            Ok(()) => hex::encode_upper(raw),
            Err(fault) => {
                debug!("uuid at {:X} unreadable: {fault}", addr);
                String::new()
            }
        }
    }

    /// Copies `len` bytes at `addr`. Unresolvable memory yields `Ok(None)`.
    fn copy(
        &self,
        addr: PhysAddr,
        len: usize,
        limit: usize,
        what: CopyTarget,
    ) -> Result<Option<Vec<u8>>, CaptureError> {
        let oom = CaptureError::OutOfMemory { what, size: len };
        if len > limit {
            return Err(oom);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| oom)?;
        buf.resize(len, 0);
        match self.memory.read_into(addr, &mut buf) {
            Ok(()) => Ok(Some(buf)),
            Err(fault) => {
                debug!("{what} at {:X} unreadable: {fault}", addr);
                Ok(None)
            }
        }
    }
}
