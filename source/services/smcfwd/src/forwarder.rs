// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: SmcForwarder – write path, dispatch gate and control plane over one owned state
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE:
//!   - `source/services/smcfwd/tests/ring_correlation.rs` (write path, folding, drops)
//!   - `source/services/smcfwd/tests/control_gate.rs` (control tokens, gate permits)
//!   - `tests/smcfwd_e2e/tests/` (concurrent producers, blocked dispatch)
//!
//! INVARIANTS:
//! - Disabled capture discards writes without allocating or locking
//! - Resolution and commit are separate short ring critical sections; extraction runs
//!   between them with no lock held
//! - Correlation failures are values, never errors, and leave the ring untouched

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use smc_abi::{CommandRecord, MemoryView, PhysAddr};

use crate::agents::AgentRegistry;
use crate::cancel::CancelToken;
use crate::config::ForwarderConfig;
use crate::control::ControlCommand;
use crate::correlate::Unpaired;
use crate::error::CaptureError;
use crate::extract::{AddressSource, ParameterExtractor};
use crate::gate::{Acquire, ExecutionGate, GateMode};
use crate::render::RecordRenderer;
use crate::ring::{Committed, RingBuffer};
use crate::stream::RecordReader;

/// Why a captured command was not made visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Every slot still holds unconsumed data.
    RingFull,
    /// The response's event number differs from the most recent slot.
    EventMismatch,
    /// No plain request precedes the agent command in the ring.
    OriginNotFound,
}

/// Result of [`SmcForwarder::write_out`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Capture is off; nothing was recorded.
    Disabled,
    /// Recorded in a new slot.
    Appended(usize),
    /// A response replaced the payload of its still-pending request slot.
    Folded(usize),
    /// Discarded; the ring is unchanged.
    Dropped(DropReason),
}

impl WriteOutcome {
    /// Slot the record landed in, if any.
    pub fn slot(self) -> Option<usize> {
        match self {
            WriteOutcome::Appended(slot) | WriteOutcome::Folded(slot) => Some(slot),
            WriteOutcome::Disabled | WriteOutcome::Dropped(_) => None,
        }
    }
}

/// Capture counters and ring occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Ring slots.
    pub capacity: usize,
    /// Slots waiting for the consumer.
    pub occupancy: usize,
    /// Records appended as new slots.
    pub appended: u64,
    /// Responses folded into their request slot.
    pub folded: u64,
    /// Records refused by a full ring.
    pub dropped_full: u64,
    /// Responses dropped on event number mismatch.
    pub mismatched: u64,
    /// Agent commands dropped without an originating request.
    pub origin_not_found: u64,
    /// Writes failed while copying parameters.
    pub alloc_failures: u64,
    /// Records skipped by the reader for exceeding the staging limit.
    pub oversized: u64,
}

struct Shared {
    config: ForwarderConfig,
    ring: Arc<RingBuffer>,
    gate: ExecutionGate,
    capture: AtomicBool,
    agents: AgentRegistry,
    memory: Arc<dyn MemoryView>,
    mismatched: AtomicU64,
    origin_not_found: AtomicU64,
    alloc_failures: AtomicU64,
    oversized: Arc<AtomicU64>,
}

/// Capture-and-forward engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SmcForwarder {
    shared: Arc<Shared>,
}

impl SmcForwarder {
    /// Creates a forwarder resolving references through `memory`.
    pub fn new(config: ForwarderConfig, memory: Arc<dyn MemoryView>) -> Self {
        let poll = config.poll_interval();
        let shared = Shared {
            ring: Arc::new(RingBuffer::new(config.ring_capacity)),
            gate: ExecutionGate::new(config.initial_permits, poll),
            capture: AtomicBool::new(config.capture_enabled),
            agents: AgentRegistry::new(config.max_agents),
            memory,
            mismatched: AtomicU64::new(0),
            origin_not_found: AtomicU64::new(0),
            alloc_failures: AtomicU64::new(0),
            oversized: Arc::new(AtomicU64::new(0)),
            config,
        };
        Self { shared: Arc::new(shared) }
    }

    /// Active configuration.
    pub fn config(&self) -> &ForwarderConfig {
        &self.shared.config
    }

    /// Underlying ring.
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.shared.ring
    }

    /// Dispatch gate.
    pub fn gate(&self) -> &ExecutionGate {
        &self.shared.gate
    }

    /// Returns `true` once `smc_forward` (or the config) enabled capture.
    pub fn is_capturing(&self) -> bool {
        self.shared.capture.load(Ordering::Acquire)
    }

    /// Captures `cmd` as it crosses into (or, with `is_response`, back out of) the TEE.
    ///
    /// Only allocation failures are errors; correlation failures and a full ring are
    /// reported as [`WriteOutcome::Dropped`].
    pub fn write_out(
        &self,
        cmd: &CommandRecord,
        is_response: bool,
    ) -> Result<WriteOutcome, CaptureError> {
        if !self.is_capturing() {
            return Ok(WriteOutcome::Disabled);
        }
        let shared = &*self.shared;
        trace!("SMC_TIMESTAMP write_out start event_nr={:X}", cmd.event_nr);

        let origin = match shared.ring.resolve(cmd, is_response) {
            Ok(origin) => origin,
            Err(unpaired) => {
                warn!("dropping cmd_id={:X}: {unpaired}", cmd.cmd_id);
                let reason = match unpaired {
                    Unpaired::EventMismatch { .. } => {
                        shared.mismatched.fetch_add(1, Ordering::Relaxed);
                        DropReason::EventMismatch
                    }
                    Unpaired::OriginNotFound { .. } => {
                        shared.origin_not_found.fetch_add(1, Ordering::Relaxed);
                        DropReason::OriginNotFound
                    }
                };
                return Ok(WriteOutcome::Dropped(reason));
            }
        };

        let source = origin.map_or(AddressSource::Request, |origin| AddressSource::Origin(origin.context));
        let agents = if cmd.is_agent() { shared.agents.segments() } else { Vec::new() };
        let extraction = ParameterExtractor::new(&*shared.memory, shared.config.extract_limits())
            .extract(cmd, is_response, source, &agents)
            .inspect_err(|err| {
                shared.alloc_failures.fetch_add(1, Ordering::Relaxed);
                warn!("capture of cmd_id={:X} failed: {err}", cmd.cmd_id);
            })?;

        let committed =
            shared.ring.commit(*cmd, extraction.context, extraction.payload, origin.as_ref());
        trace!("SMC_TIMESTAMP write_out end event_nr={:X}", cmd.event_nr);
        Ok(match committed {
            Ok(Committed::Appended(slot)) => WriteOutcome::Appended(slot),
            Ok(Committed::Folded(slot)) => {
                debug!("response event_nr={:X} folded into slot {slot}", cmd.event_nr);
                WriteOutcome::Folded(slot)
            }
            Err(full) => {
                warn!("dropping cmd_id={:X}: {full}", cmd.cmd_id);
                WriteOutcome::Dropped(DropReason::RingFull)
            }
        })
    }

    /// Consulted before each SMC dispatch; waits while the gate is blocked.
    pub fn read_in(&self, cancel: &CancelToken) -> Acquire {
        self.shared.gate.acquire(cancel)
    }

    /// Applies a control write and returns the number of bytes consumed.
    ///
    /// Unrecognised input changes nothing and is reported as fully consumed.
    pub fn control(&self, input: &[u8]) -> usize {
        match ControlCommand::parse(input) {
            Some(cmd) => self.apply(cmd),
            None => debug!("ignoring control input of {} bytes", input.len()),
        }
        ControlCommand::consumed(input)
    }

    /// Applies one parsed control command.
    pub fn apply(&self, cmd: ControlCommand) {
        let gate = &self.shared.gate;
        match cmd {
            ControlCommand::AddPermit => {
                gate.add_permit();
            }
            ControlCommand::Off => gate.block(),
            ControlCommand::On => gate.unrestrict(),
            ControlCommand::Forward => {
                self.shared.capture.store(true, Ordering::Release);
                info!("capture enabled");
            }
        }
    }

    /// Current gate mode.
    pub fn gate_mode(&self) -> GateMode {
        self.shared.gate.mode()
    }

    /// Registers an agent shared-memory segment to snapshot on agent callbacks.
    pub fn register_agent_segment(&self, addr: PhysAddr) -> Result<usize, CaptureError> {
        self.shared.agents.register(addr)
    }

    /// Registered agent segments.
    pub fn agent_segments(&self) -> Vec<PhysAddr> {
        self.shared.agents.segments()
    }

    /// Creates the consumer-side reader. Only one reader should drain the ring at a time.
    pub fn reader(&self, cancel: CancelToken) -> RecordReader {
        let config = &self.shared.config;
        RecordReader::new(
            Arc::clone(&self.shared.ring),
            RecordRenderer::new(config.staging_limit),
            cancel,
            config.poll_interval(),
        )
        .with_oversize_counter(Arc::clone(&self.shared.oversized))
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ForwarderStats {
        let shared = &*self.shared;
        let ring = shared.ring.stats();
        ForwarderStats {
            capacity: ring.capacity,
            occupancy: ring.occupancy,
            appended: ring.appended,
            folded: ring.folded,
            dropped_full: ring.dropped_full,
            mismatched: shared.mismatched.load(Ordering::Relaxed),
            origin_not_found: shared.origin_not_found.load(Ordering::Relaxed),
            alloc_failures: shared.alloc_failures.load(Ordering::Relaxed),
            oversized: shared.oversized.load(Ordering::Relaxed),
        }
    }
}

impl core::fmt::Debug for SmcForwarder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmcForwarder")
            .field("capturing", &self.is_capturing())
            .field("gate", &self.gate_mode())
            .field("stats", &self.stats())
            .finish()
    }
}
