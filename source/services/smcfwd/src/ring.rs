// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Bounded command ring with a single logical consumer cursor
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE: Tests in `source/services/smcfwd/tests/ring_correlation.rs`
//!   - FIFO drain, refuse-when-full with drop counter, release on consume
//!   - Response folding into pending request slots, mismatch leaves ring untouched
//!
//! INVARIANTS:
//! - Slot `i` holds unconsumed data iff it lies in `[read, read + len)` mod capacity
//! - A full ring refuses appends; unread slots are never overwritten
//! - No allocation or deallocation of payload buffers happens while the lock is held
//! - Records and their address context outlive consumption so late responses can pair
//! - A request slot absorbs at most one response

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use smc_abi::CommandRecord;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::correlate::{self, Pairing, Unpaired};
use crate::payload::{AddressContext, CapturedPayload};

/// Default number of slots.
pub const DEFAULT_CAPACITY: usize = 256;

/// Returned by appends on a full ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("command ring full")]
pub struct Full;

/// Unconsumed slot handed to the consumer.
#[derive(Clone, Debug)]
pub struct PendingRecord {
    /// Ring slot index.
    pub index: usize,
    /// Captured command header.
    pub record: CommandRecord,
    /// Captured payload; shared with the slot until it is consumed.
    pub payload: Arc<CapturedPayload>,
}

/// Ring counters snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Slot count.
    pub capacity: usize,
    /// Unconsumed slots.
    pub occupancy: usize,
    /// Records made visible through new slots.
    pub appended: u64,
    /// Responses folded into a pending request slot.
    pub folded: u64,
    /// Records refused because the ring was full.
    pub dropped_full: u64,
}

/// Originating slot resolved for a response or callback.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Origin {
    pub index: usize,
    pub seq: u64,
    pub context: AddressContext,
    pub foldable: bool,
}

/// Where a committed record ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Committed {
    Appended(usize),
    Folded(usize),
}

struct Slot {
    record: CommandRecord,
    context: AddressContext,
    payload: Option<Arc<CapturedPayload>>,
    seq: u64,
    // A response already replaced the request payload; later responses get their own slot.
    folded: bool,
}

struct RingState {
    slots: Vec<Option<Slot>>,
    write: usize,
    read: usize,
    len: usize,
    // Slot at `read` is being streamed and must not change underneath the consumer.
    claimed: bool,
    next_seq: u64,
    appended: u64,
    folded: u64,
    dropped_full: u64,
}

impl RingState {
    fn is_pending(&self, index: usize) -> bool {
        let capacity = self.slots.len();
        (index + capacity - self.read) % capacity < self.len
    }

    fn pending(&self) -> Option<PendingRecord> {
        if self.len == 0 {
            return None;
        }
        let slot = self.slots[self.read].as_ref()?;
        Some(PendingRecord {
            index: self.read,
            record: slot.record,
            payload: Arc::clone(slot.payload.as_ref()?),
        })
    }
}

/// Fixed-capacity circular log of captured commands.
pub struct RingBuffer {
    state: Mutex<RingState>,
    not_empty: Condvar,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a ring with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            state: Mutex::new(RingState {
                slots,
                write: 0,
                read: 0,
                len: 0,
                claimed: false,
                next_seq: 0,
                appended: 0,
                folded: 0,
                dropped_full: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of unconsumed slots.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Returns `true` when nothing is waiting for the consumer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a record as a new slot.
    ///
    /// `context` is the addressing later responses inherit from this slot.
    pub fn append(
        &self,
        record: CommandRecord,
        context: AddressContext,
        payload: CapturedPayload,
    ) -> Result<usize, Full> {
        match self.commit(record, context, payload, None)? {
            Committed::Appended(index) | Committed::Folded(index) => Ok(index),
        }
    }

    /// Returns the oldest unconsumed slot without consuming it.
    pub fn peek_next(&self) -> Option<PendingRecord> {
        self.state.lock().pending()
    }

    /// Releases the oldest unconsumed slot's owned buffers and advances the read cursor.
    ///
    /// Returns `false` when the ring was empty.
    pub fn advance_read(&self) -> bool {
        let released = {
            let mut state = self.state.lock();
            if state.len == 0 {
                return false;
            }
            let read = state.read;
            let released = state.slots[read].as_mut().and_then(|slot| slot.payload.take());
            state.read = (read + 1) % self.capacity;
            state.len -= 1;
            state.claimed = false;
            released
        };
        drop(released);
        true
    }

    /// Waits until a slot is pending, polling `cancel` every `poll`.
    ///
    /// Returns `false` if cancellation was observed while the ring was empty.
    pub fn wait_pending(&self, cancel: &CancelToken, poll: Duration) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.len > 0 {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            self.not_empty.wait_for(&mut state, poll);
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RingStats {
        let state = self.state.lock();
        RingStats {
            capacity: self.capacity,
            occupancy: state.len,
            appended: state.appended,
            folded: state.folded,
            dropped_full: state.dropped_full,
        }
    }

    /// Like [`RingBuffer::peek_next`], but pins the slot so responses no longer fold into it.
    pub(crate) fn claim_next(&self) -> Option<PendingRecord> {
        let mut state = self.state.lock();
        let pending = state.pending()?;
        state.claimed = true;
        Some(pending)
    }

    /// Resolves the originating slot for `incoming` against the current ring contents.
    pub(crate) fn resolve(
        &self,
        incoming: &CommandRecord,
        is_response: bool,
    ) -> Result<Option<Origin>, Unpaired> {
        let state = self.state.lock();
        let pairing = correlate::resolve(
            self.capacity,
            state.write,
            |i| state.slots[i].as_ref().map(|slot| &slot.record),
            incoming,
            is_response,
        )?;
        let Some(index) = pairing.origin() else {
            return Ok(None);
        };
        let Some(slot) = state.slots[index].as_ref() else {
            return Err(Unpaired::OriginNotFound { agent_id: incoming.agent_id });
        };
        let foldable = matches!(pairing, Pairing::Direct(_))
            && state.is_pending(index)
            && !(state.claimed && index == state.read)
            && !slot.folded
            && slot.payload.as_ref().is_some_and(|payload| !payload.is_response);
        Ok(Some(Origin { index, seq: slot.seq, context: slot.context, foldable }))
    }

    /// Makes a fully built record visible, folding it into `fold_into` when that slot is
    /// still pending and unclaimed, otherwise appending it as a new slot.
    pub(crate) fn commit(
        &self,
        record: CommandRecord,
        context: AddressContext,
        payload: CapturedPayload,
        fold_into: Option<&Origin>,
    ) -> Result<Committed, Full> {
        let mut payload = Arc::new(payload);
        let (outcome, released) = {
            let mut state = self.state.lock();
            let fold_target = fold_into.filter(|origin| {
                origin.foldable
                    && state.is_pending(origin.index)
                    && !(state.claimed && origin.index == state.read)
                    && state.slots[origin.index]
                        .as_ref()
                        .is_some_and(|slot| slot.seq == origin.seq && !slot.folded)
            });
            if let Some(origin) = fold_target {
                // The slot keeps the request header, so it is reported as a request.
                if let Some(inner) = Arc::get_mut(&mut payload) {
                    inner.is_response = false;
                }
                let released = state.slots[origin.index].as_mut().and_then(|slot| {
                    slot.folded = true;
                    slot.payload.replace(payload)
                });
                state.folded += 1;
                (Ok(Committed::Folded(origin.index)), released)
            } else if state.len == self.capacity {
                state.dropped_full += 1;
                (Err(Full), Some(payload))
            } else {
                let index = state.write;
                let seq = state.next_seq;
                state.next_seq += 1;
                let previous = state.slots[index].replace(Slot {
                    record,
                    context,
                    payload: Some(payload),
                    seq,
                    folded: false,
                });
                state.write = (index + 1) % self.capacity;
                state.len += 1;
                state.appended += 1;
                self.not_empty.notify_all();
                (Ok(Committed::Appended(index)), previous.and_then(|slot| slot.payload))
            }
        };
        drop(released);
        outcome
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
