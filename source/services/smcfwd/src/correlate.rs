// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Pairs responses and agent callbacks with the request slot that produced them.
//!
//! INVARIANTS:
//! - Pairing uses ring adjacency plus `event_nr` equality only; there is no transaction id,
//!   so interleaved producers can mis-pair or fail to pair
//! - A backward scan visits each slot at most once and stops at the write cursor
//! - Unwritten slots never pair

use smc_abi::CommandRecord;
use thiserror::Error;

/// How an incoming command relates to the ring contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pairing {
    /// Plain request; addresses come from the command itself.
    Request,
    /// Plain response paired with the slot written just before it.
    Direct(usize),
    /// Agent callback (or response to one) paired with the nearest preceding plain slot.
    Scanned(usize),
}

impl Pairing {
    pub(crate) fn origin(self) -> Option<usize> {
        match self {
            Pairing::Request => None,
            Pairing::Direct(index) | Pairing::Scanned(index) => Some(index),
        }
    }
}

/// Why a command could not be paired. Both cases drop the command without touching the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Unpaired {
    /// The most recently written slot carries a different event number (or none at all).
    #[error("event number mismatch: response {incoming:#x}, last slot {found:?}")]
    EventMismatch {
        /// Event number of the incoming response.
        incoming: u32,
        /// Event number of the most recently written slot, if any.
        found: Option<u32>,
    },
    /// The backward scan wrapped around without finding a plain request.
    #[error("no originating request found for agent {agent_id:#x}")]
    OriginNotFound {
        /// Agent id of the command being paired.
        agent_id: u32,
    },
}

/// Resolves the originating slot for `incoming`.
///
/// `record_at(i)` yields the record stored in slot `i`, or `None` if the slot was never
/// written. `write` is the slot the incoming command would be written to.
pub(crate) fn resolve<'a>(
    capacity: usize,
    write: usize,
    record_at: impl Fn(usize) -> Option<&'a CommandRecord>,
    incoming: &CommandRecord,
    is_response: bool,
) -> Result<Pairing, Unpaired> {
    debug_assert!(capacity > 0 && write < capacity);
    let mut candidate = write;
    let mut candidate_agent = incoming.agent_id;

    if is_response && incoming.agent_id == 0 {
        let prev = step_back(write, capacity);
        let found = record_at(prev).map(|rec| rec.event_nr);
        if found != Some(incoming.event_nr) {
            return Err(Unpaired::EventMismatch { incoming: incoming.event_nr, found });
        }
        candidate = prev;
        candidate_agent = record_at(prev).map_or(0, |rec| rec.agent_id);
        if candidate_agent == 0 {
            return Ok(Pairing::Direct(prev));
        }
    }

    if candidate_agent == 0 {
        return Ok(Pairing::Request);
    }

    let mut index = candidate;
    loop {
        index = step_back(index, capacity);
        if index == write {
            return Err(Unpaired::OriginNotFound { agent_id: candidate_agent });
        }
        match record_at(index) {
            Some(rec) if rec.agent_id == 0 => return Ok(Pairing::Scanned(index)),
            Some(_) => continue,
            None => return Err(Unpaired::OriginNotFound { agent_id: candidate_agent }),
        }
    }
}

#[inline]
fn step_back(index: usize, capacity: usize) -> usize {
    (index + capacity - 1) % capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(event_nr: u32, agent_id: u32) -> CommandRecord {
        CommandRecord { event_nr, agent_id, ..Default::default() }
    }

    fn run(
        slots: &[Option<CommandRecord>],
        write: usize,
        incoming: CommandRecord,
        is_response: bool,
    ) -> Result<Pairing, Unpaired> {
        resolve(slots.len(), write, |i| slots[i].as_ref(), &incoming, is_response)
    }

    #[test]
    fn plain_request_needs_no_origin() {
        let slots = [None, None, None, None];
        assert_eq!(run(&slots, 0, rec(1, 0), false), Ok(Pairing::Request));
    }

    #[test]
    fn response_pairs_with_previous_slot() {
        let slots = [Some(rec(1, 0)), None, None, None];
        assert_eq!(run(&slots, 1, rec(1, 0), true), Ok(Pairing::Direct(0)));
    }

    #[test]
    fn response_wraps_to_last_slot() {
        let slots = [Some(rec(9, 0)), Some(rec(2, 0)), Some(rec(3, 0)), Some(rec(4, 0))];
        assert_eq!(run(&slots, 0, rec(4, 0), true), Ok(Pairing::Direct(3)));
    }

    #[test]
    fn response_with_other_event_is_rejected() {
        let slots = [Some(rec(1, 0)), None, None, None];
        assert_eq!(
            run(&slots, 1, rec(2, 0), true),
            Err(Unpaired::EventMismatch { incoming: 2, found: Some(1) })
        );
    }

    #[test]
    fn response_on_empty_ring_is_rejected() {
        let slots = [None, None, None, None];
        assert_eq!(
            run(&slots, 0, rec(1, 0), true),
            Err(Unpaired::EventMismatch { incoming: 1, found: None })
        );
    }

    #[test]
    fn agent_callback_scans_back_to_plain_request() {
        let slots = [Some(rec(5, 0)), Some(rec(6, 0x41)), Some(rec(7, 0x41)), None];
        assert_eq!(run(&slots, 3, rec(8, 0x41), false), Ok(Pairing::Scanned(0)));
    }

    #[test]
    fn response_to_agent_slot_scans_further() {
        let slots = [Some(rec(5, 0)), Some(rec(6, 0x41)), None, None];
        assert_eq!(run(&slots, 2, rec(6, 0), true), Ok(Pairing::Scanned(0)));
    }

    #[test]
    fn agent_scan_is_bounded_to_one_traversal() {
        let slots = [Some(rec(1, 7)), Some(rec(2, 7)), Some(rec(3, 7)), Some(rec(4, 7))];
        assert_eq!(run(&slots, 2, rec(5, 7), false), Err(Unpaired::OriginNotFound { agent_id: 7 }));
    }

    #[test]
    fn agent_scan_stops_at_unwritten_slot() {
        let slots = [Some(rec(1, 7)), None, None, None];
        assert_eq!(run(&slots, 1, rec(5, 7), false), Err(Unpaired::OriginNotFound { agent_id: 7 }));
    }
}
