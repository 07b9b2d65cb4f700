// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Execution gate deciding whether an SMC may be dispatched to the secure world.
//!
//! The gate holds a signed permit count: negative means unrestricted, zero blocks
//! dispatch, a positive count admits that many dispatches.

use std::time::Duration;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;

/// Permit count of an unrestricted gate.
pub const UNRESTRICTED: i64 = -1;

/// Gate state derived from the permit count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateMode {
    /// Every dispatch proceeds immediately.
    Unrestricted,
    /// Dispatch waits until permits are granted or the gate is reopened.
    Blocked,
    /// The given number of dispatches proceed before the gate blocks.
    Permits(u64),
}

impl GateMode {
    fn from_count(count: i64) -> Self {
        match count {
            c if c < 0 => GateMode::Unrestricted,
            0 => GateMode::Blocked,
            c => GateMode::Permits(c.unsigned_abs()),
        }
    }
}

/// Result of [`ExecutionGate::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// The SMC may be dispatched.
    Proceed,
    /// Cancellation was observed while the gate was blocked.
    Cancelled,
}

/// Permit counter shared by dispatching threads and the control channel.
pub struct ExecutionGate {
    permits: Mutex<i64>,
    changed: Condvar,
    poll: Duration,
}

impl ExecutionGate {
    /// Creates a gate with `initial` permits, re-checking cancellation every `poll`.
    pub fn new(initial: i64, poll: Duration) -> Self {
        Self { permits: Mutex::new(initial), changed: Condvar::new(), poll }
    }

    /// Waits until dispatch is allowed, consuming one permit when the gate is counting.
    pub fn acquire(&self, cancel: &CancelToken) -> Acquire {
        let mut permits = self.permits.lock();
        loop {
            if *permits < 0 {
                return Acquire::Proceed;
            }
            if *permits > 0 {
                *permits -= 1;
                debug!("gate permit taken, {} left", *permits);
                return Acquire::Proceed;
            }
            if cancel.is_cancelled() {
                return Acquire::Cancelled;
            }
            self.changed.wait_for(&mut permits, self.poll);
        }
    }

    /// Adds one permit (`smc_add`). Applied to the raw count, so an unrestricted gate
    /// (`-1`) becomes blocked.
    pub fn add_permit(&self) -> i64 {
        let now = {
            let mut permits = self.permits.lock();
            *permits = permits.saturating_add(1);
            *permits
        };
        info!("gate permit added, now {now}");
        self.changed.notify_all();
        now
    }

    /// Blocks dispatch (`smc_off`).
    pub fn block(&self) {
        *self.permits.lock() = 0;
        info!("gate off, dispatch blocked");
    }

    /// Lifts all restrictions (`smc_on`).
    pub fn unrestrict(&self) {
        *self.permits.lock() = UNRESTRICTED;
        info!("gate on, dispatch unrestricted");
        self.changed.notify_all();
    }

    /// Current raw permit count.
    pub fn permits(&self) -> i64 {
        *self.permits.lock()
    }

    /// Current mode.
    pub fn mode(&self) -> GateMode {
        GateMode::from_count(self.permits())
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new(UNRESTRICTED, Duration::from_millis(50))
    }
}
