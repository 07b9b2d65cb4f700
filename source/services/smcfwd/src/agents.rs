// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Registry of externally allocated agent shared-memory segments.
//!
//! The segments are owned by the TEE driver; only their base addresses are kept here and
//! their contents are only ever read.

use log::info;
use parking_lot::RwLock;
use smc_abi::PhysAddr;

use crate::error::CaptureError;

/// Maximum number of agent segments the driver registers.
pub const MAX_AGENT_SEGMENTS: usize = 5;

/// Base addresses of the registered agent segments, in registration order.
pub struct AgentRegistry {
    segments: RwLock<Vec<PhysAddr>>,
    max: usize,
}

impl AgentRegistry {
    /// Creates a registry holding at most `max` segments (clamped to [`MAX_AGENT_SEGMENTS`]).
    pub fn new(max: usize) -> Self {
        let max = max.min(MAX_AGENT_SEGMENTS);
        Self { segments: RwLock::new(Vec::with_capacity(max)), max }
    }

    /// Registers one segment base address and returns its index.
    pub fn register(&self, addr: PhysAddr) -> Result<usize, CaptureError> {
        let mut segments = self.segments.write();
        if segments.len() >= self.max {
            return Err(CaptureError::AgentTableFull { max: self.max });
        }
        segments.push(addr);
        info!("SHMAGENT set {:X}", addr);
        Ok(segments.len() - 1)
    }

    /// Copy of the registered addresses.
    pub fn segments(&self) -> Vec<PhysAddr> {
        self.segments.read().clone()
    }

    /// Number of registered segments.
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// Returns `true` if nothing was registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(MAX_AGENT_SEGMENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_registration_past_capacity() {
        let registry = AgentRegistry::new(2);
        assert_eq!(registry.register(PhysAddr(0x1000)), Ok(0));
        assert_eq!(registry.register(PhysAddr(0x2000)), Ok(1));
        assert_eq!(
            registry.register(PhysAddr(0x3000)),
            Err(CaptureError::AgentTableFull { max: 2 })
        );
        assert_eq!(registry.segments(), vec![PhysAddr(0x1000), PhysAddr(0x2000)]);
    }

    #[test]
    fn capacity_is_clamped() {
        let registry = AgentRegistry::new(64);
        for i in 0..MAX_AGENT_SEGMENTS {
            registry.register(PhysAddr(0x1000 * (i as u32 + 1))).unwrap();
        }
        assert!(registry.register(PhysAddr(0xF000)).is_err());
    }
}
