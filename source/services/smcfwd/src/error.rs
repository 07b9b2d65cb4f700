// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Error types for the write path (capture) and the read path (streaming).
//!
//! Both map onto `std::io::ErrorKind` so a pseudo-file style front end can hand them
//! to its caller unchanged.

use std::io;

use thiserror::Error;

/// Failures of the capture (write) path. The affected record never becomes visible.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// A heap copy of a referenced buffer could not be made.
    #[error("out of memory copying {size:#x} bytes for {what}")]
    OutOfMemory {
        /// What was being copied.
        what: CopyTarget,
        /// Requested buffer size.
        size: usize,
    },
    /// The agent segment table already holds the maximum number of segments.
    #[error("agent segment table full ({max} segments)")]
    AgentTableFull {
        /// Configured table size.
        max: usize,
    },
}

/// Buffer kind named in [`CaptureError::OutOfMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyTarget {
    /// Memory-reference parameter `index`.
    Param(usize),
    /// Agent segment snapshot `index`.
    AgentSegment(usize),
}

impl core::fmt::Display for CopyTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CopyTarget::Param(i) => write!(f, "param {i}"),
            CopyTarget::AgentSegment(i) => write!(f, "agent segment {i}"),
        }
    }
}

impl From<CaptureError> for io::Error {
    fn from(err: CaptureError) -> Self {
        let kind = match err {
            CaptureError::OutOfMemory { .. } => io::ErrorKind::OutOfMemory,
            CaptureError::AgentTableFull { .. } => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}

/// Failures of the read path. Only the offending record is lost.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The rendered record does not fit into the staging buffer.
    #[error("record in slot {slot} exceeds staging limit of {limit:#x} bytes")]
    RecordTooLarge {
        /// Ring slot that was skipped.
        slot: usize,
        /// Staging ceiling in bytes.
        limit: usize,
    },
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}
