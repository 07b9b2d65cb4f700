// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Offset-addressed reader streaming rendered records off the ring
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE: Tests in `source/services/smcfwd/tests/render_stream.rs`
//!
//! INVARIANTS:
//! - A record is rendered once, then handed out across as many reads as the caller needs
//! - The read cursor advances exactly when the last byte of a record is returned, or when
//!   the record could not be rendered
//! - An empty ring blocks the reader in bounded polls; cancellation returns 0 bytes

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::cancel::CancelToken;
use crate::error::StreamError;
use crate::render::RecordRenderer;
use crate::ring::RingBuffer;

/// Default wait granularity while the ring is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// Staging capacity kept between records; larger buffers are released.
const RETAINED_STAGING: usize = 64 * 1024;

/// Single consumer of a [`RingBuffer`], producing the text protocol.
pub struct RecordReader {
    ring: Arc<RingBuffer>,
    renderer: RecordRenderer,
    staged: Vec<u8>,
    offset: usize,
    has_record: bool,
    cancel: CancelToken,
    poll: Duration,
    oversized: Option<Arc<AtomicU64>>,
}

impl RecordReader {
    /// Creates a reader draining `ring`.
    pub fn new(
        ring: Arc<RingBuffer>,
        renderer: RecordRenderer,
        cancel: CancelToken,
        poll: Duration,
    ) -> Self {
        Self {
            ring,
            renderer,
            staged: Vec::new(),
            offset: 0,
            has_record: false,
            cancel,
            poll,
            oversized: None,
        }
    }

    pub(crate) fn with_oversize_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.oversized = Some(counter);
        self
    }

    /// Byte offset into the record currently being streamed (0 between records).
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Copies the next bytes of the current record into `buf`.
    ///
    /// Waits for a record when none is staged. Returns `Ok(0)` when `buf` is empty or the
    /// wait was cancelled. Never spans two records in one call.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if buf.is_empty() || !self.stage()? {
            return Ok(0);
        }
        let remaining = &self.staged[self.offset..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.offset += len;
        if self.offset == self.staged.len() {
            self.finish_record();
        }
        Ok(len)
    }

    /// Returns the rest of the current record (all of the next one when none is staged).
    ///
    /// `Ok(None)` means the wait was cancelled.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if !self.stage()? {
            return Ok(None);
        }
        let rest = self.staged[self.offset..].to_vec();
        self.finish_record();
        Ok(Some(rest))
    }

    /// Ensures a record is staged. Returns `false` on cancellation.
    fn stage(&mut self) -> Result<bool, StreamError> {
        if self.has_record {
            return Ok(true);
        }
        if !self.ring.wait_pending(&self.cancel, self.poll) {
            return Ok(false);
        }
        let Some(pending) = self.ring.claim_next() else {
            return Ok(false);
        };
        let rendered =
            self.renderer.render_into(pending.index, &pending.record, &pending.payload, &mut self.staged);
        drop(pending);
        match rendered {
            Ok(()) => {
                self.offset = 0;
                self.has_record = true;
                Ok(true)
            }
            Err(err) => {
                warn!("dropping slot: {err}");
                self.staged.clear();
                self.ring.advance_read();
                if let Some(counter) = &self.oversized {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Err(err)
            }
        }
    }

    fn finish_record(&mut self) {
        self.ring.advance_read();
        self.has_record = false;
        self.offset = 0;
        self.staged.clear();
        if self.staged.capacity() > RETAINED_STAGING {
            self.staged = Vec::new();
        }
    }
}

impl io::Read for RecordReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        RecordReader::read(self, buf).map_err(io::Error::from)
    }
}
