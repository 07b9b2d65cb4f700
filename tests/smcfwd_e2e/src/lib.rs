//! CONTEXT: smcfwd end-to-end test harness library
//! INTENT: In-memory control and data pipes for driving the host service loop
//! DEPS: smcfwd (service integration), crossbeam-channel
//! READINESS: Host backend ready
//! TESTS: Concurrent producers, gated dispatch through the control pipe, cancellation
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use smcfwd::parse::{ParsedRecord, RecordParser};

/// Read half of an in-memory pipe; EOF once every [`PipeWriter`] is dropped.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

/// Write half of an in-memory pipe.
#[derive(Clone)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

/// Creates a connected pipe.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = unbounded();
    (PipeWriter { tx }, PipeReader { rx, pending: Vec::new(), pos: 0 })
}

impl PipeWriter {
    /// Sends one control line.
    pub fn send_line(&self, line: &str) {
        let _ = self.tx.send(format!("{line}\n").into_bytes());
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.send(buf.to_vec()).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let len = (self.pending.len() - self.pos).min(buf.len());
        buf[..len].copy_from_slice(&self.pending[self.pos..self.pos + len]);
        self.pos += len;
        Ok(len)
    }
}

impl PipeReader {
    /// Collects parsed records until `count` arrived or `timeout` elapsed.
    pub fn records(&mut self, parser: &mut RecordParser, count: usize, timeout: Duration) -> Vec<ParsedRecord> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while out.len() < count {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else { break };
            match self.rx.recv_timeout(left) {
                Ok(chunk) => out.extend(parser.feed(&chunk).unwrap_or_default()),
                Err(_) => break,
            }
        }
        out
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
