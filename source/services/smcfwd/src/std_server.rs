// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: smcfwd host backend (std) – control line input and record stream output
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: `tests/smcfwd_e2e/tests/` (service loop over in-memory pipes)

use std::io::{self, BufRead, Write};
use std::thread;

use log::{debug, info, warn};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::StreamError;
use crate::forwarder::SmcForwarder;

/// Result alias surfaced by the smcfwd host backend.
pub type ServerResult<T> = core::result::Result<T, ServerError>;

/// Bytes handed to the output per read, matching a page-sized pseudo-file read.
pub const READ_CHUNK: usize = 4096;

/// Ready notifier invoked once smcfwd finishes initialization.
pub struct ReadyNotifier(Box<dyn FnOnce() + Send>);

impl ReadyNotifier {
    /// Creates a notifier from the provided closure.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(func))
    }

    /// Signals readiness to the caller.
    pub fn notify(self) {
        (self.0)();
    }
}

/// Errors surfaced by the host backend.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The control listener thread could not be started.
    #[error("failed to spawn control thread: {0}")]
    Spawn(#[source] io::Error),
    /// Writing the record stream failed.
    #[error("record output failed: {0}")]
    Output(#[from] io::Error),
}

/// Runs the forwarder until `cancel` fires.
///
/// Each line read from `control` is applied as a control write. Records are streamed to
/// `output` in [`READ_CHUNK`] pieces and flushed at record boundaries. End of the control
/// input does not stop the loop.
///
/// Control input is read on the `smcfwd-control` thread. That thread exits when `control`
/// reaches end of file, fails, or yields a line after cancellation. On return the thread is
/// joined if it has already exited; a thread still blocked on input is detached, so callers
/// close the control input to reclaim it.
pub fn service_main_loop<C, W>(
    forwarder: SmcForwarder,
    control: C,
    mut output: W,
    notifier: ReadyNotifier,
    cancel: CancelToken,
) -> ServerResult<()>
where
    C: BufRead + Send + 'static,
    W: Write,
{
    let control_forwarder = forwarder.clone();
    let control_cancel = cancel.clone();
    let control_thread = thread::Builder::new()
        .name("smcfwd-control".into())
        .spawn(move || control_loop(control_forwarder, control, control_cancel))
        .map_err(ServerError::Spawn)?;

    let mut reader = forwarder.reader(cancel.clone());
    notifier.notify();
    info!("smcfwd ready, capacity {}", forwarder.config().ring_capacity);

    let mut chunk = [0u8; READ_CHUNK];
    while !cancel.is_cancelled() {
        match reader.read(&mut chunk) {
            Ok(0) => continue,
            Ok(len) => {
                output.write_all(&chunk[..len])?;
                if reader.offset() == 0 {
                    output.flush()?;
                }
            }
            Err(err @ StreamError::RecordTooLarge { .. }) => warn!("{err}"),
        }
    }
    output.flush()?;
    if control_thread.is_finished() {
        if control_thread.join().is_err() {
            warn!("control thread panicked");
        }
    } else {
        debug!("control thread blocked on input; detaching");
    }
    info!("smcfwd stopped: {:?}", forwarder.stats());
    Ok(())
}

fn control_loop<C: BufRead>(forwarder: SmcForwarder, mut control: C, cancel: CancelToken) {
    let mut line = String::new();
    while !cancel.is_cancelled() {
        line.clear();
        match control.read_line(&mut line) {
            Ok(0) => {
                debug!("control input closed");
                return;
            }
            Ok(_) if cancel.is_cancelled() => return,
            Ok(_) => {
                forwarder.control(line.trim_end_matches(['\r', '\n']).as_bytes());
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("control input failed: {err}");
                return;
            }
        }
    }
}
