// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: smcfwd – capture-and-forward engine for SMC command records crossing into the TEE
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE:
//!   - Integration tests: `source/services/smcfwd/tests/` (ring/correlation, extraction,
//!     rendering/streaming, control/gate, config, parser)
//!   - E2E tests: `tests/smcfwd_e2e/tests/` (concurrent producers, blocked dispatch, drain)
//!
//! PUBLIC API:
//!   - `forwarder`: `SmcForwarder` write path (`write_out`), dispatch gate (`read_in`), control
//!   - `ring`: bounded command ring with a single consumer cursor
//!   - `stream`: offset-addressed record reader over the ring
//!   - `render` / `parse`: text protocol producer and consumer
//!   - `service_main_loop()`: host daemon loop
//!

pub mod agents;
pub mod cancel;
pub mod config;
pub mod control;
mod correlate;
pub mod error;
pub mod extract;
pub mod forwarder;
pub mod gate;
pub mod parse;
pub mod payload;
pub mod render;
pub mod ring;
pub mod stream;

mod std_server;
pub use std_server::*;

pub use cancel::CancelToken;
pub use config::ForwarderConfig;
pub use error::{CaptureError, StreamError};
pub use forwarder::{DropReason, ForwarderStats, SmcForwarder, WriteOutcome};
