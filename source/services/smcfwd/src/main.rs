// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
#![forbid(unsafe_code)]

//! CONTEXT: smcfwd daemon entrypoint – control tokens on stdin, record stream on stdout
//!
//! The binary owns no SMC path of its own. Commands reach the ring through
//! `SmcForwarder::write_out`, called in-process by the embedding driver on a clone of the
//! forwarder; standalone, the daemon only applies control tokens and streams what it is given.
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE: Host tests in `source/services/smcfwd/tests/`
//!

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use smc_abi::HostMemory;
use smcfwd::{CancelToken, ForwarderConfig, ReadyNotifier, SmcForwarder};

fn main() -> ExitCode {
    env_logger::init();
    let config = match ForwarderConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("smcfwd: {err}");
            return ExitCode::FAILURE;
        }
    };
    let forwarder = SmcForwarder::new(config, Arc::new(HostMemory::new()));
    let control = io::BufReader::new(io::stdin());
    let ready = ReadyNotifier::new(|| log::debug!("smcfwd: ready"));
    match smcfwd::service_main_loop(forwarder, control, io::stdout().lock(), ready, CancelToken::new()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("smcfwd: {err}");
            ExitCode::FAILURE
        }
    }
}
