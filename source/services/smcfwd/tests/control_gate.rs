// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host tests for control tokens and the execution gate
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 integration tests (1 property test)

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use proptest::prelude::*;
use smc_abi::HostMemory;
use smcfwd::control::ControlCommand;
use smcfwd::gate::{Acquire, GateMode};
use smcfwd::{CancelToken, ForwarderConfig, SmcForwarder};

fn forwarder(initial_permits: i64) -> SmcForwarder {
    let config = ForwarderConfig { initial_permits, poll_interval_ms: 5, ..Default::default() };
    SmcForwarder::new(config, Arc::new(HostMemory::new()))
}

fn acquire_in_thread(fwd: &SmcForwarder, cancel: &CancelToken) -> crossbeam_channel::Receiver<Acquire> {
    let (tx, rx) = bounded(1);
    let fwd = fwd.clone();
    let cancel = cancel.clone();
    thread::spawn(move || {
        let _ = tx.send(fwd.read_in(&cancel));
    });
    rx
}

#[test]
fn permits_are_consumed_then_dispatch_blocks_until_added() {
    let fwd = forwarder(3);
    let cancel = CancelToken::new();
    for _ in 0..3 {
        assert_eq!(fwd.read_in(&cancel), Acquire::Proceed);
    }
    assert_eq!(fwd.gate_mode(), GateMode::Blocked);

    let fourth = acquire_in_thread(&fwd, &cancel);
    assert_eq!(fourth.recv_timeout(Duration::from_millis(100)), Err(RecvTimeoutError::Timeout));

    assert_eq!(fwd.control(b"smc_add"), 7);
    assert_eq!(fourth.recv_timeout(Duration::from_secs(5)), Ok(Acquire::Proceed));
    assert_eq!(fwd.gate().permits(), 0);
}

#[test]
fn smc_on_releases_blocked_dispatch() {
    let fwd = forwarder(-1);
    let cancel = CancelToken::new();
    fwd.control(b"smc_off\n");
    let waiting = acquire_in_thread(&fwd, &cancel);
    assert_eq!(waiting.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Timeout));
    fwd.control(b"smc_on\n");
    assert_eq!(waiting.recv_timeout(Duration::from_secs(5)), Ok(Acquire::Proceed));
    assert_eq!(fwd.gate_mode(), GateMode::Unrestricted);
}

#[test]
fn cancellation_interrupts_blocked_dispatch() {
    let fwd = forwarder(0);
    let cancel = CancelToken::new();
    let waiting = acquire_in_thread(&fwd, &cancel);
    assert_eq!(waiting.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Timeout));
    cancel.cancel();
    assert_eq!(waiting.recv_timeout(Duration::from_secs(5)), Ok(Acquire::Cancelled));
    assert_eq!(fwd.gate().permits(), 0);
}

#[test]
fn smc_forward_enables_capture() {
    let fwd = forwarder(-1);
    assert!(!fwd.is_capturing());
    assert_eq!(fwd.control(b"smc_forward"), 11);
    assert!(fwd.is_capturing());
    // Capture is never switched off again by control input.
    fwd.control(b"smc_off");
    assert!(fwd.is_capturing());
}

#[test]
fn add_on_unrestricted_gate_counts_from_minus_one() {
    let fwd = forwarder(-1);
    fwd.control(b"smc_add");
    assert_eq!(fwd.gate_mode(), GateMode::Blocked);
    fwd.control(b"smc_add");
    assert_eq!(fwd.gate_mode(), GateMode::Permits(1));
}

proptest! {
    #[test]
    fn unknown_tokens_change_nothing(input in proptest::collection::vec(any::<u8>(), 0..32), permits in -1i64..4) {
        prop_assume!(ControlCommand::parse(&input).is_none());
        let fwd = forwarder(permits);
        for _ in 0..3 {
            prop_assert_eq!(fwd.control(&input), input.len());
            prop_assert_eq!(fwd.gate().permits(), permits);
            prop_assert!(!fwd.is_capturing());
        }
    }
}
