//! CONTEXT: smcfwd end-to-end integration tests
//! INTENT: Concurrent capture, gated dispatch driven through the control pipe, shutdown
//! DEPS: smcfwd (service loop), smc-abi (host memory), crossbeam-channel
//! READINESS: Host backend ready
//! TESTS: Concurrent producers keep per-producer order; blocked dispatch proceeds per smc_add;
//!        cancellation stops the service loop with the control input still open
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::io::BufReader;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use smc_abi::{CommandRecord, HostMemory};
use smcfwd::gate::Acquire;
use smcfwd::parse::RecordParser;
use smcfwd::{service_main_loop, CancelToken, ForwarderConfig, ReadyNotifier, SmcForwarder, WriteOutcome};
use smcfwd_e2e::{pipe, wait_until};

const PRODUCERS: u32 = 4;
const PER_PRODUCER: u32 = 32;

fn forwarder(config: ForwarderConfig) -> SmcForwarder {
    SmcForwarder::new(ForwarderConfig { poll_interval_ms: 5, ..config }, Arc::new(HostMemory::new()))
}

#[test]
fn concurrent_producers_keep_their_own_order() {
    let fwd = forwarder(ForwarderConfig { capture_enabled: true, ..Default::default() });
    let cancel = CancelToken::new();

    let (done_tx, done_rx) = bounded(0);
    let consumer = {
        let mut reader = fwd.reader(cancel.clone());
        thread::spawn(move || {
            let mut parser = RecordParser::new();
            let mut records = Vec::new();
            while let Ok(Some(text)) = reader.read_record() {
                records.extend(parser.feed(&text).unwrap());
            }
            let _ = done_tx.send(records);
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let fwd = fwd.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let cmd = CommandRecord { cmd_id: (producer << 16) | seq, event_nr: seq, ..Default::default() };
                    assert!(matches!(fwd.write_out(&cmd, false), Ok(WriteOutcome::Appended(_))));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || fwd.ring().is_empty()));
    cancel.cancel();
    let records = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    consumer.join().unwrap();

    assert_eq!(records.len(), (PRODUCERS * PER_PRODUCER) as usize);
    for producer in 0..PRODUCERS {
        let seqs: Vec<u32> = records
            .iter()
            .filter(|r| r.header.cmd_id >> 16 == producer)
            .map(|r| r.header.cmd_id & 0xFFFF)
            .collect();
        assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
    assert_eq!(fwd.stats().appended, u64::from(PRODUCERS * PER_PRODUCER));
}

#[test]
fn service_loop_gates_dispatch_through_control_pipe() {
    let fwd = forwarder(ForwarderConfig::default());
    let cancel = CancelToken::new();
    let (control_tx, control_rx) = pipe();
    let (output_tx, mut output_rx) = pipe();
    let (ready_tx, ready_rx) = bounded(1);

    let service = {
        let fwd = fwd.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            let ready = ReadyNotifier::new(move || {
                let _ = ready_tx.send(());
            });
            service_main_loop(fwd, BufReader::new(control_rx), output_tx, ready, cancel)
        })
    };
    ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    control_tx.send_line("smc_forward");
    control_tx.send_line("smc_off");
    assert!(wait_until(Duration::from_secs(5), || fwd.is_capturing() && fwd.gate().permits() == 0));

    // Driver thread: every SMC waits for the gate, then is captured.
    let (dispatched_tx, dispatched_rx) = bounded(4);
    let driver = {
        let fwd = fwd.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            for cmd_id in 1..=2u32 {
                if fwd.read_in(&cancel) == Acquire::Cancelled {
                    return;
                }
                fwd.write_out(&CommandRecord { cmd_id, event_nr: cmd_id, ..Default::default() }, false)
                    .unwrap();
                let _ = dispatched_tx.send(cmd_id);
            }
        })
    };

    assert_eq!(dispatched_rx.recv_timeout(Duration::from_millis(100)), Err(RecvTimeoutError::Timeout));

    let mut parser = RecordParser::new();
    control_tx.send_line("smc_add");
    assert_eq!(dispatched_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    let first = output_rx.records(&mut parser, 1, Duration::from_secs(5));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].header.cmd_id, 1);

    assert_eq!(dispatched_rx.recv_timeout(Duration::from_millis(100)), Err(RecvTimeoutError::Timeout));
    control_tx.send_line("smc_on");
    assert_eq!(dispatched_rx.recv_timeout(Duration::from_secs(5)), Ok(2));
    let second = output_rx.records(&mut parser, 1, Duration::from_secs(5));
    assert_eq!(second[0].header.cmd_id, 2);
    driver.join().unwrap();

    assert_eq!(fwd.gate().permits(), -1);
    assert_eq!(fwd.stats().appended, 2);

    cancel.cancel();
    drop(control_tx);
    assert!(service.join().unwrap().is_ok());
}

#[test]
fn cancellation_returns_while_control_input_stays_open() {
    let fwd = forwarder(ForwarderConfig::default());
    let cancel = CancelToken::new();
    let (control_tx, control_rx) = pipe();
    let (output_tx, _output_rx) = pipe();
    let (ready_tx, ready_rx) = bounded(1);
    let (exit_tx, exit_rx) = bounded(1);

    {
        let fwd = fwd.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            let ready = ReadyNotifier::new(move || {
                let _ = ready_tx.send(());
            });
            let _ = exit_tx.send(service_main_loop(fwd, BufReader::new(control_rx), output_tx, ready, cancel));
        });
    }
    ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    cancel.cancel();
    assert!(exit_rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());

    // The detached control reader drops the first line it sees after cancellation.
    control_tx.send_line("smc_off");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fwd.gate().permits(), -1);
}
