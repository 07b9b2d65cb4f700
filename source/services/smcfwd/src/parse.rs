// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Text protocol consumer – incremental parser turning the record stream back
//! into structured records
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE: Tests in `source/services/smcfwd/tests/parser.rs`
//!
//! INVARIANTS:
//! - Input may be split at arbitrary byte boundaries
//! - A malformed line discards the record being assembled; parsing resumes at the next
//!   start marker

use smc_abi::{CommandRecord, PhysAddr, PARAM_COUNT};
use thiserror::Error;

/// Parse failures. The partial record is discarded.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A non-empty line appeared outside of a record.
    #[error("unexpected line outside a record: {0:?}")]
    Unexpected(String),
    /// A line inside a record could not be decoded.
    #[error("malformed {what} line: {line:?}")]
    Malformed {
        /// Kind of line being decoded.
        what: &'static str,
        /// Offending line.
        line: String,
    },
}

/// One decoded parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ParsedParam {
    /// Not present in the record.
    #[default]
    None,
    /// Value parameter.
    Value {
        /// First word.
        a: u32,
        /// Second word.
        b: u32,
    },
    /// Memory parameter with its dumped contents.
    Memory {
        /// Declared size.
        size: u32,
        /// Dumped bytes.
        bytes: Vec<u8>,
    },
}

/// One decoded record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRecord {
    /// Started with `SMC_RETURN_START`.
    pub is_response: bool,
    /// UUID as uppercase hex (possibly empty).
    pub uuid: String,
    /// Command header fields.
    pub header: CommandRecord,
    /// Packed parameter tags.
    pub param_types: u32,
    /// Parameters by index.
    pub params: [ParsedParam; PARAM_COUNT],
    /// Agent segment dumps in stream order.
    pub agent_segments: Vec<(PhysAddr, Vec<u8>)>,
}

enum State {
    Idle,
    Record(Box<ParsedRecord>),
    Agents { record: Box<ParsedRecord>, addr: Option<PhysAddr> },
}

/// Incremental parser for the record stream.
pub struct RecordParser {
    line: Vec<u8>,
    state: State,
}

impl RecordParser {
    /// Creates a parser expecting a record start.
    pub fn new() -> Self {
        Self { line: Vec::new(), state: State::Idle }
    }

    /// Returns `true` while a record is partially assembled.
    pub fn in_record(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Feeds a chunk and returns the records it completed.
    ///
    /// On error, records completed earlier in the same chunk are lost to the caller; feed
    /// smaller chunks when that matters.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ParsedRecord>, ParseError> {
        let mut done = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            if let Some(record) = self.process(&line)? {
                done.push(record);
            }
        }
        Ok(done)
    }

    fn process(&mut self, line: &str) -> Result<Option<ParsedRecord>, ParseError> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let (next, finished) = match state {
            State::Idle => match line {
                "" => (State::Idle, None),
                "SMC_START" | "SMC_RETURN_START" => {
                    let record = ParsedRecord { is_response: line == "SMC_RETURN_START", ..Default::default() };
                    (State::Record(Box::new(record)), None)
                }
                other => return Err(ParseError::Unexpected(other.to_string())),
            },
            State::Record(mut record) => {
                if line.is_empty() {
                    (State::Record(record), None)
                } else if line == "SMC_END" {
                    (State::Idle, Some(*record))
                } else if line == "SHM_AGENT_START" {
                    (State::Agents { record, addr: None }, None)
                } else if let Some(fields) = line.strip_prefix("uuid:") {
                    parse_header(fields, &mut record)
                        .ok_or_else(|| malformed("header", line))?;
                    (State::Record(record), None)
                } else if let Some(rest) = line.strip_prefix("param_") {
                    let (index, param) = parse_param(rest).ok_or_else(|| malformed("param", line))?;
                    record.params[index] = param;
                    (State::Record(record), None)
                } else {
                    return Err(malformed("record", line));
                }
            }
            State::Agents { mut record, addr } => match (addr, line) {
                (None, "") => (State::Agents { record, addr: None }, None),
                (None, "SHM_AGENT_END") => (State::Record(record), None),
                (None, _) => {
                    let addr = line
                        .strip_prefix("phys_addr:")
                        .and_then(|v| u32::from_str_radix(v, 16).ok())
                        .ok_or_else(|| malformed("agent address", line))?;
                    (State::Agents { record, addr: Some(PhysAddr(addr)) }, None)
                }
                (Some(addr), dump) => {
                    let bytes = hex::decode(dump).map_err(|_| malformed("agent dump", line))?;
                    record.agent_segments.push((addr, bytes));
                    (State::Agents { record, addr: None }, None)
                }
            },
        };
        self.state = next;
        Ok(finished)
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

fn malformed(what: &'static str, line: &str) -> ParseError {
    ParseError::Malformed { what, line: line.to_string() }
}

fn parse_header(fields: &str, record: &mut ParsedRecord) -> Option<()> {
    let mut parts = fields.split(',');
    record.uuid = parts.next()?.to_string();
    let header = &mut record.header;
    for part in parts {
        let (key, value) = part.split_once(':')?;
        let value = u32::from_str_radix(value, 16).ok()?;
        match key {
            "uuid_phys" => header.uuid_ref = PhysAddr(value),
            "cmd_id" => header.cmd_id = value,
            "dev_file_id" => header.dev_file_id = value,
            "context_id" => header.context_id = value,
            "agent_id" => header.agent_id = value,
            "operation_phys" => header.operation_ref = PhysAddr(value),
            "operation_paramTypes" => record.param_types = value,
            "login_method" => header.login_method = value,
            "login_data" => header.login_data = value,
            "err_origin" => header.err_origin = value,
            "ret_val" => header.ret_val = value,
            "event_nr" => header.event_nr = value,
            "remap" => header.remap = value,
            "uid" => header.uid = value,
            "started" => header.started = value,
            _ => return None,
        }
    }
    Some(())
}

fn parse_param(rest: &str) -> Option<(usize, ParsedParam)> {
    let (index, body) = rest.split_once(':')?;
    let index = usize::from_str_radix(index, 16).ok().filter(|&i| i < PARAM_COUNT)?;
    if let Some(values) = body.strip_prefix("value_a:") {
        let (a, b) = values.split_once(",value_b:")?;
        let a = u32::from_str_radix(a, 16).ok()?;
        let b = u32::from_str_radix(b, 16).ok()?;
        return Some((index, ParsedParam::Value { a, b }));
    }
    let memory = body.strip_prefix("size:")?;
    let (size, dump) = memory.split_once(",buffer:")?;
    let size = u32::from_str_radix(size, 16).ok()?;
    let bytes = hex::decode(dump).ok()?;
    if bytes.len() != size as usize {
        return None;
    }
    Some((index, ParsedParam::Memory { size, bytes }))
}
