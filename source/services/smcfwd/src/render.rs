// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Text protocol producer – renders one captured slot into a bounded staging buffer
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
//! - Every line starts with `\n`; all hex is uppercase; byte dumps are two digits per byte
//! - A record either renders completely within the staging limit or not at all

use core::fmt::{self, Write as _};

use smc_abi::CommandRecord;

use crate::error::StreamError;
use crate::payload::{CapturedPayload, ParamSlot};

/// Default staging ceiling for one rendered record.
pub const DEFAULT_STAGING_LIMIT: usize = 16 * 1024 * 1024;

/// Record start marker for requests and folded responses.
pub const START_MARKER: &str = "\nSMC_START";
/// Record start marker for responses that could not be folded.
pub const RETURN_START_MARKER: &str = "\nSMC_RETURN_START";
/// Agent block start marker.
pub const AGENT_START_MARKER: &str = "\nSHM_AGENT_START";
/// Agent block end marker.
pub const AGENT_END_MARKER: &str = "\nSHM_AGENT_END\n";
/// Record end marker.
pub const END_MARKER: &str = "\nSMC_END\n";

const HEX_CHUNK: usize = 2048;

/// Renders captured slots into the text protocol.
#[derive(Clone, Copy, Debug)]
pub struct RecordRenderer {
    limit: usize,
}

impl RecordRenderer {
    /// Creates a renderer whose staging buffer never exceeds `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Staging ceiling in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Renders `record`/`payload` held in ring slot `slot`.
    pub fn render(
        &self,
        slot: usize,
        record: &CommandRecord,
        payload: &CapturedPayload,
    ) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        self.render_into(slot, record, payload, &mut out)?;
        Ok(out)
    }

    /// Renders into `out`, replacing its previous contents and reusing its allocation.
    pub fn render_into(
        &self,
        slot: usize,
        record: &CommandRecord,
        payload: &CapturedPayload,
        out: &mut Vec<u8>,
    ) -> Result<(), StreamError> {
        out.clear();
        let mut staging = Staging { buf: out, limit: self.limit };
        write_record(&mut staging, record, payload)
            .map_err(|_| StreamError::RecordTooLarge { slot, limit: self.limit })
    }
}

impl Default for RecordRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_LIMIT)
    }
}

fn write_record(
    out: &mut Staging<'_>,
    record: &CommandRecord,
    payload: &CapturedPayload,
) -> fmt::Result {
    out.write_str(if payload.is_response { RETURN_START_MARKER } else { START_MARKER })?;
    write!(
        out,
        "\nuuid:{},uuid_phys:{:X},cmd_id:{:X},dev_file_id:{:X},context_id:{:X},agent_id:{:X},\
         operation_phys:{:X},operation_paramTypes:{:X},login_method:{:X},login_data:{:X},\
         err_origin:{:X},ret_val:{:X},event_nr:{:X},remap:{:X},uid:{:X},started:{:X}",
        payload.uuid,
        record.uuid_ref,
        record.cmd_id,
        record.dev_file_id,
        record.context_id,
        record.agent_id,
        record.operation_ref,
        payload.param_types,
        record.login_method,
        record.login_data,
        record.err_origin,
        record.ret_val,
        record.event_nr,
        record.remap,
        record.uid,
        record.started,
    )?;

    for (index, slot) in payload.params.iter().enumerate() {
        match slot {
            ParamSlot::Value { value_a, value_b } => {
                write!(out, "\nparam_{index:x}:value_a:{value_a:X},value_b:{value_b:X}")?;
            }
            ParamSlot::Memory { bytes: Some(bytes), size, .. } => {
                write!(out, "\nparam_{index:x}:size:{size:X},buffer:")?;
                out.write_hex(bytes)?;
            }
            ParamSlot::Memory { bytes: None, .. } | ParamSlot::Empty => {}
        }
    }

    if record.agent_id != 0 {
        out.write_str(AGENT_START_MARKER)?;
        for snapshot in &payload.agent_snapshots {
            write!(out, "\nphys_addr:{:02X}\n", snapshot.addr)?;
            out.write_hex(&snapshot.bytes)?;
        }
        out.write_str(AGENT_END_MARKER)?;
    }

    out.write_str(END_MARKER)
}

/// Bounded, fallibly grown output buffer.
struct Staging<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
}

impl Staging<'_> {
    fn reserve(&mut self, additional: usize) -> fmt::Result {
        let total = self.buf.len().checked_add(additional).ok_or(fmt::Error)?;
        if total > self.limit {
            return Err(fmt::Error);
        }
        self.buf.try_reserve(additional).map_err(|_| fmt::Error)
    }

    fn write_hex(&mut self, bytes: &[u8]) -> fmt::Result {
        self.reserve(bytes.len().checked_mul(2).ok_or(fmt::Error)?)?;
        for chunk in bytes.chunks(HEX_CHUNK) {
            self.buf.extend_from_slice(hex::encode_upper(chunk).as_bytes());
        }
        Ok(())
    }
}

impl fmt::Write for Staging<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.reserve(s.len())?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_renders_header_only() {
        let rendered = RecordRenderer::default()
            .render(0, &CommandRecord::default(), &CapturedPayload::default())
            .unwrap();
        assert_eq!(
            String::from_utf8(rendered).unwrap(),
            "\nSMC_START\nuuid:,uuid_phys:0,cmd_id:0,dev_file_id:0,context_id:0,agent_id:0,\
             operation_phys:0,operation_paramTypes:0,login_method:0,login_data:0,err_origin:0,\
             ret_val:0,event_nr:0,remap:0,uid:0,started:0\nSMC_END\n"
        );
    }

    #[test]
    fn record_exactly_at_limit_fits() {
        let exact = RecordRenderer::default()
            .render(0, &CommandRecord::default(), &CapturedPayload::default())
            .unwrap()
            .len();
        let fits = RecordRenderer::new(exact);
        assert!(fits.render(0, &CommandRecord::default(), &CapturedPayload::default()).is_ok());
        let short = RecordRenderer::new(exact - 1);
        assert_eq!(
            short.render(3, &CommandRecord::default(), &CapturedPayload::default()),
            Err(StreamError::RecordTooLarge { slot: 3, limit: exact - 1 })
        );
    }
}
