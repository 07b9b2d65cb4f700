// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Control plane tokens accepted on the forwarder's command input.
//!
//! Matching is a case-sensitive prefix match against the start of the written bytes.
//! Unrecognised input is accepted and ignored.

/// One recognised control command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// `smc_add`: grant one dispatch permit.
    AddPermit,
    /// `smc_off`: block dispatch.
    Off,
    /// `smc_on`: unrestricted dispatch.
    On,
    /// `smc_forward`: enable capture.
    Forward,
}

impl ControlCommand {
    /// All commands in matching order.
    pub const ALL: [ControlCommand; 4] =
        [ControlCommand::AddPermit, ControlCommand::Off, ControlCommand::On, ControlCommand::Forward];

    /// ASCII token for this command.
    pub const fn token(self) -> &'static str {
        match self {
            ControlCommand::AddPermit => "smc_add",
            ControlCommand::Off => "smc_off",
            ControlCommand::On => "smc_on",
            ControlCommand::Forward => "smc_forward",
        }
    }

    /// Matches the start of `input` against the known tokens.
    pub fn parse(input: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| input.starts_with(cmd.token().as_bytes()))
    }

    /// Bytes reported as consumed for a write of `input`: the token length on a match,
    /// the whole input otherwise.
    pub fn consumed(input: &[u8]) -> usize {
        Self::parse(input).map_or(input.len(), |cmd| cmd.token().len())
    }
}
