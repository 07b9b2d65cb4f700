// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Forwarder tunables loaded from TOML
//! DEPS: serde, toml, std::fs
//! TESTS: `source/services/smcfwd/tests/config.rs` (defaults, partial files, validation)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agents::MAX_AGENT_SEGMENTS;
use crate::extract::{ExtractLimits, DEFAULT_MAX_PARAM_LEN};
use crate::gate::UNRESTRICTED;
use crate::payload::AGENT_WINDOW_LEN;
use crate::render::DEFAULT_STAGING_LIMIT;
use crate::ring::DEFAULT_CAPACITY;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SMCFWD_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Forwarder tunables. Every field is optional in the file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwarderConfig {
    /// Ring slots.
    pub ring_capacity: usize,
    /// Ceiling for one rendered record in bytes.
    pub staging_limit: usize,
    /// Wait granularity for the empty ring and the blocked gate.
    pub poll_interval_ms: u64,
    /// Bytes snapshotted per agent segment.
    pub agent_window: usize,
    /// Agent segments accepted by the registry.
    pub max_agents: usize,
    /// Largest memory-reference buffer copied per parameter.
    pub max_param_len: usize,
    /// Capture state at startup.
    pub capture_enabled: bool,
    /// Gate permit count at startup (`-1` unrestricted, `0` blocked).
    pub initial_permits: i64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_CAPACITY,
            staging_limit: DEFAULT_STAGING_LIMIT,
            poll_interval_ms: 50,
            agent_window: AGENT_WINDOW_LEN,
            max_agents: MAX_AGENT_SEGMENTS,
            max_param_len: DEFAULT_MAX_PARAM_LEN,
            capture_enabled: false,
            initial_permits: UNRESTRICTED,
        }
    }
}

impl ForwarderConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(path: &Path, data: &str) -> Result<Self, ConfigError> {
        let config: ForwarderConfig = toml::from_str(data)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(data) => Self::from_toml(path, &data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
        }
    }

    /// Loads the file named by `SMCFWD_CONFIG`, or the defaults when it is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 {
            return Err(ConfigError::Invalid("ring_capacity must be at least 1"));
        }
        if self.max_agents > MAX_AGENT_SEGMENTS {
            return Err(ConfigError::Invalid("max_agents exceeds the agent table size"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero"));
        }
        if self.staging_limit == 0 {
            return Err(ConfigError::Invalid("staging_limit must be non-zero"));
        }
        // Each copied byte renders as two hex digits.
        if self.max_param_len.saturating_mul(2) >= self.staging_limit {
            return Err(ConfigError::Invalid("max_param_len cannot render within staging_limit"));
        }
        Ok(())
    }

    /// Wait granularity as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Copy limits for the parameter extractor.
    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits { max_param_len: self.max_param_len, agent_window: self.agent_window }
    }
}
