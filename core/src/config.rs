//! Trace configuration, loaded from YAML and overridden from the command line.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. The CLI loads a file when `--config` is given and
//! then overrides individual fields from its flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TraceError;
use crate::ring::layout::{RingDescriptor, RingLayout, DEFAULT_BUFFER_ADDRESS};

/// Shortest polling period the scheduler will sleep for.
pub const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

pub const DEFAULT_POLLING_PERIOD_US: u64 = 1000;


/// Runtime configuration of a trace session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Base address of the ring buffer in every traced core.
    pub buffer_address: u64,

    /// Polling period in microseconds.
    pub polling_period_us: u64,

    /// Debug server host.
    pub host: String,

    /// Output files are named `<output_prefix>core<i>.txt`.
    pub output_prefix: String,

    /// Trace only the first core of the device.
    pub single_core: bool,

    /// Device index within the first system on the server.
    pub device_index: u32,

    /// Register group searched for the instruction pointer.
    pub register_group: u32,

    /// Append to existing output files instead of truncating them.
    pub append: bool,

    pub ring: RingLayout,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            buffer_address: DEFAULT_BUFFER_ADDRESS,
            polling_period_us: DEFAULT_POLLING_PERIOD_US,
            host: "localhost".into(),
            output_prefix: "trace_".into(),
            single_core: false,
            device_index: 0,
            register_group: 0,
            append: false,
            ring: RingLayout::default(),
        }
    }
}

impl TraceConfig {
    /// Check every value that cannot be verified by deserialization alone.
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.host.trim().is_empty() {
            return Err(TraceError::Config("host must not be empty".into()));
        }
        self.ring.validate()?;
        if self.buffer_address.checked_add(self.ring.footprint()).is_none() {
            return Err(TraceError::Config(format!(
                "ring at {:#x} does not fit in the address space",
                self.buffer_address
            )));
        }
        Ok(())
    }

    pub fn ring_descriptor(&self) -> RingDescriptor {
        RingDescriptor::new(self.buffer_address, self.ring)
    }

    /// Polling period, clamped to `MIN_POLL_PERIOD`.
    pub fn poll_period(&self) -> Duration {
        Duration::from_micros(self.polling_period_us).max(MIN_POLL_PERIOD)
    }
}


/// Load a configuration from a YAML file.
pub fn load(path: &Path) -> Result<TraceConfig, TraceError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TraceError::Config(format!("cannot read '{}': {}", path.display(), e))
    })?;
    parse(&content)
}


/// Parse a configuration from a YAML string.
pub fn parse(content: &str) -> Result<TraceConfig, TraceError> {
    if content.trim().is_empty() {
        return Ok(TraceConfig::default());
    }
    serde_yaml::from_str(content)
        .map_err(|e| TraceError::Config(format!("invalid trace config: {}", e)))
}


/// Parse a decimal or `0x`-prefixed hexadecimal address.
pub fn parse_address(text: &str) -> Result<u64, TraceError> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|_| TraceError::Config(format!("invalid address '{}'", text)))
}
