//! Identity and state of a debug-accessible target core.

use std::fmt;

use serde::{Deserialize, Serialize};


// ---------------------------------------------------------------------------
// CoreConnInfo
// ---------------------------------------------------------------------------

/// Everything needed to (re)open a logical core.
///
/// Immutable for the lifetime of the logical core. It is retained while the
/// core's handle is absent so that reconnection can be attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConnInfo {
    /// Host running the debug server.
    pub host: String,
    /// Unique key of the debug server instance.
    #[serde(default)]
    pub server_key: String,
    /// Key of the system the device belongs to.
    #[serde(default)]
    pub system_key: String,
    /// Key of the device within the system.
    #[serde(default)]
    pub device_key: String,
    /// Display name of the system.
    pub system: String,
    /// Display name of the device.
    pub device: String,
    /// Display name of the core.
    pub core: String,
    /// Index of the core within its device.
    pub core_id: u32,
}

impl CoreConnInfo {
    pub fn new(host: &str, system: &str, device: &str, core: &str, core_id: u32) -> Self {
        CoreConnInfo {
            host: host.to_string(),
            server_key: String::new(),
            system_key: String::new(),
            device_key: String::new(),
            system: system.to_string(),
            device: device.to_string(),
            core: core.to_string(),
            core_id,
        }
    }
}

impl fmt::Display for CoreConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}#{}",
            self.host, self.system, self.device, self.core, self.core_id
        )
    }
}


// ---------------------------------------------------------------------------
// CoreHandle
// ---------------------------------------------------------------------------

/// Opaque handle to an open core, issued by the transport.
///
/// A handle is only meaningful to the transport that issued it. After a
/// connection loss the handle is discarded and a fresh one is obtained on
/// reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreHandle(pub u64);

impl fmt::Display for CoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}


// ---------------------------------------------------------------------------
// CoreState
// ---------------------------------------------------------------------------

/// Execution state of a core as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    Unknown,
    Running,
    Halted,
    Debug,
    Custom,
}

impl Default for CoreState {
    fn default() -> Self {
        CoreState::Unknown
    }
}


// ---------------------------------------------------------------------------
// RegisterInfo
// ---------------------------------------------------------------------------

/// Descriptor of one register in a core's register map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    pub name: String,
    /// Address at which the register can be read through the transport.
    pub address: u64,
    /// Register width in bits.
    pub width_bits: u32,
    pub group_id: u32,
}

impl RegisterInfo {
    pub fn new(name: &str, address: u64, width_bits: u32, group_id: u32) -> Self {
        RegisterInfo {
            name: name.to_string(),
            address,
            width_bits,
            group_id,
        }
    }

    /// Whether this register holds the instruction pointer.
    pub fn is_instruction_pointer(&self) -> bool {
        self.name == "PC" || self.name == "IP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_info_display() {
        let info = CoreConnInfo::new("localhost", "TC27x", "SAK-TC275", "core1", 1);
        assert_eq!(info.to_string(), "localhost/TC27x/SAK-TC275/core1#1");
    }

    #[test]
    fn conn_info_round_trip() {
        let mut info = CoreConnInfo::new("10.0.0.2", "sys", "dev", "cpu0", 0);
        info.server_key = "srv-7".into();
        let json = serde_json::to_string(&info).unwrap();
        let back: CoreConnInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn conn_info_keys_default_when_missing() {
        let json = r#"{"host":"h","system":"s","device":"d","core":"c","core_id":3}"#;
        let info: CoreConnInfo = serde_json::from_str(json).unwrap();
        assert!(info.server_key.is_empty());
        assert_eq!(info.core_id, 3);
    }

    #[test]
    fn instruction_pointer_names() {
        assert!(RegisterInfo::new("PC", 0xFE08, 32, 0).is_instruction_pointer());
        assert!(RegisterInfo::new("IP", 0x10, 16, 0).is_instruction_pointer());
        assert!(!RegisterInfo::new("PSW", 0xFE04, 32, 0).is_instruction_pointer());
        assert!(!RegisterInfo::new("pc", 0xFE08, 32, 0).is_instruction_pointer());
    }

    #[test]
    fn core_state_serde() {
        let json = serde_json::to_string(&CoreState::Halted).unwrap();
        assert_eq!(json, "\"halted\"");
        assert_eq!(CoreState::default(), CoreState::Unknown);
    }
}
