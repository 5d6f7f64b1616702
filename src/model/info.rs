//! System information and setup parameter blocks, each updated by its own
//! dedicated frame type.

use serde::{Deserialize, Serialize};

/// Firmware and hardware identity reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    /// Trimmed ASCII model identifier.
    pub model: String,
    /// Controller configuration signature byte.
    pub config_signature: u8,
    /// Raw dip-switch bank.
    pub dip_switches: u8,
}

/// Temperature range bounds and installer flags.
///
/// Bounds are Fahrenheit after decode, like every other temperature in the
/// state model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupParams {
    pub low_range_min: i32,
    pub low_range_max: i32,
    pub high_range_min: i32,
    pub high_range_max: i32,
    pub gfci_enabled: bool,
    pub drain_mode_enabled: bool,
}
