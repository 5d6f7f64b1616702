//! # Controller State
//!
//! Flattened snapshot of the spa controller's panel state. One instance per
//! spa, overwritten wholesale on every panel-update frame; every temperature
//! field is already converted to Fahrenheit by the decoding dialect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heater operating mode reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeaterMode {
    #[default]
    Ready,
    Rest,
    ReadyInRest,
}

impl HeaterMode {
    pub fn from_raw(raw: u8) -> HeaterMode {
        match raw {
            1 => HeaterMode::Rest,
            2 => HeaterMode::ReadyInRest,
            _ => HeaterMode::Ready,
        }
    }
}

/// Active temperature range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureRange {
    Low,
    #[default]
    High,
}

/// Filter pump schedule currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    #[default]
    Off,
    Cycle1,
    Cycle2,
    Cycle1And2,
}

impl FilterMode {
    pub fn from_raw(raw: u8) -> FilterMode {
        match raw & 0x03 {
            1 => FilterMode::Cycle1,
            2 => FilterMode::Cycle2,
            3 => FilterMode::Cycle1And2,
            _ => FilterMode::Off,
        }
    }
}

/// Bluetooth radio status byte reported by panels that carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BluetoothStatus {
    #[default]
    NotPresent,
    Idle,
    Connected,
    Streaming,
}

impl BluetoothStatus {
    pub fn from_raw(raw: u8) -> BluetoothStatus {
        match raw {
            1 => BluetoothStatus::Idle,
            2 => BluetoothStatus::Connected,
            3 => BluetoothStatus::Streaming,
            _ => BluetoothStatus::NotPresent,
        }
    }
}

/// Flattened controller panel state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    // Clock
    pub hour: u8,
    pub minute: u8,
    pub military_time: bool,

    // Temperatures, Fahrenheit after decode
    pub celsius: bool,
    pub current_water_temp: Option<i32>,
    pub target_water_temperature: i32,
    pub sensor_a_temp: Option<i32>,
    pub sensor_b_temp: Option<i32>,

    // Heating
    pub heater_mode: HeaterMode,
    pub temperature_range: TemperatureRange,
    pub needs_heat: bool,
    pub heating: bool,

    // Filtration
    pub filter_mode: FilterMode,

    // Run state flags
    pub priming: bool,
    pub hold_mode: bool,
    pub test_mode: bool,

    // Access locks
    pub panel_locked: bool,
    pub settings_locked: bool,
    pub temperature_locked: bool,

    // Display
    pub invert_display: bool,
    pub all_segments_on: bool,
    pub display_code: u8,
    pub ui_code: u8,

    // Diagnostics
    pub error_code: u8,
    pub message_severity: u8,

    // Radios
    pub bluetooth_status: BluetoothStatus,

    // Reminders
    pub reminder_code: u8,
    pub reminder_days_clear_ray: u8,
    pub reminder_days_water_refresh: u8,

    /// Clock value at decode time.
    pub last_update: Option<DateTime<Utc>>,
}
