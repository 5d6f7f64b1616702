//! Normalized spa state model shared by the dialect decoders and the cloud
//! uplink path.

pub mod components;
pub mod controller;
pub mod fault_log;
pub mod info;
pub mod state;

pub use components::{Component, ComponentState, Components, FilterCycle};
pub use controller::{BluetoothStatus, Controller, FilterMode, HeaterMode, TemperatureRange};
pub use fault_log::{FaultLogBatch, FaultLogCache, FaultLogEntry};
pub use info::{SetupParams, SystemInfo};
pub use state::{SharedSpaState, SpaState};
