//! # spabus-rs - RS485 Spa Controller to Cloud Gateway
//!
//! The spabus-rs crate bridges a hot-tub controller's shared RS485 bus to a
//! cloud service over MQTT. It participates in the bus master's arbitration
//! protocol to obtain a device address, decodes controller telemetry into a
//! shared state snapshot, queues outbound panel commands for the bus polls
//! that are its only transmission opportunity, and exchanges
//! protobuf-enveloped messages with the cloud.
//!
//! ## Features
//!
//! - Delimiter-framed wire codec with checksum validation and resync
//! - Bus discovery, address assignment and poll handling
//! - Two controller wire dialects (NGSC and Jacuzzi) behind one trait
//! - Atomically swapped immutable state snapshots for lock-light readers
//! - Deduplicating fault-log cache with missing-entry gap fill
//! - At-least-once MQTT uplink with a bounded retry cache
//! - Self-healing downlink subscription with staleness detection
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! spabus-rs = "1.0.0"
//! ```
//!
//! ```rust,no_run
//! use spabus_rs::{Gateway, GatewayConfig, init_logger};
//! use std::path::Path;
//!
//! # async fn demo() -> Result<(), spabus_rs::SpaError> {
//! init_logger();
//! let config = GatewayConfig::load(Path::new("gateway.properties"))?;
//! Gateway::new(config).run().await
//! # }
//! ```

pub mod cloud;
pub mod config;
pub mod constants;
pub mod dialect;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod rs485;

pub use crate::config::GatewayConfig;
pub use crate::error::SpaError;
pub use crate::gateway::Gateway;
pub use crate::logging::{init_logger, log_info};

// Bus protocol engine
pub use rs485::arbitration::{ArbitrationAction, BusAddress, BusArbitration};
pub use rs485::commands::{CommandEncoder, FilterCycleRequest, PendingCommand};
pub use rs485::frame::{compute_fcs, is_valid, pack_frame, parse_frame, SpaFrame};
pub use rs485::serial::{SerialConfig, SpaDeviceHandle};
pub use rs485::session::Rs485Session;

// Decoded state model
pub use model::components::{Component, ComponentState, Components, FilterCycle};
pub use model::controller::Controller;
pub use model::fault_log::{FaultLogBatch, FaultLogCache, FaultLogEntry};
pub use model::state::{SharedSpaState, SpaState};

// Dialect selection
pub use dialect::{DialectKind, SpaDialect};

// Cloud messaging
pub use cloud::downlink::{DownlinkHandler, DownlinkSubscriber};
pub use cloud::proto::{SpaStateMessage, UplinkCommandType};
pub use cloud::uplink::{QueuedUplink, UplinkDispatcher};
