//! RS485 Spa Bus Protocol Constants
//!
//! This module defines the wire-level constants shared across the bus
//! arbitration layer and both dialect decoders. Per-dialect packet type
//! codes and byte offsets live with their dialect module.

/// Frame delimiter byte bounding every frame at both ends
pub const FRAME_DELIMITER: u8 = 0x7E;

/// Control byte carried by frames originating from the bus master
pub const CONTROL_MASTER: u8 = 0xAF;

/// Control byte carried by frames originating from this device
pub const CONTROL_DEVICE: u8 = 0xBF;

/// Broadcast/unassigned address polled before address assignment
pub const ADDRESS_UNASSIGNED: u8 = 0xFE;

// ----------------------------------------------------------------------------
// Bus arbitration packet types (dialect independent)
// ----------------------------------------------------------------------------

/// Master poll for devices without an assigned address
pub const PTYPE_UNASSIGNED_POLL: u8 = 0x00;

/// Device reply to an unassigned poll, carrying a random request id
pub const PTYPE_ADDRESS_REQUEST: u8 = 0x01;

/// Master assigns an address; payload: [request id hi, request id lo, address]
pub const PTYPE_ADDRESS_ASSIGNMENT: u8 = 0x02;

/// Device acknowledgment of an address assignment
pub const PTYPE_ASSIGNMENT_ACK: u8 = 0x03;

/// Master query for device presence/version
pub const PTYPE_PRESENCE_QUERY: u8 = 0x04;

/// Device presence reply carrying the version triplet
pub const PTYPE_PRESENCE_REPLY: u8 = 0x05;

/// Master poll offering this device a transmission slot
pub const PTYPE_DEVICE_POLL: u8 = 0x06;

/// Content-free reply when the pending queue is empty
pub const PTYPE_NOTHING_TO_SEND: u8 = 0x07;

// ----------------------------------------------------------------------------
// Gateway identity reported on presence queries
// ----------------------------------------------------------------------------

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_BUILD: u8 = 0;

// ----------------------------------------------------------------------------
// Capacity and timing ceilings
// ----------------------------------------------------------------------------

/// Pending outbound command queue depth
pub const PENDING_QUEUE_CAPACITY: usize = 100;

/// Blocking enqueue ceiling before a command is dropped as QueueFull
pub const PENDING_ENQUEUE_TIMEOUT_SECS: u64 = 5;

/// Fault-log cache bound; oldest entries evicted beyond this
pub const FAULT_LOG_CAPACITY: usize = 256;

/// Uplink retry queue depth
pub const RETRY_QUEUE_CAPACITY: usize = 500;

/// Publish attempts before a cached uplink is abandoned
pub const MAX_PUBLISH_ATTEMPTS: u32 = 5;

/// Broker acknowledgment wait for a single publish
pub const PUBLISH_ACK_TIMEOUT_SECS: u64 = 10;

/// Minimum interval between uplink connection rebuilds
pub const RECONNECT_MIN_INTERVAL_SECS: u64 = 60;

/// Downlink connect/subscribe ceiling
pub const SUBSCRIBE_TIMEOUT_SECS: u64 = 45;

/// Downlink per-poll receive ceiling
pub const RECEIVE_POLL_TIMEOUT_SECS: u64 = 10;

/// Downlink staleness ceiling; a silent broker forces a fresh session
pub const DOWNLINK_STALE_SECS: u64 = 270;

/// Ceiling for terminating a previous downlink connection
pub const CONNECTION_KILL_TIMEOUT_SECS: u64 = 60;

/// Forced connection kill ceiling during shutdown
pub const SHUTDOWN_KILL_TIMEOUT_SECS: u64 = 20;

/// Idle clear-to-send log line throttle
pub const IDLE_LOG_THROTTLE_SECS: u64 = 60;

// ----------------------------------------------------------------------------
// Command limits
// ----------------------------------------------------------------------------

/// Lowest target water temperature any controller accepts, Fahrenheit
pub const TARGET_TEMP_MIN_F: i32 = 50;

/// Highest target water temperature any controller accepts, Fahrenheit
pub const TARGET_TEMP_MAX_F: i32 = 104;
