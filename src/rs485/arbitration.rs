//! # Bus Arbitration
//!
//! The spa controller is the bus master; this gateway is one addressed
//! device among several. The master runs a poll-response protocol: devices
//! are discovered through an unassigned-device poll, handed an address, and
//! afterwards periodically offered a transmission slot. Everything here is
//! dialect independent; frames that are not one of the four control
//! operations are forwarded to the active dialect decoder.
//!
//! The only state retained across cycles is the currently assigned bus
//! address, which the command encoder also needs for building frames.

use crate::constants::{
    ADDRESS_UNASSIGNED, CONTROL_DEVICE, IDLE_LOG_THROTTLE_SECS, PTYPE_ADDRESS_ASSIGNMENT,
    PTYPE_ADDRESS_REQUEST, PTYPE_ASSIGNMENT_ACK, PTYPE_DEVICE_POLL, PTYPE_NOTHING_TO_SEND,
    PTYPE_PRESENCE_QUERY, PTYPE_PRESENCE_REPLY, PTYPE_UNASSIGNED_POLL, VERSION_BUILD,
    VERSION_MAJOR, VERSION_MINOR,
};
use crate::rs485::commands::CommandEncoder;
use crate::rs485::frame::{pack_frame, SpaFrame};
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// The currently assigned bus address, shared with the command encoder.
#[derive(Debug)]
pub struct BusAddress(AtomicU8);

impl BusAddress {
    pub fn new() -> BusAddress {
        BusAddress(AtomicU8::new(ADDRESS_UNASSIGNED))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, address: u8) {
        self.0.store(address, Ordering::SeqCst);
    }

    pub fn is_assigned(&self) -> bool {
        self.get() != ADDRESS_UNASSIGNED
    }
}

impl Default for BusAddress {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of offering a frame to the arbitration layer.
#[derive(Debug, PartialEq, Eq)]
pub enum ArbitrationAction {
    /// Write these bytes back onto the bus.
    Reply(Vec<u8>),
    /// Not a control frame; hand it to the dialect decoder.
    Telemetry,
    /// Control frame addressed to some other device.
    Ignored,
}

/// Poll-response handler for the four bus control operations.
pub struct BusArbitration {
    address: std::sync::Arc<BusAddress>,
    /// Request id sent in our last unassigned-poll reply; the master echoes
    /// it in the address assignment.
    request_id: Mutex<Option<u16>>,
    last_idle_log: Mutex<Option<Instant>>,
}

impl BusArbitration {
    pub fn new(address: std::sync::Arc<BusAddress>) -> BusArbitration {
        BusArbitration {
            address,
            request_id: Mutex::new(None),
            last_idle_log: Mutex::new(None),
        }
    }

    /// Dispatches one validated frame from the bus.
    pub fn handle_frame(&self, frame: &SpaFrame, encoder: &CommandEncoder) -> ArbitrationAction {
        match frame.packet_type {
            PTYPE_UNASSIGNED_POLL => self.handle_unassigned_poll(),
            PTYPE_ADDRESS_ASSIGNMENT => self.handle_assignment(frame),
            PTYPE_PRESENCE_QUERY => self.handle_presence_query(frame),
            PTYPE_DEVICE_POLL => self.handle_device_poll(frame, encoder),
            _ => ArbitrationAction::Telemetry,
        }
    }

    fn handle_unassigned_poll(&self) -> ArbitrationAction {
        if self.address.is_assigned() {
            return ArbitrationAction::Ignored;
        }
        let id: u16 = rand::thread_rng().gen();
        *self.request_id.lock().expect("request id lock poisoned") = Some(id);
        log::info!("answering unassigned poll with request id 0x{id:04X}");
        ArbitrationAction::Reply(pack_frame(
            ADDRESS_UNASSIGNED,
            CONTROL_DEVICE,
            PTYPE_ADDRESS_REQUEST,
            &id.to_be_bytes(),
        ))
    }

    fn handle_assignment(&self, frame: &SpaFrame) -> ArbitrationAction {
        if frame.payload.len() < 3 {
            return ArbitrationAction::Ignored;
        }
        let echoed = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
        let assigned = frame.payload[2];
        let expected = *self.request_id.lock().expect("request id lock poisoned");
        if expected != Some(echoed) {
            // Assignment meant for a different device on the bus.
            return ArbitrationAction::Ignored;
        }
        self.address.set(assigned);
        *self.request_id.lock().expect("request id lock poisoned") = None;
        log::info!("assigned bus address 0x{assigned:02X}");
        ArbitrationAction::Reply(pack_frame(
            assigned,
            CONTROL_DEVICE,
            PTYPE_ASSIGNMENT_ACK,
            &[],
        ))
    }

    fn handle_presence_query(&self, frame: &SpaFrame) -> ArbitrationAction {
        if !self.addressed_to_us(frame) {
            return ArbitrationAction::Ignored;
        }
        ArbitrationAction::Reply(pack_frame(
            self.address.get(),
            CONTROL_DEVICE,
            PTYPE_PRESENCE_REPLY,
            &[VERSION_MAJOR, VERSION_MINOR, VERSION_BUILD],
        ))
    }

    fn handle_device_poll(
        &self,
        frame: &SpaFrame,
        encoder: &CommandEncoder,
    ) -> ArbitrationAction {
        if !self.addressed_to_us(frame) {
            return ArbitrationAction::Ignored;
        }
        if let Some(command) = encoder.dequeue_for_poll() {
            log::debug!(
                "transmitting queued command in poll slot (originator {:?})",
                command.originator
            );
            return ArbitrationAction::Reply(command.frame);
        }
        self.log_idle_throttled();
        ArbitrationAction::Reply(pack_frame(
            self.address.get(),
            CONTROL_DEVICE,
            PTYPE_NOTHING_TO_SEND,
            &[],
        ))
    }

    fn addressed_to_us(&self, frame: &SpaFrame) -> bool {
        self.address.is_assigned() && frame.address == self.address.get()
    }

    /// At most one idle log line per minute; an idle bus polls constantly.
    fn log_idle_throttled(&self) {
        let mut last = self.last_idle_log.lock().expect("idle log lock poisoned");
        let now = Instant::now();
        let due = match *last {
            Some(at) => now.duration_since(at).as_secs() >= IDLE_LOG_THROTTLE_SECS,
            None => true,
        };
        if due {
            log::debug!("device poll received, nothing queued to send");
            *last = Some(now);
        }
    }
}
