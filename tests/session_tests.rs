//! End-to-end session loop tests against the mock serial port: bus
//! discovery, telemetry decoding and poll-slot transmission, without
//! touching real hardware.

use spabus_rs::constants::{
    ADDRESS_UNASSIGNED, CONTROL_MASTER, PTYPE_ADDRESS_ASSIGNMENT, PTYPE_ADDRESS_REQUEST,
    PTYPE_ASSIGNMENT_ACK, PTYPE_DEVICE_POLL, PTYPE_NOTHING_TO_SEND, PTYPE_UNASSIGNED_POLL,
};
use spabus_rs::dialect::{ngsc, DialectKind};
use spabus_rs::model::components::{Components, FilterCycle};
use spabus_rs::model::controller::Controller;
use spabus_rs::model::fault_log::FaultLogCache;
use spabus_rs::model::state::SharedSpaState;
use spabus_rs::rs485::arbitration::{BusAddress, BusArbitration};
use spabus_rs::rs485::commands::{CommandEncoder, REQ_FAULT_LOG};
use spabus_rs::rs485::frame::{pack_frame, FrameAccumulator, SpaFrame};
use spabus_rs::rs485::serial::SpaDeviceHandle;
use spabus_rs::rs485::serial_mock::MockSerialPort;
use spabus_rs::rs485::session::Rs485Session;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

struct TestBus {
    port: MockSerialPort,
    session: Rs485Session<MockSerialPort>,
    address: Arc<BusAddress>,
    encoder: Arc<CommandEncoder>,
    state: SharedSpaState,
    fault_log: Arc<FaultLogCache>,
}

fn test_bus() -> TestBus {
    let port = MockSerialPort::new();
    let handle = SpaDeviceHandle::from_port(port.clone(), Duration::from_millis(20));
    let address = Arc::new(BusAddress::new());
    let encoder = Arc::new(CommandEncoder::new(
        DialectKind::Ngsc,
        address.clone(),
        "GW-TEST",
    ));
    let state = SharedSpaState::new();
    let fault_log = Arc::new(FaultLogCache::new());
    let session = Rs485Session::new(
        handle,
        BusArbitration::new(address.clone()),
        DialectKind::Ngsc.decoder(),
        encoder.clone(),
        state.clone(),
        fault_log.clone(),
        Arc::new(AtomicBool::new(true)),
    );
    TestBus {
        port,
        session,
        address,
        encoder,
        state,
        fault_log,
    }
}

/// Drains every complete frame the gateway has written to the mock port.
fn written_frames(port: &MockSerialPort) -> Vec<SpaFrame> {
    let mut acc = FrameAccumulator::new();
    acc.extend(&port.get_tx_data());
    let mut frames = Vec::new();
    while let Some(frame) = acc.next_frame() {
        frames.push(frame);
    }
    frames
}

fn master(address: u8, ptype: u8, payload: &[u8]) -> Vec<u8> {
    pack_frame(address, CONTROL_MASTER, ptype, payload)
}

/// Tests the discovery handshake: an unassigned poll draws an address
/// request, and the matching assignment is acknowledged and adopted.
#[tokio::test]
async fn test_discovery_handshake_over_bus() {
    let mut bus = test_bus();

    bus.port
        .queue_rx_data(&master(ADDRESS_UNASSIGNED, PTYPE_UNASSIGNED_POLL, &[]));
    bus.session.cycle().await.unwrap();

    let frames = written_frames(&bus.port);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].packet_type, PTYPE_ADDRESS_REQUEST);
    let id = [frames[0].payload[0], frames[0].payload[1]];
    bus.port.clear();

    bus.port.queue_rx_data(&master(
        ADDRESS_UNASSIGNED,
        PTYPE_ADDRESS_ASSIGNMENT,
        &[id[0], id[1], 0x17],
    ));
    bus.session.cycle().await.unwrap();

    let frames = written_frames(&bus.port);
    assert_eq!(frames[0].packet_type, PTYPE_ASSIGNMENT_ACK);
    assert_eq!(bus.address.get(), 0x17);
}

/// Tests that a device poll transmits the queued command and the next poll
/// answers clear-to-send.
#[tokio::test]
async fn test_device_poll_sends_queued_command() {
    let mut bus = test_bus();
    bus.address.set(0x17);
    // Mark configuration complete so maintenance stays quiet and the only
    // queued frame is ours.
    bus.state.update(|s| {
        s.controller = Some(Controller::default());
        let mut components = Components::default();
        components.filter_cycles[0] = Some(FilterCycle::default());
        s.components = Some(components);
    });
    bus.encoder.send_button_code(0x04, None).unwrap();

    bus.port
        .queue_rx_data(&master(0x17, PTYPE_DEVICE_POLL, &[]));
    bus.session.cycle().await.unwrap();
    let frames = written_frames(&bus.port);
    assert_eq!(frames[0].packet_type, ngsc::CMD_BUTTON_CODE);
    bus.port.clear();

    bus.port
        .queue_rx_data(&master(0x17, PTYPE_DEVICE_POLL, &[]));
    bus.session.cycle().await.unwrap();
    let frames = written_frames(&bus.port);
    assert_eq!(frames[0].packet_type, PTYPE_NOTHING_TO_SEND);
}

/// Tests that telemetry flowing through the session loop updates the
/// shared snapshot.
#[tokio::test]
async fn test_telemetry_updates_snapshot() {
    let mut bus = test_bus();
    bus.address.set(0x17);

    let mut panel = [0u8; 24];
    panel[1] = 100; // current temp, Fahrenheit
    panel[17] = 102; // target temp
    bus.port
        .queue_rx_data(&master(0xFF, ngsc::PANEL_UPDATE, &panel));
    bus.session.cycle().await.unwrap();

    let snapshot = bus.state.snapshot();
    let controller = snapshot.controller.as_ref().unwrap();
    assert_eq!(controller.current_water_temp, Some(100));
    assert_eq!(controller.target_water_temperature, 102);
    assert!(snapshot.last_update.is_some());
}

/// Tests that an idle cycle with missing configuration enqueues one
/// combined panel request, and only one.
#[tokio::test]
async fn test_maintenance_requests_missing_config() {
    let mut bus = test_bus();
    bus.address.set(0x17);

    bus.session.cycle().await.unwrap();
    assert_eq!(bus.encoder.pending_len(), 1);

    let command = bus.encoder.dequeue_for_poll().unwrap();
    let mut acc = FrameAccumulator::new();
    acc.extend(&command.frame);
    let frame = acc.next_frame().unwrap();
    assert_eq!(frame.packet_type, ngsc::CMD_PANEL_REQUEST);
    // Config, filter cycles, system info and setup params all requested.
    assert_eq!(frame.payload[0], 0x01 | 0x02 | 0x04 | 0x08);

    // The request is rate limited; an immediately following idle cycle
    // must not duplicate it.
    bus.session.cycle().await.unwrap();
    assert_eq!(bus.encoder.pending_len(), 0);
}

/// Tests that once configuration is complete, maintenance shifts to
/// requesting the fault-log entry the cache reports missing.
#[tokio::test]
async fn test_maintenance_requests_missing_fault_entry() {
    let mut bus = test_bus();
    bus.address.set(0x17);

    // Decode enough telemetry that configuration is considered complete.
    let mut panel = [0u8; 24];
    panel[1] = 100;
    bus.port
        .queue_rx_data(&master(0xFF, ngsc::PANEL_UPDATE, &panel));
    bus.session.cycle().await.unwrap();
    bus.port
        .queue_rx_data(&master(0xFF, ngsc::FILTER_CYCLE_INFO, &[8, 0, 2, 0, 0, 0, 0, 0]));
    bus.session.cycle().await.unwrap();

    // Two cached fault entries with a hole at 4.
    bus.port
        .queue_rx_data(&master(0xFF, ngsc::FAULT_LOG, &[0, 5, 16, 1, 10, 30, 0, 100, 98, 99]));
    bus.session.cycle().await.unwrap();
    while bus.encoder.dequeue_for_poll().is_some() {}
    assert_eq!(bus.fault_log.next_to_fetch(), Some(4));

    // Maintenance already fired this window; wait out the rate limit is
    // not practical here, so drive a fresh session over the same bus.
    let handle = SpaDeviceHandle::from_port(bus.port.clone(), Duration::from_millis(20));
    let mut fresh = Rs485Session::new(
        handle,
        BusArbitration::new(bus.address.clone()),
        DialectKind::Ngsc.decoder(),
        bus.encoder.clone(),
        bus.state.clone(),
        bus.fault_log.clone(),
        Arc::new(AtomicBool::new(true)),
    );
    fresh.cycle().await.unwrap();

    let command = bus.encoder.dequeue_for_poll().unwrap();
    let mut acc = FrameAccumulator::new();
    acc.extend(&command.frame);
    let frame = acc.next_frame().unwrap();
    assert_eq!(frame.packet_type, ngsc::CMD_PANEL_REQUEST);
    assert_eq!(frame.payload[0], REQ_FAULT_LOG);
    assert_eq!(frame.payload[1], 4);
}

/// Tests that a transport error surfaces from the cycle without leaving
/// the handle unusable for the next cycle.
#[tokio::test]
async fn test_serial_error_reported_not_fatal() {
    let mut bus = test_bus();
    bus.port
        .set_next_error(std::io::Error::new(std::io::ErrorKind::Other, "bus glitch"));
    assert!(bus.session.cycle().await.is_err());

    // Next cycle runs normally.
    bus.port
        .queue_rx_data(&master(ADDRESS_UNASSIGNED, PTYPE_UNASSIGNED_POLL, &[]));
    bus.session.cycle().await.unwrap();
    assert_eq!(written_frames(&bus.port)[0].packet_type, PTYPE_ADDRESS_REQUEST);
}
