//! Tests for loading the gateway startup configuration from a properties
//! file on disk.

use spabus_rs::dialect::DialectKind;
use spabus_rs::{GatewayConfig, SpaError};
use std::io::Write;

fn write_properties(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Tests that a complete properties file resolves with defaults applied.
#[test]
fn test_load_complete_file() {
    let file = write_properties(
        "# gateway config\n\
         serial.port=/dev/ttyS0\n\
         gateway.serial = GW-0042\n\
         mqtt.host=broker.example.com\n\
         mqtt.username=spa\n\
         mqtt.password=secret\n\
         spa.dialect=jacuzzi\n",
    );
    let config = GatewayConfig::load(file.path()).unwrap();
    assert_eq!(config.gateway_serial, "GW-0042");
    assert_eq!(config.dialect, DialectKind::Jacuzzi);
    assert_eq!(config.broker_port, 1883);
    assert_eq!(config.broker_username.as_deref(), Some("spa"));
    assert_eq!(config.downlink_topic(), "spa/downlink/GW-0042");
}

/// Tests that overridden defaults take effect.
#[test]
fn test_load_with_overrides() {
    let file = write_properties(
        "serial.port=/dev/ttyUSB1\n\
         serial.baudrate=57600\n\
         gateway.serial=GW-1\n\
         mqtt.host=localhost\n\
         mqtt.port=8883\n\
         mqtt.topic_base=tubs\n\
         spa.dialect=ngsc\n\
         uplink.harvest_interval_secs=10\n",
    );
    let config = GatewayConfig::load(file.path()).unwrap();
    assert_eq!(config.baudrate, 57_600);
    assert_eq!(config.broker_port, 8883);
    assert_eq!(config.harvest_interval_secs, 10);
    assert_eq!(config.uplink_topic(), "tubs/uplink");
}

/// Tests that a missing file is a configuration error, not a panic.
#[test]
fn test_missing_file_is_config_error() {
    let result = GatewayConfig::load(std::path::Path::new("/nonexistent/gateway.properties"));
    assert!(matches!(result, Err(SpaError::ConfigError(_))));
}

/// Tests that a file missing a required key names the key in the error.
#[test]
fn test_missing_required_key_named() {
    let file = write_properties("serial.port=/dev/ttyS0\nmqtt.host=localhost\nspa.dialect=ngsc\n");
    match GatewayConfig::load(file.path()) {
        Err(SpaError::ConfigError(message)) => assert!(message.contains("gateway.serial")),
        other => panic!("expected config error, got {other:?}"),
    }
}
