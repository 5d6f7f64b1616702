//! # Gateway Startup Configuration
//!
//! This module loads the gateway's startup configuration from a Java-style
//! properties file (`key=value` per line, `#` comments). Missing required
//! settings are the only fatal condition in the gateway: they prevent
//! startup entirely rather than being retried.

use crate::dialect::DialectKind;
use crate::error::SpaError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Resolved gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Serial port device path, e.g. "/dev/ttyS0"
    pub serial_port: String,
    /// Serial baud rate; spa controllers run at 115200
    pub baudrate: u32,
    /// Gateway serial number used in MQTT topics and uplink headers
    pub gateway_serial: String,
    /// MQTT broker hostname
    pub broker_host: String,
    /// MQTT broker port
    pub broker_port: u16,
    /// Optional broker credentials
    pub broker_username: Option<String>,
    pub broker_password: Option<String>,
    /// Topic base; uplink publishes to `{base}/uplink`, downlink subscribes
    /// to `{base}/downlink/{gateway_serial}`
    pub topic_base: String,
    /// Controller wire dialect
    pub dialect: DialectKind,
    /// Seconds between uplink harvest ticks
    pub harvest_interval_secs: u64,
}

impl GatewayConfig {
    /// Loads configuration from a properties file at `path`.
    pub fn load(path: &Path) -> Result<GatewayConfig, SpaError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SpaError::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        Self::from_properties(&parse_properties(&text))
    }

    /// Builds configuration from an already-parsed property map.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<GatewayConfig, SpaError> {
        let required = |key: &str| -> Result<String, SpaError> {
            props
                .get(key)
                .cloned()
                .ok_or_else(|| SpaError::ConfigError(format!("missing required property: {key}")))
        };

        let dialect = match required("spa.dialect")?.as_str() {
            "ngsc" => DialectKind::Ngsc,
            "jacuzzi" => DialectKind::Jacuzzi,
            other => {
                return Err(SpaError::ConfigError(format!(
                    "unknown spa.dialect: {other} (expected ngsc or jacuzzi)"
                )))
            }
        };

        let broker_port = props
            .get("mqtt.port")
            .map(|s| s.parse::<u16>())
            .transpose()
            .map_err(|e| SpaError::ConfigError(format!("invalid mqtt.port: {e}")))?
            .unwrap_or(1883);

        let baudrate = props
            .get("serial.baudrate")
            .map(|s| s.parse::<u32>())
            .transpose()
            .map_err(|e| SpaError::ConfigError(format!("invalid serial.baudrate: {e}")))?
            .unwrap_or(115_200);

        let harvest_interval_secs = props
            .get("uplink.harvest_interval_secs")
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|e| SpaError::ConfigError(format!("invalid harvest interval: {e}")))?
            .unwrap_or(3);

        Ok(GatewayConfig {
            serial_port: required("serial.port")?,
            baudrate,
            gateway_serial: required("gateway.serial")?,
            broker_host: required("mqtt.host")?,
            broker_port,
            broker_username: props.get("mqtt.username").cloned(),
            broker_password: props.get("mqtt.password").cloned(),
            topic_base: props
                .get("mqtt.topic_base")
                .cloned()
                .unwrap_or_else(|| "spa".to_string()),
            dialect,
            harvest_interval_secs,
        })
    }

    /// Topic this gateway publishes uplink messages to.
    pub fn uplink_topic(&self) -> String {
        format!("{}/uplink", self.topic_base)
    }

    /// Topic this gateway subscribes to for downlink commands.
    pub fn downlink_topic(&self) -> String {
        format!("{}/downlink/{}", self.topic_base, self.gateway_serial)
    }
}

/// Parses `key=value` lines into a property map, skipping blanks and comments.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_props() -> HashMap<String, String> {
        parse_properties(
            "serial.port=/dev/ttyS0\n\
             gateway.serial=GW-0001\n\
             mqtt.host=broker.local\n\
             spa.dialect=ngsc\n",
        )
    }

    #[test]
    fn test_required_properties() {
        let config = GatewayConfig::from_properties(&base_props()).unwrap();
        assert_eq!(config.serial_port, "/dev/ttyS0");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.baudrate, 115_200);
        assert_eq!(config.uplink_topic(), "spa/uplink");
        assert_eq!(config.downlink_topic(), "spa/downlink/GW-0001");
    }

    #[test]
    fn test_missing_property_is_fatal() {
        let mut props = base_props();
        props.remove("mqtt.host");
        assert!(GatewayConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let mut props = base_props();
        props.insert("spa.dialect".into(), "acme".into());
        assert!(GatewayConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let props = parse_properties("# comment\n\nmqtt.host = broker\n");
        assert_eq!(props.get("mqtt.host").map(String::as_str), Some("broker"));
    }
}
