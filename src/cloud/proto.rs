//! # Cloud Message Envelope
//!
//! Protocol-buffer message types exchanged with the cloud service. Every
//! MQTT message body is length-delimited: `[envelope header][uplink or
//! downlink sub-header][typed payload]`, each segment individually
//! length-delimited protobuf. The same envelope shape is used in both
//! directions; only the sub-header differs.

use crate::error::SpaError;
use crate::model::components::{Component, Components};
use crate::model::fault_log::{FaultLogBatch, FaultLogEntry};
use crate::model::state::SpaState;
use bytes::{Buf, BytesMut};
use prost::Message;

/// Common envelope header, first segment of every message body.
#[derive(Clone, PartialEq, Message)]
pub struct EnvelopeHeader {
    /// Gateway serial number.
    #[prost(string, tag = "1")]
    pub hardware_id: String,
    /// Correlates a downlink request with its acknowledgment uplink.
    #[prost(string, tag = "2")]
    pub originator: String,
    /// Sender clock, milliseconds since the epoch.
    #[prost(uint64, tag = "3")]
    pub sent_at_ms: u64,
}

/// Uplink message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum UplinkCommandType {
    UplinkUnknown = 0,
    SpaState = 1,
    FaultLogs = 2,
    Registration = 3,
    DownlinkAck = 4,
}

/// Second segment of an uplink body.
#[derive(Clone, PartialEq, Message)]
pub struct UplinkHeader {
    #[prost(enumeration = "UplinkCommandType", tag = "1")]
    pub command: i32,
}

/// Downlink message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum DownlinkCommandType {
    DownlinkUnknown = 0,
    Request = 1,
    RegistrationResponse = 2,
}

/// Second segment of a downlink body.
#[derive(Clone, PartialEq, Message)]
pub struct DownlinkHeader {
    #[prost(enumeration = "DownlinkCommandType", tag = "1")]
    pub command: i32,
}

/// Normalized component entry in a state uplink.
#[derive(Clone, PartialEq, Message)]
pub struct ComponentMessage {
    /// Component kind, e.g. "PUMP", "LIGHT", "CIRCULATION_PUMP".
    #[prost(string, tag = "1")]
    pub kind: String,
    /// 1-based slot for multi-instance kinds.
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// Current state name.
    #[prost(string, tag = "3")]
    pub state: String,
    /// States the component can be commanded into.
    #[prost(string, repeated, tag = "4")]
    pub available_states: Vec<String>,
}

/// Controller summary carried in a state uplink.
#[derive(Clone, PartialEq, Message)]
pub struct ControllerMessage {
    #[prost(uint32, tag = "1")]
    pub hour: u32,
    #[prost(uint32, tag = "2")]
    pub minute: u32,
    #[prost(sint32, tag = "3")]
    pub target_water_temperature: i32,
    #[prost(sint32, tag = "4")]
    pub current_water_temp: i32,
    #[prost(bool, tag = "5")]
    pub current_temp_valid: bool,
    #[prost(bool, tag = "6")]
    pub celsius: bool,
    #[prost(string, tag = "7")]
    pub heater_mode: String,
    #[prost(string, tag = "8")]
    pub temperature_range: String,
    #[prost(bool, tag = "9")]
    pub heating: bool,
    #[prost(bool, tag = "10")]
    pub panel_locked: bool,
    #[prost(bool, tag = "11")]
    pub settings_locked: bool,
    #[prost(uint32, tag = "12")]
    pub error_code: u32,
    #[prost(uint32, tag = "13")]
    pub display_code: u32,
    #[prost(uint32, tag = "14")]
    pub ui_code: u32,
    #[prost(uint32, tag = "15")]
    pub reminder_code: u32,
}

/// Full state snapshot uplink payload.
#[derive(Clone, PartialEq, Message)]
pub struct SpaStateMessage {
    #[prost(message, optional, tag = "1")]
    pub controller: Option<ControllerMessage>,
    #[prost(message, repeated, tag = "2")]
    pub components: Vec<ComponentMessage>,
    #[prost(string, tag = "3")]
    pub model: String,
    #[prost(string, tag = "4")]
    pub firmware_version: String,
    #[prost(uint64, tag = "5")]
    pub last_update_ms: u64,
}

/// One fault-log entry in an uplink batch.
#[derive(Clone, PartialEq, Message)]
pub struct FaultLogEntryMessage {
    #[prost(uint32, tag = "1")]
    pub number: u32,
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(uint64, tag = "3")]
    pub occurred_at_ms: u64,
    #[prost(sint32, tag = "4")]
    pub target_temp: i32,
    #[prost(sint32, tag = "5")]
    pub sensor_a_temp: i32,
    #[prost(sint32, tag = "6")]
    pub sensor_b_temp: i32,
    #[prost(bool, tag = "7")]
    pub celsius: bool,
}

/// Fault-log batch uplink payload.
#[derive(Clone, PartialEq, Message)]
pub struct FaultLogsMessage {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<FaultLogEntryMessage>,
}

/// Gateway registration uplink payload.
#[derive(Clone, PartialEq, Message)]
pub struct RegistrationMessage {
    #[prost(string, tag = "1")]
    pub serial: String,
    #[prost(string, tag = "2")]
    pub gateway_version: String,
    #[prost(string, tag = "3")]
    pub dialect: String,
    #[prost(string, tag = "4")]
    pub model: String,
}

/// Acknowledgment uplink for a mutating downlink request.
#[derive(Clone, PartialEq, Message)]
pub struct DownlinkAcknowledge {
    #[prost(string, tag = "1")]
    pub originator: String,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(string, tag = "3")]
    pub detail: String,
}

/// Downlink request kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    RequestUnknown = 0,
    SetTemperature = 1,
    ButtonCode = 2,
    Light = 3,
    FilterCycle = 4,
    SetTime = 5,
    PanelRequest = 6,
}

/// One key/value pair of request metadata.
#[derive(Clone, PartialEq, Message)]
pub struct RequestMetadata {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// Downlink command request payload.
#[derive(Clone, PartialEq, Message)]
pub struct Request {
    #[prost(enumeration = "RequestType", tag = "1")]
    pub request_type: i32,
    #[prost(message, repeated, tag = "2")]
    pub metadata: Vec<RequestMetadata>,
}

impl Request {
    /// Looks up one metadata value by name.
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value.as_str())
    }
}

/// Cloud reply to a registration uplink.
#[derive(Clone, PartialEq, Message)]
pub struct RegistrationResponse {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    #[prost(string, tag = "2")]
    pub detail: String,
}

/// Decoded downlink payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkPayload {
    Request(Request),
    RegistrationResponse(RegistrationResponse),
}

/// Encodes the three length-delimited segments of an uplink body.
pub fn encode_uplink(
    header: &EnvelopeHeader,
    command: UplinkCommandType,
    payload: &[u8],
) -> Vec<u8> {
    let uplink_header = UplinkHeader { command: command as i32 };
    let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len() + 16);
    header
        .encode_length_delimited(&mut buf)
        .expect("BytesMut encode cannot fail");
    uplink_header
        .encode_length_delimited(&mut buf)
        .expect("BytesMut encode cannot fail");
    prost::encoding::encode_varint(payload.len() as u64, &mut buf);
    buf.extend_from_slice(payload);
    buf.to_vec()
}

/// Decodes a downlink body into its envelope header and typed payload.
pub fn decode_downlink(body: &[u8]) -> Result<(EnvelopeHeader, DownlinkPayload), SpaError> {
    let mut buf = body;
    let header = EnvelopeHeader::decode_length_delimited(&mut buf)?;
    let sub = DownlinkHeader::decode_length_delimited(&mut buf)?;
    let payload_len = prost::encoding::decode_varint(&mut buf)? as usize;
    if buf.remaining() < payload_len {
        return Err(SpaError::DownlinkDecodeError(format!(
            "truncated downlink payload: {} < {payload_len}",
            buf.remaining()
        )));
    }
    let payload_bytes = &buf[..payload_len];
    let payload = match DownlinkCommandType::try_from(sub.command) {
        Ok(DownlinkCommandType::Request) => {
            DownlinkPayload::Request(Request::decode(payload_bytes)?)
        }
        Ok(DownlinkCommandType::RegistrationResponse) => {
            DownlinkPayload::RegistrationResponse(RegistrationResponse::decode(payload_bytes)?)
        }
        _ => {
            return Err(SpaError::DownlinkDecodeError(format!(
                "unknown downlink command {}",
                sub.command
            )))
        }
    };
    Ok((header, payload))
}

fn component_entries(kind: &str, slots: &[Option<Component>]) -> Vec<ComponentMessage> {
    slots
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| {
            slot.as_ref().map(|component| ComponentMessage {
                kind: kind.to_string(),
                port: i as u32 + 1,
                state: format!("{:?}", component.state).to_uppercase(),
                available_states: component
                    .available_states
                    .iter()
                    .map(|s| format!("{s:?}").to_uppercase())
                    .collect(),
            })
        })
        .collect()
}

fn all_components(components: &Components) -> Vec<ComponentMessage> {
    let mut out = Vec::new();
    out.extend(component_entries("PUMP", &components.pumps));
    out.extend(component_entries(
        "CIRCULATION_PUMP",
        std::slice::from_ref(&components.circulation_pump),
    ));
    out.extend(component_entries("BLOWER", &components.blowers));
    out.extend(component_entries("LIGHT", &components.lights));
    out.extend(component_entries("HEATER", &components.heaters));
    out.extend(component_entries("OZONE", std::slice::from_ref(&components.ozone)));
    out.extend(component_entries(
        "MICROSILK",
        std::slice::from_ref(&components.microsilk),
    ));
    out.extend(component_entries("AUX", &components.aux));
    out.extend(component_entries("MISTER", &components.misters));
    out
}

impl From<&SpaState> for SpaStateMessage {
    fn from(state: &SpaState) -> SpaStateMessage {
        let controller = state.controller.as_ref().map(|c| ControllerMessage {
            hour: c.hour as u32,
            minute: c.minute as u32,
            target_water_temperature: c.target_water_temperature,
            current_water_temp: c.current_water_temp.unwrap_or(0),
            current_temp_valid: c.current_water_temp.is_some(),
            celsius: c.celsius,
            heater_mode: format!("{:?}", c.heater_mode).to_uppercase(),
            temperature_range: format!("{:?}", c.temperature_range).to_uppercase(),
            heating: c.heating,
            panel_locked: c.panel_locked,
            settings_locked: c.settings_locked,
            error_code: c.error_code as u32,
            display_code: c.display_code as u32,
            ui_code: c.ui_code as u32,
            reminder_code: c.reminder_code as u32,
        });
        SpaStateMessage {
            controller,
            components: state
                .components
                .as_ref()
                .map(all_components)
                .unwrap_or_default(),
            model: state
                .system_info
                .as_ref()
                .map(|i| i.model.clone())
                .unwrap_or_default(),
            firmware_version: state
                .system_info
                .as_ref()
                .map(|i| format!("{}.{}.{}", i.version_major, i.version_minor, i.version_build))
                .unwrap_or_default(),
            last_update_ms: state
                .last_update
                .map(|t| t.timestamp_millis() as u64)
                .unwrap_or(0),
        }
    }
}

impl From<&FaultLogEntry> for FaultLogEntryMessage {
    fn from(entry: &FaultLogEntry) -> FaultLogEntryMessage {
        FaultLogEntryMessage {
            number: entry.number as u32,
            code: entry.code as u32,
            occurred_at_ms: entry.timestamp.timestamp_millis() as u64,
            target_temp: entry.target_temp,
            sensor_a_temp: entry.sensor_a_temp,
            sensor_b_temp: entry.sensor_b_temp,
            celsius: entry.celsius,
        }
    }
}

impl From<&FaultLogBatch> for FaultLogsMessage {
    fn from(batch: &FaultLogBatch) -> FaultLogsMessage {
        FaultLogsMessage {
            entries: batch.entries.iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uplink_envelope_layout() {
        let header = EnvelopeHeader {
            hardware_id: "GW-1".into(),
            originator: "orig".into(),
            sent_at_ms: 42,
        };
        let payload = RegistrationMessage {
            serial: "GW-1".into(),
            gateway_version: "1.0.0".into(),
            dialect: "ngsc".into(),
            model: String::new(),
        }
        .encode_to_vec();
        let body = encode_uplink(&header, UplinkCommandType::Registration, &payload);

        let mut buf = body.as_slice();
        let decoded_header = EnvelopeHeader::decode_length_delimited(&mut buf).unwrap();
        assert_eq!(decoded_header, header);
        let sub = UplinkHeader::decode_length_delimited(&mut buf).unwrap();
        assert_eq!(sub.command, UplinkCommandType::Registration as i32);
        let len = prost::encoding::decode_varint(&mut buf).unwrap() as usize;
        let decoded = RegistrationMessage::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.serial, "GW-1");
    }

    #[test]
    fn test_downlink_request_round_trip() {
        let header = EnvelopeHeader {
            hardware_id: "GW-1".into(),
            originator: "req-7".into(),
            sent_at_ms: 0,
        };
        let request = Request {
            request_type: RequestType::SetTemperature as i32,
            metadata: vec![RequestMetadata {
                name: "DESIREDTEMP".into(),
                value: "102".into(),
            }],
        };
        let mut body = BytesMut::new();
        header.encode_length_delimited(&mut body).unwrap();
        DownlinkHeader { command: DownlinkCommandType::Request as i32 }
            .encode_length_delimited(&mut body)
            .unwrap();
        let payload = request.encode_to_vec();
        prost::encoding::encode_varint(payload.len() as u64, &mut body);
        body.extend_from_slice(&payload);

        let (decoded_header, payload) = decode_downlink(&body).unwrap();
        assert_eq!(decoded_header.originator, "req-7");
        match payload {
            DownlinkPayload::Request(r) => {
                assert_eq!(r.request_type, RequestType::SetTemperature as i32);
                assert_eq!(r.meta("DESIREDTEMP"), Some("102"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_truncated_downlink_rejected() {
        let header = EnvelopeHeader::default();
        let mut body = BytesMut::new();
        header.encode_length_delimited(&mut body).unwrap();
        DownlinkHeader { command: DownlinkCommandType::Request as i32 }
            .encode_length_delimited(&mut body)
            .unwrap();
        prost::encoding::encode_varint(100, &mut body);
        assert!(decode_downlink(&body).is_err());
    }
}
