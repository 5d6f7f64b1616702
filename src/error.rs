//! # Spa Gateway Error Handling
//!
//! This module defines the SpaError enum, which represents the different error
//! types that can occur in the spabus-rs crate. Frame errors are always
//! dropped by the session loop rather than propagated; protocol and queue
//! errors are surfaced to the command originator as negative acknowledgments;
//! transport errors trigger the owning reconnect state machine. Only
//! configuration errors are fatal, and only at startup.

use thiserror::Error;

/// Represents the different error types that can occur in the spa gateway.
#[derive(Debug, Error)]
pub enum SpaError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates an error when parsing an RS485 frame.
    #[error("Error parsing frame: {0}")]
    FrameParseError(String),

    /// Indicates a frame-check-sequence mismatch.
    #[error("Invalid checksum: expected {expected}, calculated {calculated}")]
    InvalidChecksum { expected: u8, calculated: u8 },

    /// Indicates a frame whose declared length disagrees with its byte count.
    #[error("Malformed frame length: declared {declared}, actual {actual}")]
    MalformedLength { declared: usize, actual: usize },

    /// Indicates a command was issued before the controller and component
    /// configuration have been decoded.
    #[error("Spa state not ready for commands: {0}")]
    StateNotReady(&'static str),

    /// Indicates the controller has its panel or settings lock engaged.
    #[error("Command rejected: {0} lock is engaged")]
    AccessLocked(&'static str),

    /// Indicates a requested target temperature outside the range any
    /// controller accepts.
    #[error("Requested temperature {requested} outside supported range {min}-{max} F")]
    TemperatureOutOfRange { requested: i32, min: i32, max: i32 },

    /// Indicates the pending-command or uplink-retry queue is saturated.
    #[error("{queue} queue full, command dropped")]
    QueueFull { queue: &'static str },

    /// Indicates an MQTT transport failure.
    #[error("MQTT error: {0}")]
    MqttError(String),

    /// Indicates the broker did not acknowledge a publish in time.
    #[error("Publish not acknowledged within {0} seconds")]
    PublishTimeout(u64),

    /// Indicates a malformed or unsupported downlink message.
    #[error("Downlink decode error: {0}")]
    DownlinkDecodeError(String),

    /// Indicates a missing or invalid startup configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl SpaError {
    /// True for errors the session loop must swallow rather than propagate.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            SpaError::FrameParseError(_)
                | SpaError::InvalidChecksum { .. }
                | SpaError::MalformedLength { .. }
        )
    }
}

impl From<prost::DecodeError> for SpaError {
    fn from(e: prost::DecodeError) -> Self {
        SpaError::DownlinkDecodeError(e.to_string())
    }
}

impl From<rumqttc::ClientError> for SpaError {
    fn from(e: rumqttc::ClientError) -> Self {
        SpaError::MqttError(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for SpaError {
    fn from(e: rumqttc::ConnectionError) -> Self {
        SpaError::MqttError(e.to_string())
    }
}
