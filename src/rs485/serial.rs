//! # RS485 Serial Communication
//!
//! This module provides the serial transport for the spa bus: opening the
//! port, writing reply frames, and turning the raw byte stream into
//! validated frames through the delimiter-scanning accumulator. The handle
//! is generic over the underlying port so the session loop can run against
//! the mock port in tests.

use crate::error::SpaError;
use crate::rs485::frame::{FrameAccumulator, SpaFrame};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

/// Configuration for the serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: 115_200,
            read_timeout: Duration::from_millis(500),
        }
    }
}

/// Handle to the spa bus serial connection.
pub struct SpaDeviceHandle<P> {
    port: P,
    accumulator: FrameAccumulator,
    read_timeout: Duration,
    read_buf: Vec<u8>,
}

impl SpaDeviceHandle<tokio_serial::SerialStream> {
    /// Opens the serial port with spa bus settings (8N1).
    pub fn connect(port_name: &str, config: SerialConfig) -> Result<Self, SpaError> {
        let port = tokio_serial::new(port_name, config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(config.read_timeout)
            .open_native_async()
            .map_err(|e| SpaError::SerialPortError(e.to_string()))?;
        Ok(Self::from_port(port, config.read_timeout))
    }
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send> SpaDeviceHandle<P> {
    /// Wraps an already opened port (used by tests with the mock port).
    pub fn from_port(port: P, read_timeout: Duration) -> Self {
        SpaDeviceHandle {
            port,
            accumulator: FrameAccumulator::new(),
            read_timeout,
            read_buf: vec![0u8; 512],
        }
    }

    /// Returns the next validated frame from the bus, or `None` if the read
    /// timeout elapses first. Invalid bytes are dropped by the accumulator.
    pub async fn recv_frame(&mut self) -> Result<Option<SpaFrame>, SpaError> {
        loop {
            if let Some(frame) = self.accumulator.next_frame() {
                return Ok(Some(frame));
            }
            let read = tokio::time::timeout(self.read_timeout, self.port.read(&mut self.read_buf));
            match read.await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(SpaError::SerialPortError(e.to_string())),
                Ok(Ok(0)) => {
                    return Err(SpaError::SerialPortError("serial port closed".into()))
                }
                Ok(Ok(n)) => {
                    let n = n.min(self.read_buf.len());
                    let chunk = self.read_buf[..n].to_vec();
                    self.accumulator.extend(&chunk);
                }
            }
        }
    }

    /// Writes a complete frame onto the bus and flushes.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), SpaError> {
        self.port
            .write_all(bytes)
            .await
            .map_err(|e| SpaError::SerialPortError(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| SpaError::SerialPortError(e.to_string()))
    }

    /// Frames dropped by the accumulator since the handle was created.
    pub fn dropped_frames(&self) -> u64 {
        self.accumulator.dropped
    }
}
