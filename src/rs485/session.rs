//! # RS485 Session Loop
//!
//! Owns the serial port and runs the per-cycle pipeline: receive a frame,
//! offer it to bus arbitration, forward telemetry to the active dialect
//! decoder, and answer device polls from the pending command queue. Between
//! frames it performs bus maintenance: requesting missing configuration
//! frames until the decoder has seen them all, and requesting the fault-log
//! entry the gap-fill cache says is missing.
//!
//! No error terminates the loop. Frame errors are dropped by the codec
//! layer, decode errors are logged, and serial transport errors back off
//! briefly and retry; only the cooperative stop flag ends the session.

use crate::dialect::{DecodeContext, SpaDialect};
use crate::error::SpaError;
use crate::model::fault_log::FaultLogCache;
use crate::model::state::SharedSpaState;
use crate::rs485::arbitration::{ArbitrationAction, BusArbitration};
use crate::rs485::commands::{
    CommandEncoder, REQ_DEVICE_CONFIG, REQ_FAULT_LOG, REQ_FILTER_CYCLES, REQ_SETUP_PARAMS,
    REQ_SYSTEM_INFO,
};
use crate::rs485::serial::SpaDeviceHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};

/// Minimum spacing between maintenance panel requests.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Backoff after a serial transport error before the next cycle.
const TRANSPORT_BACKOFF: Duration = Duration::from_millis(500);

/// The RS485 session loop.
pub struct Rs485Session<P> {
    handle: SpaDeviceHandle<P>,
    arbitration: BusArbitration,
    dialect: Box<dyn SpaDialect>,
    encoder: Arc<CommandEncoder>,
    state: SharedSpaState,
    fault_log: Arc<FaultLogCache>,
    running: Arc<AtomicBool>,
    last_maintenance: Option<Instant>,
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send> Rs485Session<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: SpaDeviceHandle<P>,
        arbitration: BusArbitration,
        dialect: Box<dyn SpaDialect>,
        encoder: Arc<CommandEncoder>,
        state: SharedSpaState,
        fault_log: Arc<FaultLogCache>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Rs485Session {
            handle,
            arbitration,
            dialect,
            encoder,
            state,
            fault_log,
            running,
            last_maintenance: None,
        }
    }

    /// Runs until the stop flag clears. Every cycle is wrapped so that no
    /// failure propagates out of the loop.
    pub async fn run(mut self) {
        log::info!("RS485 session loop starting");
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.cycle().await {
                log::warn!("session cycle error: {e}");
                tokio::time::sleep(TRANSPORT_BACKOFF).await;
            }
        }
        log::info!("RS485 session loop stopped");
    }

    /// One receive/dispatch/maintenance cycle. Public for tests.
    pub async fn cycle(&mut self) -> Result<(), SpaError> {
        match self.handle.recv_frame().await? {
            Some(frame) => match self.arbitration.handle_frame(&frame, &self.encoder) {
                ArbitrationAction::Reply(bytes) => {
                    self.handle.send_bytes(&bytes).await?;
                }
                ArbitrationAction::Telemetry => {
                    let ctx = DecodeContext {
                        state: &self.state,
                        fault_log: &self.fault_log,
                        encoder: &self.encoder,
                    };
                    if let Err(e) = self.dialect.process(&frame, &ctx) {
                        // Corrupt or truncated telemetry is routine on a
                        // shared bus; drop it and keep cycling.
                        log::debug!(
                            "dropping undecodable frame type 0x{:02X}: {e}",
                            frame.packet_type
                        );
                    }
                }
                ArbitrationAction::Ignored => {}
            },
            None => {}
        }
        self.maintenance();
        Ok(())
    }

    /// Requests missing configuration or fault-log entries, rate limited so
    /// an unanswered request is not duplicated every cycle.
    fn maintenance(&mut self) {
        if self.encoder.pending_len() > 0 {
            return;
        }
        let due = match self.last_maintenance {
            Some(at) => at.elapsed() >= MAINTENANCE_INTERVAL,
            None => true,
        };
        if !due {
            return;
        }

        let snapshot = self.state.snapshot();
        if !self.dialect.has_all_config_state(&snapshot) {
            self.last_maintenance = Some(Instant::now());
            if let Err(e) = self.encoder.send_panel_request(
                REQ_DEVICE_CONFIG | REQ_FILTER_CYCLES | REQ_SYSTEM_INFO | REQ_SETUP_PARAMS,
                None,
            ) {
                log::warn!("config panel request dropped: {e}");
            }
        } else if let Some(missing) = self.fault_log.next_to_fetch() {
            self.last_maintenance = Some(Instant::now());
            if let Err(e) = self.encoder.send_panel_request(REQ_FAULT_LOG, Some(missing)) {
                log::warn!("fault log request dropped: {e}");
            }
        }
    }
}
