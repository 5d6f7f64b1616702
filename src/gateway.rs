//! # Gateway Lifecycle
//!
//! Wires the RS485 session, the uplink dispatcher and the downlink
//! subscriber together and owns startup/shutdown ordering. The session loop
//! runs as an async task on the runtime; the two MQTT sides run on plain
//! threads because the broker client blocks on acknowledgments. All three
//! share one cooperative stop flag.
//!
//! Downlink requests are translated here into command-encoder calls, gated
//! by decoder readiness, and every mutating request is answered with an
//! acknowledgment uplink carrying the request's originator token.

use crate::cloud::downlink::{DownlinkHandler, DownlinkSubscriber};
use crate::cloud::proto::{
    DownlinkAcknowledge, DownlinkPayload, EnvelopeHeader, FaultLogsMessage, RegistrationMessage,
    Request, RequestType, SpaStateMessage, UplinkCommandType,
};
use crate::cloud::uplink::{QueuedUplink, UplinkDispatcher};
use crate::config::GatewayConfig;
use crate::constants::{VERSION_BUILD, VERSION_MAJOR, VERSION_MINOR};
use crate::dialect::SpaDialect;
use crate::error::SpaError;
use crate::model::fault_log::FaultLogCache;
use crate::model::state::SharedSpaState;
use crate::rs485::arbitration::{BusAddress, BusArbitration};
use crate::rs485::commands::{CommandEncoder, FilterCycleRequest};
use crate::rs485::serial::{SerialConfig, SpaDeviceHandle};
use crate::rs485::session::Rs485Session;
use chrono::{DateTime, Utc};
use prost::Message;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Top-level gateway handle.
pub struct Gateway {
    config: GatewayConfig,
    running: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Gateway {
        Gateway {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared stop flag; clearing it winds down every loop.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Runs the gateway until interrupted.
    pub async fn run(self) -> Result<(), SpaError> {
        let config = self.config;
        let running = self.running;

        let state = SharedSpaState::new();
        let fault_log = Arc::new(FaultLogCache::new());
        let address = Arc::new(BusAddress::new());
        let encoder = Arc::new(CommandEncoder::new(
            config.dialect,
            address.clone(),
            &config.gateway_serial,
        ));

        let handle = SpaDeviceHandle::connect(
            &config.serial_port,
            SerialConfig {
                baudrate: config.baudrate,
                ..Default::default()
            },
        )?;
        let session = Rs485Session::new(
            handle,
            BusArbitration::new(address),
            config.dialect.decoder(),
            encoder.clone(),
            state.clone(),
            fault_log.clone(),
            running.clone(),
        );
        let session_task = tokio::spawn(session.run());

        let uplink = Arc::new(Mutex::new(UplinkDispatcher::new(config.clone())));

        let handler = Arc::new(GatewayDownlinkHandler {
            encoder,
            state: state.clone(),
            dialect: config.dialect.decoder(),
            uplink: uplink.clone(),
            hardware_id: config.gateway_serial.clone(),
        });
        let subscriber =
            DownlinkSubscriber::new(config.clone(), handler, running.clone());
        let downlink_thread = thread::Builder::new()
            .name("downlink".into())
            .spawn(move || subscriber.run())
            .map_err(|e| SpaError::Other(format!("cannot spawn downlink thread: {e}")))?;

        let harvest = HarvestLoop {
            config: config.clone(),
            state,
            fault_log,
            uplink: uplink.clone(),
            running: running.clone(),
        };
        let harvest_thread = thread::Builder::new()
            .name("harvest".into())
            .spawn(move || harvest.run())
            .map_err(|e| SpaError::Other(format!("cannot spawn harvest thread: {e}")))?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| SpaError::Other(format!("signal handler failed: {e}")))?;
        log::info!("shutdown requested");
        running.store(false, Ordering::SeqCst);

        let _ = session_task.await;
        let join_result = tokio::task::spawn_blocking(move || {
            let _ = harvest_thread.join();
            let _ = downlink_thread.join();
        })
        .await;
        if join_result.is_err() {
            log::warn!("worker threads did not join cleanly");
        }
        uplink.lock().expect("uplink lock poisoned").shutdown();
        log::info!("gateway stopped");
        Ok(())
    }
}

/// Periodically publishes state snapshots and drains the fault-log cache.
struct HarvestLoop {
    config: GatewayConfig,
    state: SharedSpaState,
    fault_log: Arc<FaultLogCache>,
    uplink: Arc<Mutex<UplinkDispatcher>>,
    running: Arc<AtomicBool>,
}

impl HarvestLoop {
    fn run(self) {
        log::info!("uplink harvest starting");
        self.send_registration();

        let interval = Duration::from_secs(self.config.harvest_interval_secs.max(1));
        let mut last_published: Option<DateTime<Utc>> = None;
        while self.running.load(Ordering::SeqCst) {
            thread::sleep(interval);

            let snapshot = self.state.snapshot();
            if snapshot.last_update.is_some() && snapshot.last_update != last_published {
                let payload = SpaStateMessage::from(snapshot.as_ref()).encode_to_vec();
                self.publish(UplinkCommandType::SpaState, payload);
                last_published = snapshot.last_update;
            }

            if self.fault_log.has_unsent() {
                if let Some(batch) = self.fault_log.take_unsent_batch() {
                    log::info!("uplinking {} fault log entries", batch.entries.len());
                    let payload = FaultLogsMessage::from(&batch).encode_to_vec();
                    self.publish(UplinkCommandType::FaultLogs, payload);
                }
            }
        }
        log::info!("uplink harvest stopped");
    }

    /// Announces this gateway to the cloud once at startup.
    fn send_registration(&self) {
        let snapshot = self.state.snapshot();
        let payload = RegistrationMessage {
            serial: self.config.gateway_serial.clone(),
            gateway_version: format!("{VERSION_MAJOR}.{VERSION_MINOR}.{VERSION_BUILD}"),
            dialect: format!("{:?}", self.config.dialect).to_lowercase(),
            model: snapshot
                .system_info
                .as_ref()
                .map(|i| i.model.clone())
                .unwrap_or_default(),
        }
        .encode_to_vec();
        self.publish(UplinkCommandType::Registration, payload);
    }

    fn publish(&self, command: UplinkCommandType, payload: Vec<u8>) {
        let uplink = QueuedUplink::new(&self.config.gateway_serial, "", command, payload);
        self.uplink
            .lock()
            .expect("uplink lock poisoned")
            .publish(uplink, true);
    }
}

/// Translates decoded downlink messages into command-encoder calls.
struct GatewayDownlinkHandler {
    encoder: Arc<CommandEncoder>,
    state: SharedSpaState,
    dialect: Box<dyn SpaDialect>,
    uplink: Arc<Mutex<UplinkDispatcher>>,
    hardware_id: String,
}

impl DownlinkHandler for GatewayDownlinkHandler {
    fn handle_downlink(&self, header: &EnvelopeHeader, payload: DownlinkPayload) {
        match payload {
            DownlinkPayload::RegistrationResponse(response) => {
                if response.accepted {
                    log::info!("registration accepted: {}", response.detail);
                } else {
                    log::warn!("registration rejected: {}", response.detail);
                }
            }
            DownlinkPayload::Request(request) => {
                let result = self.handle_request(&request, &header.originator);
                let (success, detail) = match &result {
                    Ok(()) => (true, String::new()),
                    Err(e) => {
                        log::warn!("downlink request failed: {e}");
                        (false, e.to_string())
                    }
                };
                self.send_ack(&header.originator, success, detail);
            }
        }
    }
}

impl GatewayDownlinkHandler {
    fn handle_request(&self, request: &Request, originator: &str) -> Result<(), SpaError> {
        let request_type = RequestType::try_from(request.request_type).map_err(|_| {
            SpaError::DownlinkDecodeError(format!(
                "unknown request type {}",
                request.request_type
            ))
        })?;
        let snapshot = self.state.snapshot();

        // Configuration re-requests are safe before the decoder is caught
        // up; everything else needs decoded state and an unlocked panel.
        if request_type != RequestType::PanelRequest {
            self.dialect.verify_ready_for_commands(&snapshot)?;
        }
        let originator = Some(originator.to_string());

        match request_type {
            RequestType::SetTemperature => {
                let temp: i32 = meta_parse(request, "DESIREDTEMP")?;
                let celsius = snapshot
                    .controller
                    .as_ref()
                    .map(|c| c.celsius)
                    .unwrap_or(false);
                self.encoder.set_temperature(temp, celsius, originator)
            }
            RequestType::ButtonCode => {
                self.encoder
                    .send_button_code(meta_parse(request, "BUTTON")?, originator)
            }
            RequestType::Light => self.encoder.send_light_command(
                meta_parse(request, "LIGHT")?,
                meta_parse(request, "INTENSITY")?,
                originator,
            ),
            RequestType::FilterCycle => {
                self.encoder.send_filter_cycle_request(FilterCycleRequest {
                    cycle: meta_parse(request, "CYCLE")?,
                    enabled: meta_parse(request, "ENABLED")?,
                    start_hour: meta_parse(request, "STARTHOUR")?,
                    start_minute: meta_parse(request, "STARTMINUTE")?,
                    duration_hours: meta_parse(request, "DURATIONHOURS")?,
                    duration_minutes: meta_parse(request, "DURATIONMINUTES")?,
                    originator,
                })
            }
            RequestType::SetTime => {
                let military = match request.meta("MILITARY") {
                    Some(value) => value.parse::<bool>().map_err(|e| {
                        SpaError::DownlinkDecodeError(format!("invalid MILITARY: {e}"))
                    })?,
                    None => snapshot
                        .controller
                        .as_ref()
                        .map(|c| c.military_time)
                        .unwrap_or(false),
                };
                self.encoder.update_spa_time(
                    meta_parse(request, "HOUR")?,
                    meta_parse(request, "MINUTE")?,
                    military,
                    originator,
                )
            }
            RequestType::PanelRequest => {
                let entry = match request.meta("FAULTENTRY") {
                    Some(value) => Some(value.parse::<u8>().map_err(|e| {
                        SpaError::DownlinkDecodeError(format!("invalid FAULTENTRY: {e}"))
                    })?),
                    None => None,
                };
                self.encoder
                    .send_panel_request(meta_parse(request, "REQUESTBITS")?, entry)
            }
            RequestType::RequestUnknown => Err(SpaError::DownlinkDecodeError(
                "request type unset".to_string(),
            )),
        }
    }

    fn send_ack(&self, originator: &str, success: bool, detail: String) {
        let payload = DownlinkAcknowledge {
            originator: originator.to_string(),
            success,
            detail,
        }
        .encode_to_vec();
        let uplink = QueuedUplink::new(
            &self.hardware_id,
            originator,
            UplinkCommandType::DownlinkAck,
            payload,
        );
        // Acks are not retried: a stale ack after renegotiation is worse
        // than a missing one.
        self.uplink
            .lock()
            .expect("uplink lock poisoned")
            .publish(uplink, false);
    }
}

/// Parses one required request metadata value.
fn meta_parse<T: FromStr>(request: &Request, name: &str) -> Result<T, SpaError>
where
    T::Err: std::fmt::Display,
{
    let value = request
        .meta(name)
        .ok_or_else(|| SpaError::DownlinkDecodeError(format!("missing metadata {name}")))?;
    value
        .parse()
        .map_err(|e| SpaError::DownlinkDecodeError(format!("invalid {name}: {e}")))
}
