//! # Controller Wire Dialects
//!
//! The physical spa controllers speak incompatible wire layouts for
//! identical semantics: the same logical events (panel update, device
//! config, system info, setup params, fault log, light status) arrive under
//! different packet-type codes and with different byte/bit offsets. Each
//! dialect implements the `SpaDialect` trait; the active dialect is selected
//! by configuration at startup, with no runtime discovery.

pub mod jacuzzi;
pub mod ngsc;

use crate::error::SpaError;
use crate::model::components::{Components, FilterCycle};
use crate::model::controller::Controller;
use crate::model::fault_log::{FaultLogCache, FaultLogEntry};
use crate::model::info::{SetupParams, SystemInfo};
use crate::model::state::{SharedSpaState, SpaState};
use crate::rs485::commands::CommandEncoder;
use crate::rs485::frame::SpaFrame;
use serde::{Deserialize, Serialize};

/// The supported controller dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// Generic multi-pump/multi-light controller family.
    Ngsc,
    /// Simplified single-vendor controller family.
    Jacuzzi,
}

impl DialectKind {
    /// Instantiates the decoder for this dialect.
    pub fn decoder(self) -> Box<dyn SpaDialect> {
        match self {
            DialectKind::Ngsc => Box::new(ngsc::NgscDialect),
            DialectKind::Jacuzzi => Box::new(jacuzzi::JacuzziDialect),
        }
    }
}

/// Telemetry packet-type codes for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodes {
    pub panel_update: u8,
    pub device_config: u8,
    pub system_info: u8,
    pub setup_params: u8,
    pub filter_cycle_info: u8,
    pub fault_log: u8,
    pub light_status: u8,
}

/// Outbound command packet-type codes for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct CommandCodes {
    pub set_temperature: u8,
    pub button_code: u8,
    pub set_time: u8,
    pub panel_request: u8,
    pub filter_cycle_set: u8,
    pub light_command: u8,
}

/// Collaborators a decoder needs while processing one frame.
pub struct DecodeContext<'a> {
    pub state: &'a SharedSpaState,
    pub fault_log: &'a FaultLogCache,
    pub encoder: &'a CommandEncoder,
}

/// Converts a device-native temperature byte to Fahrenheit.
///
/// Controllers report half-degree Celsius units when the panel is in Celsius
/// mode and whole Fahrenheit degrees otherwise. Conversion happens once, at
/// decode time, so every consumer sees Fahrenheit.
pub fn device_temp_to_fahrenheit(raw: u8, celsius: bool) -> i32 {
    if celsius {
        (raw as i32 * 9) / 10 + 32
    } else {
        raw as i32
    }
}

/// Raw byte meaning "temperature unknown" in panel updates.
pub const TEMP_UNKNOWN: u8 = 0xFF;

/// Shared decoder interface over the two wire dialects.
pub trait SpaDialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    /// Telemetry packet-type codes for this dialect.
    fn codes(&self) -> &'static PacketCodes;

    /// Outbound command packet-type codes for this dialect.
    fn command_codes(&self) -> &'static CommandCodes;

    /// Decodes a panel-update frame into a fresh controller snapshot with
    /// `last_update` set to the decode-time clock value.
    fn populate_controller(&self, frame: &SpaFrame) -> Result<Controller, SpaError>;

    /// Applies the live component states from a panel-update frame onto the
    /// previously decoded component capabilities. Slots absent from the
    /// capability set stay absent.
    fn populate_components(&self, previous: &Components, frame: &SpaFrame) -> Components;

    /// Decodes a device-config frame into the component capability set.
    /// Components whose capability bits are zero are cleared, not defaulted.
    /// Filter cycle slots are preserved from `previous`; they arrive in their
    /// own frame type.
    fn populate_device_configs(
        &self,
        frame: &SpaFrame,
        previous: Option<&Components>,
    ) -> Result<Components, SpaError>;

    /// Decodes a system-info frame.
    fn populate_system_info(&self, frame: &SpaFrame) -> Result<SystemInfo, SpaError>;

    /// Decodes a setup-params frame. `celsius` is taken from the current
    /// controller snapshot so the bounds convert like every other
    /// temperature.
    fn populate_setup_params(
        &self,
        frame: &SpaFrame,
        celsius: bool,
    ) -> Result<SetupParams, SpaError>;

    /// Decodes the filter cycle schedule frame.
    fn populate_filter_cycles(
        &self,
        frame: &SpaFrame,
    ) -> Result<[Option<FilterCycle>; 2], SpaError>;

    /// Decodes one fault-log frame into an entry.
    fn populate_fault_entry(&self, frame: &SpaFrame) -> Result<FaultLogEntry, SpaError>;

    /// Applies a light-status frame onto the component snapshot.
    fn apply_light_status(
        &self,
        frame: &SpaFrame,
        components: &mut Components,
    ) -> Result<(), SpaError>;

    /// Merges a deferred filter-cycle request onto the controller's most
    /// recently reported raw filter-cycle-info block, producing the full
    /// replacement payload the controller expects.
    fn merge_filter_request(
        &self,
        raw_block: &[u8],
        request: &crate::rs485::commands::FilterCycleRequest,
    ) -> Vec<u8>;

    /// Dispatches one validated telemetry frame. Decode failures are
    /// returned for logging but must never terminate the session loop.
    fn process(&self, frame: &SpaFrame, ctx: &DecodeContext<'_>) -> Result<(), SpaError> {
        let codes = self.codes();
        let ptype = frame.packet_type;

        if ptype == codes.panel_update {
            let controller = self.populate_controller(frame)?;
            ctx.state.update(|state| {
                let previous = state.components.take().unwrap_or_default();
                state.components = Some(self.populate_components(&previous, frame));
                state.controller = Some(controller);
            });
        } else if ptype == codes.device_config {
            let previous = ctx.state.snapshot();
            let components = self.populate_device_configs(frame, previous.components.as_ref())?;
            ctx.state.update(|state| {
                state.components = Some(components);
            });
        } else if ptype == codes.filter_cycle_info {
            let cycles = self.populate_filter_cycles(frame)?;
            ctx.state.update(|state| {
                let mut components = state.components.take().unwrap_or_default();
                components.filter_cycles = cycles;
                state.components = Some(components);
            });
            // A deferred filter-cycle request can only be transmitted as a
            // full block replacement; now that the controller has reported
            // its current block, consume the request at most once.
            ctx.encoder.send_filter_cycle_request_if_pending(&frame.payload)?;
        } else if ptype == codes.system_info {
            let info = self.populate_system_info(frame)?;
            ctx.state.update(|state| {
                state.system_info = Some(info);
            });
        } else if ptype == codes.setup_params {
            let celsius = ctx
                .state
                .snapshot()
                .controller
                .as_ref()
                .map(|c| c.celsius)
                .unwrap_or(false);
            let params = self.populate_setup_params(frame, celsius)?;
            ctx.state.update(|state| {
                state.setup_params = Some(params);
            });
        } else if ptype == codes.fault_log {
            let entry = self.populate_fault_entry(frame)?;
            if ctx.fault_log.add_entry(entry) {
                log::debug!("fault log entry cached, next to fetch: {:?}", ctx.fault_log.next_to_fetch());
            }
        } else if ptype == codes.light_status {
            let mut updated = None;
            {
                let snapshot = ctx.state.snapshot();
                if let Some(components) = snapshot.components.as_ref() {
                    let mut components = components.clone();
                    self.apply_light_status(frame, &mut components)?;
                    updated = Some(components);
                }
            }
            if let Some(components) = updated {
                ctx.state.update(|state| {
                    state.components = Some(components);
                });
            }
        } else {
            log::debug!(
                "ignoring unknown packet type 0x{ptype:02X} for dialect {:?}",
                self.kind()
            );
        }
        Ok(())
    }

    /// True once enough configuration frames have been decoded that the
    /// session loop can stop actively requesting them: controller,
    /// components and at least one filter cycle slot.
    fn has_all_config_state(&self, state: &SpaState) -> bool {
        state.controller.is_some()
            && state
                .components
                .as_ref()
                .map(|c| c.filter_cycles[0].is_some())
                .unwrap_or(false)
    }

    /// Rejects command issuance until the snapshot carries controller and
    /// component state, and while an access lock is engaged.
    fn verify_ready_for_commands(&self, state: &SpaState) -> Result<(), SpaError> {
        let controller = state
            .controller
            .as_ref()
            .ok_or(SpaError::StateNotReady("controller state not yet decoded"))?;
        if state.components.is_none() {
            return Err(SpaError::StateNotReady("component state not yet decoded"));
        }
        if controller.panel_locked {
            return Err(SpaError::AccessLocked("panel"));
        }
        if controller.settings_locked {
            return Err(SpaError::AccessLocked("settings"));
        }
        Ok(())
    }
}

/// Guards payload length before offset-based decoding.
pub(crate) fn require_len(frame: &SpaFrame, len: usize) -> Result<(), SpaError> {
    if frame.payload.len() < len {
        return Err(SpaError::FrameParseError(format!(
            "payload too short for packet type 0x{:02X}: {} < {len}",
            frame.packet_type,
            frame.payload.len()
        )));
    }
    Ok(())
}
