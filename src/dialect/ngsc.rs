//! # NGSC Dialect
//!
//! Decoder for the generic multi-pump/multi-light controller family. This is
//! the richer of the two dialects: up to eight pumps, four lights, two
//! blowers, misters and aux outputs, all packed as two-bit fields in the
//! panel-update frame.

use crate::dialect::{
    device_temp_to_fahrenheit, require_len, CommandCodes, DialectKind, PacketCodes, SpaDialect,
    TEMP_UNKNOWN,
};
use crate::error::SpaError;
use crate::model::components::{Component, ComponentState, Components, FilterCycle};
use crate::model::controller::{
    BluetoothStatus, Controller, FilterMode, HeaterMode, TemperatureRange,
};
use crate::model::fault_log::FaultLogEntry;
use crate::model::info::{SetupParams, SystemInfo};
use crate::rs485::commands::FilterCycleRequest;
use crate::rs485::frame::SpaFrame;
use chrono::{Duration, NaiveTime, Utc};

// Telemetry packet types
pub const PANEL_UPDATE: u8 = 0x13;
pub const FILTER_CYCLE_INFO: u8 = 0x23;
pub const SYSTEM_INFO: u8 = 0x24;
pub const SETUP_PARAMS: u8 = 0x25;
pub const FAULT_LOG: u8 = 0x28;
pub const LIGHT_STATUS: u8 = 0x2C;
pub const DEVICE_CONFIG: u8 = 0x2E;

// Command packet types
pub const CMD_BUTTON_CODE: u8 = 0x11;
pub const CMD_SET_TEMPERATURE: u8 = 0x20;
pub const CMD_SET_TIME: u8 = 0x21;
pub const CMD_PANEL_REQUEST: u8 = 0x22;
pub const CMD_FILTER_CYCLE_SET: u8 = 0x23;
pub const CMD_LIGHT: u8 = 0x1A;

static CODES: PacketCodes = PacketCodes {
    panel_update: PANEL_UPDATE,
    device_config: DEVICE_CONFIG,
    system_info: SYSTEM_INFO,
    setup_params: SETUP_PARAMS,
    filter_cycle_info: FILTER_CYCLE_INFO,
    fault_log: FAULT_LOG,
    light_status: LIGHT_STATUS,
};

static COMMAND_CODES: CommandCodes = CommandCodes {
    set_temperature: CMD_SET_TEMPERATURE,
    button_code: CMD_BUTTON_CODE,
    set_time: CMD_SET_TIME,
    panel_request: CMD_PANEL_REQUEST,
    filter_cycle_set: CMD_FILTER_CYCLE_SET,
    light_command: CMD_LIGHT,
};

// Panel update payload offsets
const PU_LEN: usize = 24;
const PU_STATUS_FLAGS: usize = 0;
const PU_CURRENT_TEMP: usize = 1;
const PU_HOUR: usize = 2;
const PU_MINUTE: usize = 3;
const PU_HEATER_MODE: usize = 4;
const PU_REMINDER_CODE: usize = 5;
const PU_SENSOR_A: usize = 6;
const PU_SENSOR_B: usize = 7;
const PU_DISPLAY_CODE: usize = 8;
const PU_UNIT_FLAGS: usize = 9;
const PU_HEAT_FLAGS: usize = 10;
const PU_PUMPS_LOW: usize = 11;
const PU_PUMPS_HIGH: usize = 12;
const PU_CIRC_BLOWERS: usize = 13;
const PU_LIGHTS: usize = 14;
const PU_MISTER_AUX: usize = 15;
const PU_LOCK_FLAGS: usize = 16;
const PU_TARGET_TEMP: usize = 17;
const PU_HEATER_OZONE: usize = 18;
const PU_UI_CODE: usize = 19;
const PU_BLUETOOTH: usize = 20;
const PU_REMINDER_CLEAR_RAY: usize = 21;
const PU_REMINDER_WATER_REFRESH: usize = 22;
const PU_ERROR_CODE: usize = 23;

// Device config payload offsets
const DC_LEN: usize = 6;
const DC_PUMPS_LOW: usize = 0;
const DC_PUMPS_HIGH: usize = 1;
const DC_LIGHTS: usize = 2;
const DC_CIRC_BLOWERS: usize = 3;
const DC_AUX_MISTERS: usize = 4;
const DC_HEATERS: usize = 5;

// Filter cycle info payload offsets; cycle 2's enable bit rides on its
// start-hour byte.
const FC_LEN: usize = 8;
const FC1_START_HOUR: usize = 0;
const FC1_START_MINUTE: usize = 1;
const FC1_DURATION_HOURS: usize = 2;
const FC1_DURATION_MINUTES: usize = 3;
const FC2_START_HOUR: usize = 4;
const FC2_START_MINUTE: usize = 5;
const FC2_DURATION_HOURS: usize = 6;
const FC2_DURATION_MINUTES: usize = 7;
const FC2_ENABLED_MASK: u8 = 0x80;

// Fault log payload offsets
const FL_LEN: usize = 10;
const FL_ENTRY_NUMBER: usize = 1;
const FL_CODE: usize = 2;
const FL_DAYS_AGO: usize = 3;
const FL_HOUR: usize = 4;
const FL_MINUTE: usize = 5;
const FL_FLAGS: usize = 6;
const FL_TARGET_TEMP: usize = 7;
const FL_SENSOR_A: usize = 8;
const FL_SENSOR_B: usize = 9;

// System info payload offsets
const SI_LEN: usize = 13;
const SI_VERSION_MAJOR: usize = 0;
const SI_VERSION_MINOR: usize = 1;
const SI_VERSION_BUILD: usize = 2;
const SI_MODEL_START: usize = 3;
const SI_MODEL_END: usize = 11;
const SI_SIGNATURE: usize = 11;
const SI_DIP_SWITCHES: usize = 12;

// Setup params payload offsets
const SP_LEN: usize = 5;
const SP_LOW_MIN: usize = 0;
const SP_LOW_MAX: usize = 1;
const SP_HIGH_MIN: usize = 2;
const SP_HIGH_MAX: usize = 3;
const SP_FLAGS: usize = 4;

/// The generic multi-pump dialect decoder. Stateless: all offsets are
/// compile-time constants.
pub struct NgscDialect;

impl NgscDialect {
    fn temp_opt(raw: u8, celsius: bool) -> Option<i32> {
        if raw == TEMP_UNKNOWN {
            None
        } else {
            Some(device_temp_to_fahrenheit(raw, celsius))
        }
    }
}

impl SpaDialect for NgscDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Ngsc
    }

    fn codes(&self) -> &'static PacketCodes {
        &CODES
    }

    fn command_codes(&self) -> &'static CommandCodes {
        &COMMAND_CODES
    }

    fn populate_controller(&self, frame: &SpaFrame) -> Result<Controller, SpaError> {
        require_len(frame, PU_LEN)?;
        let p = &frame.payload;

        let status = p[PU_STATUS_FLAGS];
        let units = p[PU_UNIT_FLAGS];
        let heat = p[PU_HEAT_FLAGS];
        let locks = p[PU_LOCK_FLAGS];
        let celsius = units & 0x01 != 0;

        Ok(Controller {
            hour: p[PU_HOUR],
            minute: p[PU_MINUTE],
            military_time: (units & 0x02) >> 1 != 0,
            celsius,
            current_water_temp: Self::temp_opt(p[PU_CURRENT_TEMP], celsius),
            target_water_temperature: device_temp_to_fahrenheit(p[PU_TARGET_TEMP], celsius),
            sensor_a_temp: Self::temp_opt(p[PU_SENSOR_A], celsius),
            sensor_b_temp: Self::temp_opt(p[PU_SENSOR_B], celsius),
            heater_mode: HeaterMode::from_raw(p[PU_HEATER_MODE]),
            temperature_range: if (heat & 0x04) >> 2 != 0 {
                TemperatureRange::High
            } else {
                TemperatureRange::Low
            },
            needs_heat: heat & 0x01 != 0,
            heating: (heat & 0x30) >> 4 != 0,
            filter_mode: FilterMode::from_raw((units & 0x0C) >> 2),
            priming: status & 0x01 != 0,
            hold_mode: (status & 0x02) >> 1 != 0,
            test_mode: (status & 0x04) >> 2 != 0,
            panel_locked: locks & 0x01 != 0,
            settings_locked: (locks & 0x02) >> 1 != 0,
            temperature_locked: (locks & 0x04) >> 2 != 0,
            invert_display: (status & 0x10) >> 4 != 0,
            all_segments_on: (status & 0x08) >> 3 != 0,
            display_code: p[PU_DISPLAY_CODE],
            ui_code: p[PU_UI_CODE],
            error_code: p[PU_ERROR_CODE],
            message_severity: (heat & 0xC0) >> 6,
            bluetooth_status: BluetoothStatus::from_raw(p[PU_BLUETOOTH]),
            reminder_code: p[PU_REMINDER_CODE],
            reminder_days_clear_ray: p[PU_REMINDER_CLEAR_RAY],
            reminder_days_water_refresh: p[PU_REMINDER_WATER_REFRESH],
            last_update: Some(Utc::now()),
        })
    }

    fn populate_components(&self, previous: &Components, frame: &SpaFrame) -> Components {
        let mut components = previous.clone();
        if frame.payload.len() < PU_LEN {
            return components;
        }
        let p = &frame.payload;

        for i in 0..4 {
            let raw = (p[PU_PUMPS_LOW] >> (i * 2)) & 0x03;
            Components::set_state(&mut components.pumps[i], Component::pump_state_from_raw(raw));
        }
        for i in 0..4 {
            let raw = (p[PU_PUMPS_HIGH] >> (i * 2)) & 0x03;
            Components::set_state(
                &mut components.pumps[i + 4],
                Component::pump_state_from_raw(raw),
            );
        }

        let cb = p[PU_CIRC_BLOWERS];
        Components::set_state(
            &mut components.circulation_pump,
            Component::toggle_state_from_raw(cb & 0x01),
        );
        Components::set_state(
            &mut components.blowers[0],
            Component::pump_state_from_raw((cb & 0x0C) >> 2),
        );
        Components::set_state(
            &mut components.blowers[1],
            Component::pump_state_from_raw((cb & 0x30) >> 4),
        );

        for i in 0..4 {
            let raw = (p[PU_LIGHTS] >> (i * 2)) & 0x03;
            Components::set_state(
                &mut components.lights[i],
                Component::light_state_from_raw(raw),
            );
        }

        let ma = p[PU_MISTER_AUX];
        for i in 0..3 {
            Components::set_state(
                &mut components.misters[i],
                Component::toggle_state_from_raw((ma >> i) & 0x01),
            );
        }
        for i in 0..4 {
            Components::set_state(
                &mut components.aux[i],
                Component::toggle_state_from_raw((ma >> (i + 3)) & 0x01),
            );
        }

        let ho = p[PU_HEATER_OZONE];
        Components::set_state(
            &mut components.heaters[0],
            Component::pump_state_from_raw(ho & 0x03),
        );
        Components::set_state(
            &mut components.heaters[1],
            Component::pump_state_from_raw((ho & 0x0C) >> 2),
        );
        Components::set_state(
            &mut components.ozone,
            Component::toggle_state_from_raw((ho & 0x10) >> 4),
        );
        Components::set_state(
            &mut components.microsilk,
            Component::toggle_state_from_raw((ho & 0x20) >> 5),
        );

        components
    }

    fn populate_device_configs(
        &self,
        frame: &SpaFrame,
        previous: Option<&Components>,
    ) -> Result<Components, SpaError> {
        require_len(frame, DC_LEN)?;
        let p = &frame.payload;
        let mut components = Components::default();

        let pump_slot = |raw: u8| -> Option<Component> {
            match raw & 0x03 {
                1 => Some(Component::one_speed()),
                2 | 3 => Some(Component::two_speed()),
                _ => None,
            }
        };
        let light_slot = |raw: u8| -> Option<Component> {
            match raw & 0x03 {
                1 => Some(Component::toggle()),
                2 | 3 => Some(Component::dimmable()),
                _ => None,
            }
        };
        let toggle_slot = |raw: u8| -> Option<Component> {
            if raw & 0x01 != 0 {
                Some(Component::toggle())
            } else {
                None
            }
        };

        for i in 0..4 {
            components.pumps[i] = pump_slot((p[DC_PUMPS_LOW] >> (i * 2)) & 0x03);
            components.pumps[i + 4] = pump_slot((p[DC_PUMPS_HIGH] >> (i * 2)) & 0x03);
            components.lights[i] = light_slot((p[DC_LIGHTS] >> (i * 2)) & 0x03);
        }

        let cb = p[DC_CIRC_BLOWERS];
        components.circulation_pump = toggle_slot(cb & 0x01);
        components.blowers[0] = pump_slot((cb & 0x06) >> 1);
        components.blowers[1] = pump_slot((cb & 0x18) >> 3);
        components.microsilk = toggle_slot((cb & 0x20) >> 5);
        components.ozone = toggle_slot((cb & 0x40) >> 6);

        let am = p[DC_AUX_MISTERS];
        for i in 0..4 {
            components.aux[i] = toggle_slot((am >> i) & 0x01);
        }
        for i in 0..3 {
            components.misters[i] = toggle_slot((am >> (i + 4)) & 0x01);
        }

        let heaters = p[DC_HEATERS];
        components.heaters[0] = pump_slot(heaters & 0x03);
        components.heaters[1] = pump_slot((heaters & 0x0C) >> 2);

        // Filter cycles arrive in their own frame; keep what we have.
        if let Some(previous) = previous {
            components.filter_cycles = previous.filter_cycles.clone();
        }

        Ok(components)
    }

    fn populate_system_info(&self, frame: &SpaFrame) -> Result<SystemInfo, SpaError> {
        require_len(frame, SI_LEN)?;
        let p = &frame.payload;
        Ok(SystemInfo {
            version_major: p[SI_VERSION_MAJOR],
            version_minor: p[SI_VERSION_MINOR],
            version_build: p[SI_VERSION_BUILD],
            model: String::from_utf8_lossy(&p[SI_MODEL_START..SI_MODEL_END])
                .trim_end()
                .to_string(),
            config_signature: p[SI_SIGNATURE],
            dip_switches: p[SI_DIP_SWITCHES],
        })
    }

    fn populate_setup_params(
        &self,
        frame: &SpaFrame,
        celsius: bool,
    ) -> Result<SetupParams, SpaError> {
        require_len(frame, SP_LEN)?;
        let p = &frame.payload;
        Ok(SetupParams {
            low_range_min: device_temp_to_fahrenheit(p[SP_LOW_MIN], celsius),
            low_range_max: device_temp_to_fahrenheit(p[SP_LOW_MAX], celsius),
            high_range_min: device_temp_to_fahrenheit(p[SP_HIGH_MIN], celsius),
            high_range_max: device_temp_to_fahrenheit(p[SP_HIGH_MAX], celsius),
            gfci_enabled: p[SP_FLAGS] & 0x01 != 0,
            drain_mode_enabled: (p[SP_FLAGS] & 0x02) >> 1 != 0,
        })
    }

    fn populate_filter_cycles(
        &self,
        frame: &SpaFrame,
    ) -> Result<[Option<FilterCycle>; 2], SpaError> {
        require_len(frame, FC_LEN)?;
        let p = &frame.payload;
        let cycle1 = FilterCycle {
            enabled: true,
            start_hour: p[FC1_START_HOUR],
            start_minute: p[FC1_START_MINUTE],
            duration_hours: p[FC1_DURATION_HOURS],
            duration_minutes: p[FC1_DURATION_MINUTES],
        };
        let cycle2 = FilterCycle {
            enabled: p[FC2_START_HOUR] & FC2_ENABLED_MASK != 0,
            start_hour: p[FC2_START_HOUR] & !FC2_ENABLED_MASK,
            start_minute: p[FC2_START_MINUTE],
            duration_hours: p[FC2_DURATION_HOURS],
            duration_minutes: p[FC2_DURATION_MINUTES],
        };
        Ok([Some(cycle1), Some(cycle2)])
    }

    fn populate_fault_entry(&self, frame: &SpaFrame) -> Result<FaultLogEntry, SpaError> {
        require_len(frame, FL_LEN)?;
        let p = &frame.payload;
        let celsius = p[FL_FLAGS] & 0x01 != 0;

        let time = NaiveTime::from_hms_opt(
            (p[FL_HOUR] % 24) as u32,
            (p[FL_MINUTE] % 60) as u32,
            0,
        )
        .unwrap_or_default();
        let day = Utc::now().date_naive() - Duration::days(p[FL_DAYS_AGO] as i64);
        let timestamp = day.and_time(time).and_utc();

        Ok(FaultLogEntry {
            number: p[FL_ENTRY_NUMBER],
            code: p[FL_CODE],
            timestamp,
            target_temp: device_temp_to_fahrenheit(p[FL_TARGET_TEMP], celsius),
            sensor_a_temp: device_temp_to_fahrenheit(p[FL_SENSOR_A], celsius),
            sensor_b_temp: device_temp_to_fahrenheit(p[FL_SENSOR_B], celsius),
            celsius,
            sent: false,
        })
    }

    fn apply_light_status(
        &self,
        frame: &SpaFrame,
        components: &mut Components,
    ) -> Result<(), SpaError> {
        require_len(frame, 2)?;
        let index = frame.payload[0] as usize;
        if index == 0 || index > components.lights.len() {
            return Err(SpaError::FrameParseError(format!(
                "light status for unknown light {index}"
            )));
        }
        Components::set_state(
            &mut components.lights[index - 1],
            Component::light_state_from_raw(frame.payload[1]),
        );
        Ok(())
    }

    fn merge_filter_request(&self, raw_block: &[u8], request: &FilterCycleRequest) -> Vec<u8> {
        let mut block = raw_block.to_vec();
        block.resize(FC_LEN.max(block.len()), 0);
        if request.cycle == 1 {
            block[FC1_START_HOUR] = request.start_hour;
            block[FC1_START_MINUTE] = request.start_minute;
            block[FC1_DURATION_HOURS] = request.duration_hours;
            block[FC1_DURATION_MINUTES] = request.duration_minutes;
        } else {
            let enabled = if request.enabled { FC2_ENABLED_MASK } else { 0 };
            block[FC2_START_HOUR] = enabled | (request.start_hour & !FC2_ENABLED_MASK);
            block[FC2_START_MINUTE] = request.start_minute;
            block[FC2_DURATION_HOURS] = request.duration_hours;
            block[FC2_DURATION_MINUTES] = request.duration_minutes;
        }
        block
    }
}
