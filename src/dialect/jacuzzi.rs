//! # Jacuzzi Dialect
//!
//! Decoder for the simplified single-vendor controller family: three pumps,
//! one blower, two lights, a circulation pump, one heater and an ozonator.
//! Light intensity arrives in a dedicated light-status frame rather than in
//! the panel update.

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
pub const PANEL_UPDATE: u8 = 0x16;
pub const LIGHT_STATUS: u8 = 0x17;
pub const SETUP_PARAMS: u8 = 0x19;
pub const SYSTEM_INFO: u8 = 0x1A;
pub const FILTER_CYCLE_INFO: u8 = 0x1B;
pub const FAULT_LOG: u8 = 0x1C;
pub const DEVICE_CONFIG: u8 = 0x1D;

// Command packet types
pub const CMD_SET_TEMPERATURE: u8 = 0x0E;
pub const CMD_BUTTON_CODE: u8 = 0x0F;
pub const CMD_SET_TIME: u8 = 0x10;
pub const CMD_PANEL_REQUEST: u8 = 0x12;
pub const CMD_LIGHT: u8 = 0x13;
pub const CMD_FILTER_CYCLE_SET: u8 = 0x1B;

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

// Panel update payload offsets; note the layout shares nothing with NGSC.
const PU_LEN: usize = 16;
const PU_HOUR: usize = 0;
const PU_MINUTE: usize = 1;
const PU_FLAGS_A: usize = 2;
const PU_CURRENT_TEMP: usize = 3;
const PU_TARGET_TEMP: usize = 4;
const PU_HEATER_MODE: usize = 5;
const PU_FLAGS_B: usize = 6;
const PU_PUMPS: usize = 7;
const PU_BLOWER_HEATER: usize = 8;
const PU_LIGHTS: usize = 9;
const PU_ERROR_CODE: usize = 10;
const PU_DISPLAY_CODE: usize = 11;
const PU_UI_CODE: usize = 12;
const PU_REMINDER_CODE: usize = 13;
const PU_BLUETOOTH: usize = 14;
const PU_SEVERITY: usize = 15;

// Device config payload offsets
const DC_LEN: usize = 3;
const DC_PUMPS_CIRC: usize = 0;
const DC_LIGHTS_BLOWER: usize = 1;
const DC_HEATER_OZONE: usize = 2;

// Filter cycle info payload offsets
const FC_LEN: usize = 9;
const FC1_START_HOUR: usize = 0;
const FC1_START_MINUTE: usize = 1;
const FC1_DURATION_HOURS: usize = 2;
const FC1_DURATION_MINUTES: usize = 3;
const FC2_ENABLED: usize = 4;
const FC2_START_HOUR: usize = 5;
const FC2_START_MINUTE: usize = 6;
const FC2_DURATION_HOURS: usize = 7;
const FC2_DURATION_MINUTES: usize = 8;

// Fault log payload offsets
const FL_LEN: usize = 9;
const FL_ENTRY_NUMBER: usize = 0;
const FL_CODE: usize = 1;
const FL_DAYS_AGO: usize = 2;
const FL_HOUR: usize = 3;
const FL_MINUTE: usize = 4;
const FL_TARGET_TEMP: usize = 5;
const FL_SENSOR_A: usize = 6;
const FL_SENSOR_B: usize = 7;
const FL_FLAGS: usize = 8;

// System info payload offsets: model first, then the version triplet.
const SI_LEN: usize = 13;
const SI_MODEL_START: usize = 0;
const SI_MODEL_END: usize = 8;
const SI_VERSION_MAJOR: usize = 8;
const SI_VERSION_MINOR: usize = 9;
const SI_VERSION_BUILD: usize = 10;
const SI_DIP_SWITCHES: usize = 11;
const SI_SIGNATURE: usize = 12;

// Setup params payload offsets: high range first.
const SP_LEN: usize = 5;
const SP_HIGH_MAX: usize = 0;
const SP_HIGH_MIN: usize = 1;
const SP_LOW_MAX: usize = 2;
const SP_LOW_MIN: usize = 3;
const SP_FLAGS: usize = 4;

/// The simplified single-vendor dialect decoder.
pub struct JacuzziDialect;

impl JacuzziDialect {
    fn temp_opt(raw: u8, celsius: bool) -> Option<i32> {
        if raw == TEMP_UNKNOWN {
            None
        } else {
            Some(device_temp_to_fahrenheit(raw, celsius))
        }
    }
}

impl SpaDialect for JacuzziDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Jacuzzi
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

        let flags_a = p[PU_FLAGS_A];
        let flags_b = p[PU_FLAGS_B];
        let celsius = flags_a & 0x01 != 0;

        Ok(Controller {
            hour: p[PU_HOUR],
            minute: p[PU_MINUTE],
            military_time: (flags_a & 0x02) >> 1 != 0,
            celsius,
            current_water_temp: Self::temp_opt(p[PU_CURRENT_TEMP], celsius),
            target_water_temperature: device_temp_to_fahrenheit(p[PU_TARGET_TEMP], celsius),
            // This family reports a single water sensor; A/B stay unset.
            sensor_a_temp: None,
            sensor_b_temp: None,
            heater_mode: HeaterMode::from_raw(p[PU_HEATER_MODE]),
            temperature_range: if (flags_b & 0x08) >> 3 != 0 {
                TemperatureRange::High
            } else {
                TemperatureRange::Low
            },
            needs_heat: flags_b & 0x01 != 0,
            heating: (flags_b & 0x06) >> 1 != 0,
            filter_mode: FilterMode::from_raw((flags_b & 0x30) >> 4),
            priming: (flags_a & 0x04) >> 2 != 0,
            hold_mode: false,
            test_mode: false,
            panel_locked: (flags_a & 0x08) >> 3 != 0,
            settings_locked: (flags_a & 0x10) >> 4 != 0,
            temperature_locked: (flags_a & 0x20) >> 5 != 0,
            invert_display: false,
            all_segments_on: false,
            display_code: p[PU_DISPLAY_CODE],
            ui_code: p[PU_UI_CODE],
            error_code: p[PU_ERROR_CODE],
            message_severity: p[PU_SEVERITY] & 0x03,
            bluetooth_status: BluetoothStatus::from_raw(p[PU_BLUETOOTH]),
            reminder_code: p[PU_REMINDER_CODE],
            reminder_days_clear_ray: 0,
            reminder_days_water_refresh: 0,
            last_update: Some(Utc::now()),
        })
    }

    fn populate_components(&self, previous: &Components, frame: &SpaFrame) -> Components {
        let mut components = previous.clone();
        if frame.payload.len() < PU_LEN {
            return components;
        }
        let p = &frame.payload;

        let pumps = p[PU_PUMPS];
        for i in 0..3 {
            let raw = (pumps >> (i * 2)) & 0x03;
            Components::set_state(&mut components.pumps[i], Component::pump_state_from_raw(raw));
        }
        Components::set_state(
            &mut components.circulation_pump,
            Component::toggle_state_from_raw((pumps & 0x40) >> 6),
        );

        let bh = p[PU_BLOWER_HEATER];
        Components::set_state(
            &mut components.blowers[0],
            Component::pump_state_from_raw(bh & 0x03),
        );
        Components::set_state(
            &mut components.heaters[0],
            Component::pump_state_from_raw((bh & 0x0C) >> 2),
        );
        Components::set_state(
            &mut components.ozone,
            Component::toggle_state_from_raw((bh & 0x10) >> 4),
        );

        // Panel updates only carry on/off for lights; intensity comes from
        // the dedicated light-status frame.
        let lights = p[PU_LIGHTS];
        for i in 0..2 {
            let on = (lights >> i) & 0x01 != 0;
            if let Some(light) = &mut components.lights[i] {
                if !on {
                    light.state = ComponentState::Off;
                } else if light.state == ComponentState::Off {
                    light.state = ComponentState::High;
                }
            }
        }

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

        let pc = p[DC_PUMPS_CIRC];
        for i in 0..3 {
            components.pumps[i] = pump_slot((pc >> (i * 2)) & 0x03);
        }
        components.circulation_pump = toggle_slot((pc & 0x40) >> 6);

        let lb = p[DC_LIGHTS_BLOWER];
        components.lights[0] = light_slot(lb & 0x03);
        components.lights[1] = light_slot((lb & 0x0C) >> 2);
        components.blowers[0] = pump_slot((lb & 0x30) >> 4);

        let ho = p[DC_HEATER_OZONE];
        components.heaters[0] = pump_slot(ho & 0x03);
        components.ozone = toggle_slot((ho & 0x04) >> 2);

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
            enabled: p[FC2_ENABLED] & 0x01 != 0,
            start_hour: p[FC2_START_HOUR],
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
        if index == 0 || index > 2 {
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
            block[FC2_ENABLED] = request.enabled as u8;
            block[FC2_START_HOUR] = request.start_hour;
            block[FC2_START_MINUTE] = request.start_minute;
            block[FC2_DURATION_HOURS] = request.duration_hours;
            block[FC2_DURATION_MINUTES] = request.duration_minutes;
        }
        block
    }
}
