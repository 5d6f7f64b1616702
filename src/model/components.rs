//! # Components State
//!
//! The fixed but dialect-dependent set of addressable spa devices. Every slot
//! is an `Option`: `None` means the device-config frame did not report the
//! component as physically present, and decoders must clear (never default)
//! a slot whose capability bits are absent.

use serde::{Deserialize, Serialize};

/// Current state of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComponentState {
    #[default]
    Off,
    On,
    Low,
    Med,
    High,
}

/// One addressable component with its dialect-reported capability set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub state: ComponentState,
    /// States this component can be commanded into, as reported by the
    /// device-config frame.
    pub available_states: Vec<ComponentState>,
}

impl Component {
    /// A simple on/off component.
    pub fn toggle() -> Component {
        Component {
            state: ComponentState::Off,
            available_states: vec![ComponentState::Off, ComponentState::On],
        }
    }

    /// A single-speed pump style component (off/high).
    pub fn one_speed() -> Component {
        Component {
            state: ComponentState::Off,
            available_states: vec![ComponentState::Off, ComponentState::High],
        }
    }

    /// A two-speed pump style component (off/low/high).
    pub fn two_speed() -> Component {
        Component {
            state: ComponentState::Off,
            available_states: vec![
                ComponentState::Off,
                ComponentState::Low,
                ComponentState::High,
            ],
        }
    }

    /// A dimmable light (off/low/med/high).
    pub fn dimmable() -> Component {
        Component {
            state: ComponentState::Off,
            available_states: vec![
                ComponentState::Off,
                ComponentState::Low,
                ComponentState::Med,
                ComponentState::High,
            ],
        }
    }

    /// Interprets a two-bit pump state field.
    pub fn pump_state_from_raw(raw: u8) -> ComponentState {
        match raw & 0x03 {
            1 => ComponentState::Low,
            2 | 3 => ComponentState::High,
            _ => ComponentState::Off,
        }
    }

    /// Interprets a two-bit light intensity field.
    pub fn light_state_from_raw(raw: u8) -> ComponentState {
        match raw & 0x03 {
            1 => ComponentState::Low,
            2 => ComponentState::Med,
            3 => ComponentState::High,
            _ => ComponentState::Off,
        }
    }

    /// Interprets a single on/off bit.
    pub fn toggle_state_from_raw(raw: u8) -> ComponentState {
        if raw & 0x01 != 0 {
            ComponentState::On
        } else {
            ComponentState::Off
        }
    }
}

/// One filter cycle schedule slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterCycle {
    pub enabled: bool,
    pub start_hour: u8,
    pub start_minute: u8,
    pub duration_hours: u8,
    pub duration_minutes: u8,
}

/// The complete component snapshot for one spa.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub pumps: [Option<Component>; 8],
    pub circulation_pump: Option<Component>,
    pub blowers: [Option<Component>; 2],
    pub lights: [Option<Component>; 4],
    pub heaters: [Option<Component>; 2],
    pub ozone: Option<Component>,
    pub microsilk: Option<Component>,
    pub aux: [Option<Component>; 4],
    pub misters: [Option<Component>; 3],
    pub filter_cycles: [Option<FilterCycle>; 2],
}

impl Components {
    /// Updates the state of a slot only if the component is present.
    pub fn set_state(slot: &mut Option<Component>, state: ComponentState) {
        if let Some(component) = slot {
            component.state = state;
        }
    }
}
