#![cfg(test)]

//! Recording controller for tests.

use std::sync::Mutex;

use crate::controller::{BACKLIGHT_STEPS, BacklightKey, SettingsController};
use crate::error::ControllerError;

/// A call made against [`FakeController`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Brightness(f64),
    Wireless(bool),
    ShortRangeRadio(bool),
    Backlight(BacklightKey),
}

#[derive(Debug)]
struct FakeState {
    wireless: bool,
    short_range_radio: bool,
    brightness: f64,
    backlight_level: u8,
    calls: Vec<Call>,
}

/// Simulates the machine in memory and records every call.
pub struct FakeController {
    state: Mutex<FakeState>,
    tools_missing: bool,
}

impl FakeController {
    pub fn new(wireless: bool, short_range_radio: bool) -> Self {
        Self {
            state: Mutex::new(FakeState {
                wireless,
                short_range_radio,
                brightness: 0.65,
                backlight_level: BACKLIGHT_STEPS,
                calls: Vec::new(),
            }),
            tools_missing: false,
        }
    }

    /// A controller whose every tool is missing.
    pub fn without_tools() -> Self {
        Self {
            tools_missing: true,
            ..Self::new(true, true)
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn wireless(&self) -> bool {
        self.state.lock().unwrap().wireless
    }

    pub fn short_range_radio(&self) -> bool {
        self.state.lock().unwrap().short_range_radio
    }

    pub fn brightness(&self) -> f64 {
        self.state.lock().unwrap().brightness
    }

    pub fn backlight_level(&self) -> u8 {
        self.state.lock().unwrap().backlight_level
    }

    fn record(&self, call: Call) -> Result<(), ControllerError> {
        if self.tools_missing {
            return Err(ControllerError::ToolNotFound {
                tool: format!("{:?}", call),
            });
        }

        let mut state = self.state.lock().unwrap();
        match call {
            Call::Brightness(level) => state.brightness = level,
            Call::Wireless(enabled) => state.wireless = enabled,
            Call::ShortRangeRadio(enabled) => state.short_range_radio = enabled,
            Call::Backlight(BacklightKey::Up) => {
                state.backlight_level = (state.backlight_level + 1).min(BACKLIGHT_STEPS)
            }
            Call::Backlight(BacklightKey::Down) => {
                state.backlight_level = state.backlight_level.saturating_sub(1)
            }
        }
        state.calls.push(call);
        Ok(())
    }
}

impl SettingsController for FakeController {
    fn set_brightness(&self, level: f64) -> Result<(), ControllerError> {
        self.record(Call::Brightness(level))
    }

    fn set_wireless(&self, enabled: bool) -> Result<(), ControllerError> {
        self.record(Call::Wireless(enabled))
    }

    fn set_short_range_radio(&self, enabled: bool) -> Result<(), ControllerError> {
        self.record(Call::ShortRangeRadio(enabled))
    }

    fn backlight_step(&self, key: BacklightKey) -> Result<(), ControllerError> {
        self.record(Call::Backlight(key))
    }

    fn query_wireless_state(&self) -> Result<bool, ControllerError> {
        if self.tools_missing {
            return Err(ControllerError::ToolNotFound {
                tool: "wireless probe".to_string(),
            });
        }
        Ok(self.wireless())
    }

    fn query_short_range_radio_state(&self) -> Result<bool, ControllerError> {
        if self.tools_missing {
            return Err(ControllerError::ToolNotFound {
                tool: "blueutil".to_string(),
            });
        }
        Ok(self.short_range_radio())
    }
}
