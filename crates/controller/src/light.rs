//! Grow-light control: a single boolean, a pin write, and a state
//! publication. Synchronous apart from the telemetry enqueue; no worker task.

use tracing::{info, warn};

use crate::gpio::LightPin;
use crate::queue::Queue;

/// A request to change the light: `"on"` / `"off"` (case-insensitive) set the
/// state, empty toggles it, anything else leaves it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightCommand {
    pub state: String,
}

pub struct LightController {
    pin: LightPin,
    light_on: bool,
    publish: Queue<u8>,
}

impl LightController {
    pub fn new(pin: LightPin, publish: Queue<u8>) -> Self {
        Self {
            pin,
            light_on: false,
            publish,
        }
    }

    /// Apply `command`, write the pin, and publish the (possibly unchanged)
    /// state.
    pub async fn handle(&mut self, command: LightCommand) {
        if command.state.is_empty() {
            self.light_on = !self.light_on;
        } else if command.state.eq_ignore_ascii_case("on") {
            self.light_on = true;
        } else if command.state.eq_ignore_ascii_case("off") {
            self.light_on = false;
        } else {
            warn!(state = %command.state, "unrecognized light state, leaving unchanged");
        }

        info!(on = self.light_on, "setting light state");
        self.pin.set(self.light_on);
        self.publish.send(self.light_on as u8).await;
    }

    #[allow(dead_code)]
    pub fn is_on(&self) -> bool {
        self.light_on
    }

    #[cfg(all(test, not(feature = "gpio")))]
    pub(crate) fn pin_level(&self) -> bool {
        self.pin.level()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
