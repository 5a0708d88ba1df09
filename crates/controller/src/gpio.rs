//! Valve, pump, light, and button pins. The `gpio` feature gates the real
//! rppal driver; without it, mock banks log transitions and expose the pin
//! levels so tests can observe actuation.
//!
//! Valve and pump pins are owned exclusively by the watering worker through
//! `ZoneBank`; nothing else in the controller writes them.

use anyhow::Result;

use crate::config::Zone;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, OutputPin};

#[cfg(not(feature = "gpio"))]
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

#[cfg(not(feature = "gpio"))]
fn lock_levels(levels: &Mutex<HashMap<u8, bool>>) -> MutexGuard<'_, HashMap<u8, bool>> {
    // Pin state is plain data; recover it even from a poisoned lock.
    match levels.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Real pin banks (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct ZoneBank {
    zones: Vec<Zone>,
    pins: std::collections::HashMap<u8, OutputPin>,
}

#[cfg(feature = "gpio")]
impl ZoneBank {
    pub fn new(zones: &[Zone]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = std::collections::HashMap::new();

        for zone in zones {
            for pin_num in [zone.valve_pin, zone.pump_pin] {
                if !pins.contains_key(&pin_num) {
                    let mut pin = gpio.get(pin_num)?.into_output();
                    pin.set_low();
                    pins.insert(pin_num, pin);
                }
            }
        }

        Ok(Self {
            zones: zones.to_vec(),
            pins,
        })
    }

    pub fn zone_on(&mut self, position: usize) {
        let Some(zone) = self.zones.get(position).cloned() else {
            return;
        };
        self.set(zone.pump_pin, true);
        self.set(zone.valve_pin, true);
    }

    pub fn zone_off(&mut self, position: usize) {
        let Some(zone) = self.zones.get(position).cloned() else {
            return;
        };
        self.set(zone.pump_pin, false);
        self.set(zone.valve_pin, false);
    }

    pub fn all_off(&mut self) {
        for position in 0..self.zones.len() {
            self.zone_off(position);
        }
    }

    fn set(&mut self, pin_num: u8, high: bool) {
        if let Some(pin) = self.pins.get_mut(&pin_num) {
            if high {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
    }
}

#[cfg(feature = "gpio")]
pub struct LightPin {
    pin: OutputPin,
}

#[cfg(feature = "gpio")]
impl LightPin {
    pub fn new(pin_num: u8) -> Result<Self> {
        let mut pin = Gpio::new()?.get(pin_num)?.into_output();
        pin.set_low();
        Ok(Self { pin })
    }

    pub fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

#[cfg(feature = "gpio")]
pub struct ButtonBank {
    pins: Vec<InputPin>,
}

#[cfg(feature = "gpio")]
impl ButtonBank {
    /// Buttons are active-high; pull-downs are configured here so a floating
    /// input reads low.
    pub fn new(pin_nums: &[u8]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::with_capacity(pin_nums.len());
        for &pin_num in pin_nums {
            pins.push(gpio.get(pin_num)?.into_input_pulldown());
        }
        Ok(Self { pins })
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn read(&self, index: usize) -> bool {
        self.pins.get(index).map(|p| p.is_high()).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Mock pin banks (development — no hardware, observable levels)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
pub struct ZoneBank {
    zones: Vec<Zone>,
    levels: Arc<Mutex<HashMap<u8, bool>>>,
}

#[cfg(not(feature = "gpio"))]
impl ZoneBank {
    pub fn new(zones: &[Zone]) -> Result<Self> {
        let mut levels = HashMap::new();
        for zone in zones {
            eprintln!(
                "[mock-gpio] registered zone {} (valve {}, pump {} — not wired)",
                zone.position, zone.valve_pin, zone.pump_pin
            );
            levels.insert(zone.valve_pin, false);
            levels.insert(zone.pump_pin, false);
        }
        Ok(Self {
            zones: zones.to_vec(),
            levels: Arc::new(Mutex::new(levels)),
        })
    }

    /// Handle for observing mock pin levels from outside the worker.
    #[allow(dead_code)]
    pub fn watcher(&self) -> PinWatcher {
        PinWatcher {
            levels: Arc::clone(&self.levels),
        }
    }

    pub fn zone_on(&mut self, position: usize) {
        let Some(zone) = self.zones.get(position) else {
            return;
        };
        let mut levels = lock_levels(&self.levels);
        levels.insert(zone.pump_pin, true);
        levels.insert(zone.valve_pin, true);
        eprintln!("[mock-gpio] zone {position} ON");
    }

    pub fn zone_off(&mut self, position: usize) {
        let Some(zone) = self.zones.get(position) else {
            return;
        };
        let mut levels = lock_levels(&self.levels);
        levels.insert(zone.pump_pin, false);
        levels.insert(zone.valve_pin, false);
        eprintln!("[mock-gpio] zone {position} OFF");
    }

    pub fn all_off(&mut self) {
        for position in 0..self.zones.len() {
            self.zone_off(position);
        }
    }
}

/// Read-only view onto the mock zone bank's pin levels.
#[cfg(not(feature = "gpio"))]
#[derive(Clone)]
#[allow(dead_code)]
pub struct PinWatcher {
    levels: Arc<Mutex<HashMap<u8, bool>>>,
}

#[cfg(not(feature = "gpio"))]
#[allow(dead_code)]
impl PinWatcher {
    pub fn level(&self, pin_num: u8) -> bool {
        lock_levels(&self.levels).get(&pin_num).copied().unwrap_or(false)
    }

    /// True if any pin in the bank is currently high.
    pub fn any_high(&self) -> bool {
        lock_levels(&self.levels).values().any(|&level| level)
    }
}

#[cfg(not(feature = "gpio"))]
pub struct LightPin {
    pin_num: u8,
    level: bool,
}

#[cfg(not(feature = "gpio"))]
impl LightPin {
    pub fn new(pin_num: u8) -> Result<Self> {
        eprintln!("[mock-gpio] registered light (pin {pin_num} — not wired)");
        Ok(Self {
            pin_num,
            level: false,
        })
    }

    pub fn set(&mut self, on: bool) {
        self.level = on;
        eprintln!(
            "[mock-gpio] light pin {} set {}",
            self.pin_num,
            if on { "HIGH" } else { "LOW" }
        );
    }

    #[cfg(test)]
    pub(crate) fn level(&self) -> bool {
        self.level
    }
}

#[cfg(not(feature = "gpio"))]
pub struct ButtonBank {
    count: usize,
}

#[cfg(not(feature = "gpio"))]
impl ButtonBank {
    pub fn new(pin_nums: &[u8]) -> Result<Self> {
        for &pin_num in pin_nums {
            eprintln!("[mock-gpio] registered button (pin {pin_num} — not wired)");
        }
        Ok(Self {
            count: pin_nums.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn read(&self, _index: usize) -> bool {
        false
    }
}

// ===========================================================================
// Tests
// ===========================================================================
