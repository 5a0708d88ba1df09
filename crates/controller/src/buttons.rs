//! Debounced local buttons: one per configured zone plus an optional stop
//! button. A rising edge on a zone button queues a default-duration watering
//! request; a rising edge on the stop button interrupts the current pulse.

use std::time::Duration;

use tokio::time::{interval, Instant};
use tracing::info;

use crate::gpio::ButtonBank;
use crate::water::{WaterRequest, WateringHandle};

/// A raw level must hold steady this long before a transition is accepted.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(50);

/// Raw sampling period.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Per-button debounce state. Buttons are active-high with pull-downs, so
/// both the raw and stable levels start low.
pub struct Debouncer {
    stable: bool,
    last_raw: bool,
    last_change: Instant,
}

impl Debouncer {
    pub fn new(now: Instant) -> Self {
        Self {
            stable: false,
            last_raw: false,
            last_change: now,
        }
    }

    /// Feed one raw sample; returns the accepted transition, if any.
    pub fn update(&mut self, raw: bool, now: Instant) -> Option<Edge> {
        if raw != self.last_raw {
            self.last_raw = raw;
            self.last_change = now;
        }

        if raw != self.stable && now.duration_since(self.last_change) >= DEBOUNCE_DELAY {
            self.stable = raw;
            return Some(if raw { Edge::Rising } else { Edge::Falling });
        }

        None
    }
}

// ---------------------------------------------------------------------------
// Poll task
// ---------------------------------------------------------------------------

/// What a given bank index maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonRole {
    /// Waters the zone at this position with the default duration.
    Zone(usize),
    /// Interrupts the in-flight pulse.
    Stop,
}

/// Poll the bank every 5 ms and translate accepted rising edges into watering
/// requests or stop signals. `roles[i]` describes bank index `i`.
pub async fn run(bank: ButtonBank, roles: Vec<ButtonRole>, water: WateringHandle) {
    let now = Instant::now();
    let mut debouncers: Vec<Debouncer> = (0..bank.len()).map(|_| Debouncer::new(now)).collect();

    info!(buttons = bank.len(), "button poller started");
    let mut ticker = interval(POLL_INTERVAL);

    loop {
        ticker.tick().await;
        let now = Instant::now();

        for (index, debouncer) in debouncers.iter_mut().enumerate() {
            let raw = bank.read(index);
            if debouncer.update(raw, now) != Some(Edge::Rising) {
                continue;
            }

            match roles[index] {
                ButtonRole::Zone(position) => {
                    info!(zone = position, "zone button pressed");
                    water.water_zone(WaterRequest::button(position)).await;
                }
                ButtonRole::Stop => {
                    info!("stop button pressed");
                    water.stop_watering();
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
