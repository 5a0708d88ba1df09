//! Optional environment sensing: a temperature/humidity sensor and per-zone
//! capacitive soil-moisture sensors, each polled on its configured interval.
//!
//! The drivers themselves are external collaborators; this module defines
//! the blocking sample traits they implement and ships simulators for
//! development without hardware. Samples are published as line protocol and
//! never fed back into watering decisions.

use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};

use crate::command::{humidity_line, moisture_line, temperature_line};
use crate::publish::Transport;

/// Raw readings this far outside the dry/wet calibration window indicate a
/// disconnected or failed sensor rather than real soil state.
const MOISTURE_FAILURE_MARGIN: i32 = 300;

// ---------------------------------------------------------------------------
// Sample traits
// ---------------------------------------------------------------------------

/// Blocking combined temperature/humidity read. Either value may come back
/// NaN when the sensor misses a conversion.
pub trait TempHumiditySensor: Send {
    fn sample(&mut self) -> (f32, f32);
}

/// Blocking raw analog read of one moisture channel.
pub trait MoistureReader: Send {
    fn read_raw(&mut self, channel: u8) -> i32;
}

// ---------------------------------------------------------------------------
// Moisture mapping
// ---------------------------------------------------------------------------

/// Map a raw reading onto 0–100 % using the dry/wet calibration endpoints.
/// Larger raw readings are drier, so the map is inverted: `dry` → 0 %,
/// `wet` → 100 %, clamped outside the window.
pub fn moisture_percent(raw: i32, dry: i32, wet: i32) -> f32 {
    let range = dry - wet;
    if range == 0 {
        return 0.0; // degenerate calibration — avoid div-by-zero
    }
    let percent = (dry - raw) as f32 * 100.0 / range as f32;
    percent.clamp(0.0, 100.0)
}

/// Whether a raw reading is close enough to the calibration window to be a
/// real measurement.
pub fn is_reading_plausible(raw: i32, dry: i32, wet: i32) -> bool {
    let (lo, hi) = if wet < dry { (wet, dry) } else { (dry, wet) };
    raw >= lo - MOISTURE_FAILURE_MARGIN && raw <= hi + MOISTURE_FAILURE_MARGIN
}

// ---------------------------------------------------------------------------
// Simulators (no hardware)
// ---------------------------------------------------------------------------

/// Simulated DHT22: a slow random walk around a plausible indoor climate.
pub struct TempHumiditySim {
    temperature: f32,
    humidity: f32,
}

impl TempHumiditySim {
    pub fn new() -> Self {
        Self {
            temperature: 21.0,
            humidity: 55.0,
        }
    }
}

impl Default for TempHumiditySim {
    fn default() -> Self {
        Self::new()
    }
}

impl TempHumiditySensor for TempHumiditySim {
    fn sample(&mut self) -> (f32, f32) {
        self.temperature = (self.temperature + (fastrand::f32() - 0.5) * 0.4).clamp(5.0, 40.0);
        self.humidity = (self.humidity + (fastrand::f32() - 0.5) * 1.5).clamp(10.0, 95.0);
        (self.temperature, self.humidity)
    }
}

/// Simulated capacitive moisture sensor: each channel drifts slowly toward
/// dry with per-reading noise.
pub struct MoistureSim {
    dry: i32,
    wet: i32,
    base: Vec<f32>,
}

impl MoistureSim {
    pub fn new(channels: usize, dry: i32, wet: i32) -> Self {
        let center = (dry + wet) as f32 / 2.0;
        Self {
            dry,
            wet,
            base: vec![center; channels.max(1)],
        }
    }
}

impl MoistureReader for MoistureSim {
    fn read_raw(&mut self, channel: u8) -> i32 {
        let index = channel as usize % self.base.len();
        let range = (self.dry - self.wet) as f32;

        // Drying drift plus electronic noise.
        let drift = range * 0.002;
        let noise = (fastrand::f32() - 0.5) * range * 0.02;
        self.base[index] =
            (self.base[index] + drift).clamp(self.wet as f32, self.dry as f32);

        (self.base[index] + noise).round() as i32
    }
}

// ---------------------------------------------------------------------------
// Pollers
// ---------------------------------------------------------------------------

/// Read temperature and humidity every `interval_ms`, dropping NaN samples.
pub async fn temp_humidity_task(
    mut sensor: impl TempHumiditySensor,
    interval_ms: u64,
    transport: Transport,
) {
    info!(interval_ms, "temp/humidity poller started");
    let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        ticker.tick().await;
        let (temperature, humidity) = sensor.sample();

        if temperature.is_nan() {
            warn!("temperature sample is NaN, skipping");
        } else {
            let topic = transport.topics().data_temperature();
            transport.publish_data(topic, temperature_line(temperature)).await;
        }

        if humidity.is_nan() {
            warn!("humidity sample is NaN, skipping");
        } else {
            let topic = transport.topics().data_humidity();
            transport.publish_data(topic, humidity_line(humidity)).await;
        }
    }
}

/// Read every configured moisture channel every `interval_ms` and publish the
/// calibrated percentage, tagged with the zone index.
pub async fn moisture_task(
    mut reader: impl MoistureReader,
    zones: Vec<(usize, u8)>,
    dry: i32,
    wet: i32,
    interval_ms: u64,
    transport: Transport,
) {
    info!(zones = zones.len(), interval_ms, "moisture poller started");
    let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        ticker.tick().await;

        for &(position, channel) in &zones {
            let raw = reader.read_raw(channel);

            if !is_reading_plausible(raw, dry, wet) {
                warn!(
                    zone = position,
                    raw, dry, wet, "implausible moisture reading — skipping"
                );
                continue;
            }

            let percent = moisture_percent(raw, dry, wet);
            let topic = transport.topics().data_moisture();
            transport.publish_data(topic, moisture_line(position, percent)).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DRY: i32 = 3100;
    const WET: i32 = 1300;

    // -- moisture_percent ----------------------------------------------------

    #[test]
    fn dry_reference_maps_to_zero_percent() {
        assert_eq!(moisture_percent(DRY, DRY, WET), 0.0);
    }

    #[test]
    fn wet_reference_maps_to_hundred_percent() {
        assert_eq!(moisture_percent(WET, DRY, WET), 100.0);
    }

    #[test]
    fn midpoint_maps_to_fifty_percent() {
        let mid = (DRY + WET) / 2;
        assert_eq!(moisture_percent(mid, DRY, WET), 50.0);
    }

    #[test]
    fn readings_beyond_endpoints_are_clamped() {
        assert_eq!(moisture_percent(DRY + 500, DRY, WET), 0.0);
        assert_eq!(moisture_percent(WET - 500, DRY, WET), 100.0);
    }

    #[test]
    fn mapping_is_monotonic_non_increasing_in_raw() {
        let mut previous = f32::INFINITY;
        for raw in (WET - 200..=DRY + 200).step_by(25) {
            let percent = moisture_percent(raw, DRY, WET);
            assert!(
                percent <= previous,
                "percent rose from {previous} to {percent} at raw={raw}"
            );
            previous = percent;
        }
    }

    #[test]
    fn degenerate_calibration_yields_zero() {
        assert_eq!(moisture_percent(2000, 2000, 2000), 0.0);
    }

    // -- is_reading_plausible ------------------------------------------------

    #[test]
    fn readings_inside_window_are_plausible() {
        assert!(is_reading_plausible(WET, DRY, WET));
        assert!(is_reading_plausible(DRY, DRY, WET));
        assert!(is_reading_plausible((DRY + WET) / 2, DRY, WET));
    }

    #[test]
    fn readings_just_outside_window_are_plausible() {
        assert!(is_reading_plausible(DRY + MOISTURE_FAILURE_MARGIN, DRY, WET));
        assert!(is_reading_plausible(WET - MOISTURE_FAILURE_MARGIN, DRY, WET));
    }

    #[test]
    fn readings_far_outside_window_are_implausible() {
        assert!(!is_reading_plausible(DRY + MOISTURE_FAILURE_MARGIN + 1, DRY, WET));
        assert!(!is_reading_plausible(0, DRY, WET));
        assert!(!is_reading_plausible(i32::MAX, DRY, WET));
    }

    #[test]
    fn plausibility_handles_swapped_calibration() {
        // Same window expressed with wet > dry.
        assert!(is_reading_plausible(2000, WET, DRY));
        assert!(!is_reading_plausible(0, WET, DRY));
    }

    // -- Simulators ----------------------------------------------------------

    #[test]
    fn temp_humidity_sim_stays_in_plausible_ranges() {
        let mut sim = TempHumiditySim::new();
        for _ in 0..500 {
            let (t, h) = sim.sample();
            assert!((5.0..=40.0).contains(&t), "temperature out of range: {t}");
            assert!((10.0..=95.0).contains(&h), "humidity out of range: {h}");
            assert!(!t.is_nan() && !h.is_nan());
        }
    }

    #[test]
    fn moisture_sim_readings_are_plausible() {
        let mut sim = MoistureSim::new(2, DRY, WET);
        for _ in 0..200 {
            for channel in 0..2 {
                let raw = sim.read_raw(channel);
                assert!(
                    is_reading_plausible(raw, DRY, WET),
                    "sim produced implausible raw={raw}"
                );
            }
        }
    }

    #[test]
    fn moisture_sim_trends_drier() {
        let mut sim = MoistureSim::new(1, DRY, WET);
        let early: f32 = (0..20).map(|_| sim.read_raw(0) as f32).sum::<f32>() / 20.0;
        for _ in 0..300 {
            sim.read_raw(0);
        }
        let late: f32 = (0..20).map(|_| sim.read_raw(0) as f32).sum::<f32>() / 20.0;
        assert!(late > early, "expected drying drift: early={early} late={late}");
    }
}
