//! Controller configuration: the persisted `/garden_config.json` document,
//! zone derivation, and pin validation.
//!
//! The document is installed once at boot as an immutable snapshot; an
//! `update_config` command writes a new document and reboots rather than
//! hot-swapping.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// File name of the controller configuration under the filesystem root.
pub const CONFIG_FILE: &str = "garden_config.json";

/// Hard cap on the zone count.
pub const MAX_ZONES: usize = 12;

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

/// A logical watering output, immutable after configuration: one valve and
/// one pump (possibly shared), optionally a button and a moisture channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub position: usize,
    pub valve_pin: u8,
    pub pump_pin: u8,
    pub button_pin: Option<u8>,
    pub moisture_channel: Option<u8>,
}

// ---------------------------------------------------------------------------
// Configuration document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GardenConfig {
    pub num_zones: usize,
    pub valve_pins: Vec<u8>,
    pub pump_pins: Vec<u8>,

    /// Per-zone momentary buttons; empty means no buttons at all.
    #[serde(default)]
    pub button_pins: Vec<Option<u8>>,
    #[serde(default)]
    pub stop_button_pin: Option<u8>,

    #[serde(default)]
    pub light: bool,
    #[serde(default = "default_light_pin")]
    pub light_pin: u8,

    #[serde(default)]
    pub temp_humidity: bool,
    #[serde(default = "default_temp_humidity_pin")]
    pub temp_humidity_pin: u8,
    /// Sample period in milliseconds.
    #[serde(default = "default_temp_humidity_interval")]
    pub temp_humidity_interval: u64,

    #[serde(default)]
    pub moisture: bool,
    /// Per-zone analog channels; entries may be null for zones without a
    /// sensor.
    #[serde(default)]
    pub moisture_channels: Vec<Option<u8>>,
    /// Raw reading with the sensor in air (dry reference).
    #[serde(default = "default_moisture_dry")]
    pub moisture_dry: i32,
    /// Raw reading with the sensor in water (wet reference).
    #[serde(default = "default_moisture_wet")]
    pub moisture_wet: i32,
    /// Sample period in milliseconds.
    #[serde(default = "default_moisture_interval")]
    pub moisture_interval: u64,

    /// Watering duration in milliseconds used when a request carries 0.
    #[serde(default = "default_water_time")]
    pub default_water_time: u64,
}

fn default_light_pin() -> u8 {
    32
}

fn default_temp_humidity_pin() -> u8 {
    27
}

fn default_temp_humidity_interval() -> u64 {
    5_000
}

fn default_moisture_dry() -> i32 {
    3_100
}

fn default_moisture_wet() -> i32 {
    1_300
}

fn default_moisture_interval() -> u64 {
    60_000
}

fn default_water_time() -> u64 {
    5_000
}

impl Default for GardenConfig {
    fn default() -> Self {
        Self {
            num_zones: 3,
            valve_pins: vec![16, 17, 5],
            pump_pins: vec![18, 18, 18],
            button_pins: Vec::new(),
            stop_button_pin: None,
            light: false,
            light_pin: default_light_pin(),
            temp_humidity: false,
            temp_humidity_pin: default_temp_humidity_pin(),
            temp_humidity_interval: default_temp_humidity_interval(),
            moisture: false,
            moisture_channels: Vec::new(),
            moisture_dry: default_moisture_dry(),
            moisture_wet: default_moisture_wet(),
            moisture_interval: default_moisture_interval(),
            default_water_time: default_water_time(),
        }
    }
}

impl GardenConfig {
    pub fn parse(document: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(document).context("failed to parse controller config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize controller config")
    }

    /// Check the structural invariants: array lengths match the declared zone
    /// count, and pins are distinct within {valves ∪ light ∪ buttons ∪
    /// temp/humidity sensor}. Pump pins may repeat across zones.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.num_zones <= MAX_ZONES,
            "num_zones {} exceeds maximum {MAX_ZONES}",
            self.num_zones
        );
        ensure!(
            self.valve_pins.len() == self.num_zones,
            "valve_pins length {} does not match num_zones {}",
            self.valve_pins.len(),
            self.num_zones
        );
        ensure!(
            self.pump_pins.len() == self.num_zones,
            "pump_pins length {} does not match num_zones {}",
            self.pump_pins.len(),
            self.num_zones
        );
        ensure!(
            self.button_pins.is_empty() || self.button_pins.len() == self.num_zones,
            "button_pins length {} does not match num_zones {}",
            self.button_pins.len(),
            self.num_zones
        );
        ensure!(
            self.moisture_channels.is_empty() || self.moisture_channels.len() == self.num_zones,
            "moisture_channels length {} does not match num_zones {}",
            self.moisture_channels.len(),
            self.num_zones
        );
        if self.moisture {
            // Larger raw readings are drier; the calibration must reflect that.
            ensure!(
                self.moisture_dry > self.moisture_wet,
                "moisture_dry ({}) must exceed moisture_wet ({})",
                self.moisture_dry,
                self.moisture_wet
            );
        }

        let mut seen = HashSet::new();
        let mut claim = |pin: u8, role: &str| -> Result<()> {
            ensure!(seen.insert(pin), "pin {pin} assigned twice ({role})");
            Ok(())
        };

        for &pin in &self.valve_pins {
            claim(pin, "valve")?;
        }
        for &pin in self.button_pins.iter().flatten() {
            claim(pin, "button")?;
        }
        if let Some(pin) = self.stop_button_pin {
            claim(pin, "stop button")?;
        }
        if self.light {
            claim(self.light_pin, "light")?;
        }
        if self.temp_humidity {
            claim(self.temp_humidity_pin, "temp/humidity sensor")?;
        }

        Ok(())
    }

    /// Derive the zone table from the parallel pin arrays.
    pub fn zones(&self) -> Vec<Zone> {
        (0..self.num_zones)
            .map(|position| Zone {
                position,
                valve_pin: self.valve_pins[position],
                pump_pin: self.pump_pins[position],
                button_pin: self.button_pins.get(position).copied().flatten(),
                moisture_channel: self.moisture_channels.get(position).copied().flatten(),
            })
            .collect()
    }

    pub fn has_buttons(&self) -> bool {
        self.button_pins.iter().any(Option::is_some) || self.stop_button_pin.is_some()
    }

    pub fn log_summary(&self) {
        info!(
            zones = self.num_zones,
            valve_pins = ?self.valve_pins,
            pump_pins = ?self.pump_pins,
            light = self.light,
            temp_humidity = self.temp_humidity,
            moisture = self.moisture,
            buttons = self.has_buttons(),
            default_water_time_ms = self.default_water_time,
            "controller config"
        );
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load/save of the configuration document under a filesystem root.
#[derive(Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Ensure the backing directory exists (stands in for the device
    /// filesystem mount, which formats itself on failure).
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to prepare config dir {}", self.root.display()))
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load the persisted document. A missing or unparseable document falls
    /// back to compiled-in defaults so the controller always comes up.
    pub fn load(&self) -> GardenConfig {
        let path = self.path();
        if !self.exists() {
            info!(path = %path.display(), "controller config doesn't exist — using defaults");
            return GardenConfig::default();
        }

        let document = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), "failed to read controller config: {e} — using defaults");
                return GardenConfig::default();
            }
        };

        match GardenConfig::parse(&document) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "failed to load controller config: {e:#} — using defaults");
                GardenConfig::default()
            }
        }
    }

    /// Persist `config`, replacing the current document atomically
    /// (write-to-temp-then-rename).
    pub fn save(&self, config: &GardenConfig) -> Result<()> {
        let document = config.serialize()?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, document)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;

        info!(path = %path.display(), "controller config written");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
