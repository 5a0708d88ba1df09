//! Command codec: the topic map rooted at the configured prefix, inbound
//! payload parsing, and line-protocol telemetry formatting.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::light::LightCommand;
use crate::water::{WaterEvent, WaterRequest};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

const WATER_COMMAND: &str = "/command/water";
const STOP_COMMAND: &str = "/command/stop";
const STOP_ALL_COMMAND: &str = "/command/stop_all";
const LIGHT_COMMAND: &str = "/command/light";
const UPDATE_CONFIG_COMMAND: &str = "/command/update_config";

const WATER_DATA: &str = "/data/water";
const LIGHT_DATA: &str = "/data/light";
const HEALTH_DATA: &str = "/data/health";
const TEMPERATURE_DATA: &str = "/data/temperature";
const HUMIDITY_DATA: &str = "/data/humidity";
const MOISTURE_DATA: &str = "/data/moisture";
const LOGS_DATA: &str = "/data/logs";

/// The commands a controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Water,
    Stop,
    StopAll,
    Light,
    UpdateConfig,
}

/// Topic names built from the configured prefix.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Every command topic the controller subscribes to.
    pub fn subscriptions(&self) -> [String; 5] {
        [
            self.join(WATER_COMMAND),
            self.join(STOP_COMMAND),
            self.join(STOP_ALL_COMMAND),
            self.join(LIGHT_COMMAND),
            self.join(UPDATE_CONFIG_COMMAND),
        ]
    }

    /// Map an incoming topic back to the command it carries.
    pub fn classify(&self, topic: &str) -> Option<Inbound> {
        let suffix = topic.strip_prefix(self.prefix.as_str())?;
        match suffix {
            WATER_COMMAND => Some(Inbound::Water),
            STOP_COMMAND => Some(Inbound::Stop),
            STOP_ALL_COMMAND => Some(Inbound::StopAll),
            LIGHT_COMMAND => Some(Inbound::Light),
            UPDATE_CONFIG_COMMAND => Some(Inbound::UpdateConfig),
            _ => None,
        }
    }

    pub fn data_water(&self) -> String {
        self.join(WATER_DATA)
    }

    pub fn data_light(&self) -> String {
        self.join(LIGHT_DATA)
    }

    pub fn data_health(&self) -> String {
        self.join(HEALTH_DATA)
    }

    pub fn data_temperature(&self) -> String {
        self.join(TEMPERATURE_DATA)
    }

    pub fn data_humidity(&self) -> String {
        self.join(HUMIDITY_DATA)
    }

    pub fn data_moisture(&self) -> String {
        self.join(MOISTURE_DATA)
    }

    pub fn data_logs(&self) -> String {
        self.join(LOGS_DATA)
    }

    fn join(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WaterPayload {
    #[serde(default = "default_position")]
    position: i16,
    #[serde(default)]
    duration: u64,
    #[serde(default = "default_token")]
    zone_id: String,
    #[serde(default = "default_token")]
    id: String,
}

fn default_position() -> i16 {
    -1
}

fn default_token() -> String {
    "N/A".to_string()
}

/// Parse a water command. Missing fields take the documented defaults; an
/// out-of-range default position is rejected downstream by the watering
/// bounds check.
pub fn parse_water_request(payload: &[u8]) -> Result<WaterRequest> {
    let parsed: WaterPayload =
        serde_json::from_slice(payload).context("failed to parse water command")?;
    Ok(WaterRequest {
        position: parsed.position,
        duration_ms: parsed.duration,
        zone_id: parsed.zone_id,
        request_id: parsed.id,
    })
}

#[derive(Debug, Deserialize)]
struct LightPayload {
    #[serde(default)]
    state: String,
}

pub fn parse_light_command(payload: &[u8]) -> Result<LightCommand> {
    let parsed: LightPayload =
        serde_json::from_slice(payload).context("failed to parse light command")?;
    Ok(LightCommand {
        state: parsed.state,
    })
}

// ---------------------------------------------------------------------------
// Telemetry formatting (InfluxDB line protocol)
// ---------------------------------------------------------------------------

pub fn water_line(event: &WaterEvent) -> String {
    let status = if event.done { "complete" } else { "start" };
    format!(
        "water,status={status},zone={},id={},zone_id={} millis={}",
        event.position, event.request_id, event.zone_id, event.actual_duration_ms
    )
}

pub fn light_line(prefix: &str, state: u8) -> String {
    format!("light,garden=\"{prefix}\" state={state}")
}

pub fn health_line(prefix: &str) -> String {
    format!("health garden=\"{prefix}\"")
}

pub fn temperature_line(value: f32) -> String {
    format!("temperature value={value}")
}

pub fn humidity_line(value: f32) -> String {
    format!("humidity value={value}")
}

pub fn moisture_line(zone: usize, value: f32) -> String {
    format!("moisture,zone={zone} value={value}")
}

pub fn log_line(message: &str) -> String {
    format!("logs message=\"{message}\"")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("test-garden")
    }

    // -- Topics ---------------------------------------------------------------

    #[test]
    fn subscriptions_cover_all_commands() {
        let subs = topics().subscriptions();
        assert_eq!(
            subs,
            [
                "test-garden/command/water",
                "test-garden/command/stop",
                "test-garden/command/stop_all",
                "test-garden/command/light",
                "test-garden/command/update_config",
            ]
        );
    }

    #[test]
    fn classify_known_topics() {
        let t = topics();
        assert_eq!(t.classify("test-garden/command/water"), Some(Inbound::Water));
        assert_eq!(t.classify("test-garden/command/stop"), Some(Inbound::Stop));
        assert_eq!(
            t.classify("test-garden/command/stop_all"),
            Some(Inbound::StopAll)
        );
        assert_eq!(t.classify("test-garden/command/light"), Some(Inbound::Light));
        assert_eq!(
            t.classify("test-garden/command/update_config"),
            Some(Inbound::UpdateConfig)
        );
    }

    #[test]
    fn classify_rejects_foreign_topics() {
        let t = topics();
        assert_eq!(t.classify("test-garden/data/water"), None);
        assert_eq!(t.classify("other-garden/command/water"), None);
        assert_eq!(t.classify("test-garden/command/unknown"), None);
        assert_eq!(t.classify(""), None);
    }

    #[test]
    fn data_topics_are_rooted_at_prefix() {
        let t = topics();
        assert_eq!(t.data_water(), "test-garden/data/water");
        assert_eq!(t.data_light(), "test-garden/data/light");
        assert_eq!(t.data_health(), "test-garden/data/health");
        assert_eq!(t.data_temperature(), "test-garden/data/temperature");
        assert_eq!(t.data_humidity(), "test-garden/data/humidity");
        assert_eq!(t.data_moisture(), "test-garden/data/moisture");
        assert_eq!(t.data_logs(), "test-garden/data/logs");
    }

    // -- Water payload --------------------------------------------------------

    #[test]
    fn parse_full_water_command() {
        let req = parse_water_request(
            br#"{"position":2,"duration":4000,"zone_id":"z-9","id":"req-1"}"#,
        )
        .unwrap();
        assert_eq!(req.position, 2);
        assert_eq!(req.duration_ms, 4000);
        assert_eq!(req.zone_id, "z-9");
        assert_eq!(req.request_id, "req-1");
    }

    #[test]
    fn parse_water_command_defaults() {
        let req = parse_water_request(b"{}").unwrap();
        assert_eq!(req.position, -1);
        assert_eq!(req.duration_ms, 0);
        assert_eq!(req.zone_id, "N/A");
        assert_eq!(req.request_id, "N/A");
    }

    #[test]
    fn parse_water_command_partial_fields() {
        let req = parse_water_request(br#"{"position":1}"#).unwrap();
        assert_eq!(req.position, 1);
        assert_eq!(req.duration_ms, 0);
        assert_eq!(req.request_id, "N/A");
    }

    #[test]
    fn parse_water_command_rejects_malformed_json() {
        assert!(parse_water_request(b"{position:").is_err());
        assert!(parse_water_request(b"").is_err());
    }

    // -- Light payload --------------------------------------------------------

    #[test]
    fn parse_light_command_with_state() {
        let cmd = parse_light_command(br#"{"state":"ON"}"#).unwrap();
        assert_eq!(cmd.state, "ON");
    }

    #[test]
    fn parse_light_command_defaults_to_toggle() {
        let cmd = parse_light_command(b"{}").unwrap();
        assert_eq!(cmd.state, "");
    }

    #[test]
    fn parse_light_command_rejects_malformed_json() {
        assert!(parse_light_command(b"nope").is_err());
    }

    // -- Line protocol --------------------------------------------------------

    #[test]
    fn water_start_line_format() {
        let event = WaterEvent {
            position: 0,
            zone_id: "z".to_string(),
            request_id: "a".to_string(),
            done: false,
            actual_duration_ms: 0,
        };
        assert_eq!(
            water_line(&event),
            "water,status=start,zone=0,id=a,zone_id=z millis=0"
        );
    }

    #[test]
    fn water_complete_line_format() {
        let event = WaterEvent {
            position: 2,
            zone_id: "z-4".to_string(),
            request_id: "req-7".to_string(),
            done: true,
            actual_duration_ms: 4987,
        };
        assert_eq!(
            water_line(&event),
            "water,status=complete,zone=2,id=req-7,zone_id=z-4 millis=4987"
        );
    }

    #[test]
    fn light_line_format() {
        assert_eq!(light_line("garden", 1), "light,garden=\"garden\" state=1");
        assert_eq!(light_line("garden", 0), "light,garden=\"garden\" state=0");
    }

    #[test]
    fn health_line_format() {
        assert_eq!(health_line("test-garden"), "health garden=\"test-garden\"");
    }

    #[test]
    fn sensor_line_formats() {
        assert_eq!(temperature_line(21.5), "temperature value=21.5");
        assert_eq!(humidity_line(48.0), "humidity value=48");
        assert_eq!(moisture_line(1, 62.5), "moisture,zone=1 value=62.5");
    }

    #[test]
    fn log_line_format() {
        assert_eq!(
            log_line("garden-controller setup complete"),
            "logs message=\"garden-controller setup complete\""
        );
    }
}
