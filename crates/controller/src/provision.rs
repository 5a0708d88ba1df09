//! Bootstrap settings: broker address, topic prefix, and network credentials.
//!
//! On device builds these come from the captive setup portal; the portal is
//! an external collaborator and this module only owns the persisted
//! `/config.json` document it produces, with environment overrides for
//! development.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// File name of the provisioning document under the filesystem root.
pub const PROVISION_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioning {
    pub mqtt_server: String,
    pub mqtt_port: u16,
    /// Root of every topic name and the MQTT client identifier.
    pub mqtt_topic_prefix: String,
    #[serde(default)]
    pub wifi_ssid: String,
    #[serde(default)]
    pub wifi_password: String,
}

impl Default for Provisioning {
    fn default() -> Self {
        Self {
            mqtt_server: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_topic_prefix: "garden".to_string(),
            wifi_ssid: String::new(),
            wifi_password: String::new(),
        }
    }
}

impl Provisioning {
    /// Apply `MQTT_HOST` / `MQTT_PORT` / `TOPIC_PREFIX` environment overrides.
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("MQTT_HOST") {
            self.mqtt_server = host;
        }
        if let Some(port) = std::env::var("MQTT_PORT").ok().and_then(|s| s.parse().ok()) {
            self.mqtt_port = port;
        }
        if let Ok(prefix) = std::env::var("TOPIC_PREFIX") {
            self.mqtt_topic_prefix = prefix;
        }
    }
}

/// Load the provisioning document from `root`, falling back to defaults plus
/// environment overrides when absent or unreadable. A freshly defaulted
/// document is persisted so later boots see the same values the portal would
/// have written.
pub fn load(root: &Path) -> Provisioning {
    let path = root.join(PROVISION_FILE);

    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<Provisioning>(&contents) {
            Ok(mut provisioning) => {
                provisioning.apply_env();
                info!(
                    server = %provisioning.mqtt_server,
                    port = provisioning.mqtt_port,
                    prefix = %provisioning.mqtt_topic_prefix,
                    "loaded provisioning"
                );
                provisioning
            }
            Err(e) => {
                warn!(path = %path.display(), "failed to parse provisioning: {e} — using defaults");
                defaults_with_env()
            }
        },
        Err(_) => {
            info!(
                path = %path.display(),
                "provisioning doesn't exist — using defaults (no setup portal values found)"
            );
            let provisioning = defaults_with_env();
            if let Err(e) = save(root, &provisioning) {
                warn!("failed to persist first-boot provisioning: {e:#}");
            }
            provisioning
        }
    }
}

fn defaults_with_env() -> Provisioning {
    let mut provisioning = Provisioning::default();
    provisioning.apply_env();
    provisioning
}

pub fn save(root: &Path, provisioning: &Provisioning) -> Result<()> {
    let path = root.join(PROVISION_FILE);
    let document =
        serde_json::to_string(provisioning).context("failed to serialize provisioning")?;
    fs::write(&path, document).with_context(|| format!("failed to write {}", path.display()))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let provisioning = Provisioning {
            mqtt_server: "10.0.0.9".to_string(),
            mqtt_port: 8883,
            mqtt_topic_prefix: "greenhouse".to_string(),
            wifi_ssid: "shed".to_string(),
            wifi_password: "hunter2".to_string(),
        };

        save(dir.path(), &provisioning).unwrap();
        assert_eq!(load(dir.path()), provisioning);
    }

    #[test]
    fn load_missing_file_persists_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(dir.path());

        assert_eq!(loaded.mqtt_port, 1883);
        // The first boot wrote the document back.
        assert!(dir.path().join(PROVISION_FILE).exists());
    }

    #[test]
    fn load_corrupt_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROVISION_FILE), "]]]").unwrap();

        let loaded = load(dir.path());
        assert_eq!(loaded.mqtt_topic_prefix, "garden");
    }

    #[test]
    fn credentials_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PROVISION_FILE),
            r#"{"mqtt_server":"broker","mqtt_port":1883,"mqtt_topic_prefix":"p"}"#,
        )
        .unwrap();

        let loaded = load(dir.path());
        assert!(loaded.wifi_ssid.is_empty());
        assert!(loaded.wifi_password.is_empty());
    }
}
