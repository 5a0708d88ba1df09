//! Controller entry point: loads the persisted provisioning and garden
//! configuration, wires the queues, pin banks, and MQTT transport, spawns
//! every task, and supervises shutdown.
//!
//! Safety properties enforced here by construction:
//! - Valve/pump pins are owned by the watering worker alone; every other
//!   path (commands, buttons, shutdown) goes through its queue and stop
//!   signal
//! - Shutdown and reboot run stop-all first so no valve is left open
//! - A persisted config update or sustained network loss restarts the
//!   process; the service manager brings it back up with the new state

mod buttons;
mod command;
mod config;
mod gpio;
mod light;
mod mqtt;
mod provision;
mod publish;
mod queue;
mod sensors;
mod water;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rumqttc::AsyncClient;
use tokio::sync::mpsc;
use tracing::{info, warn};

use buttons::ButtonRole;
use command::Topics;
use config::ConfigStore;
use gpio::{ButtonBank, LightPin, ZoneBank};
use light::LightController;
use publish::Transport;
use queue::{Queue, QUEUE_SIZE};
use sensors::{MoistureSim, TempHumiditySim};
use water::watering;

/// Exit code telling the service manager to restart the unit — the daemon
/// rendition of a device reboot.
const REBOOT_EXIT_CODE: i32 = 10;

/// Grace period for the worker to lower pins after the shutdown stop-all.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    // ── Structured logging ──────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Persisted documents ─────────────────────────────────────────
    let fs_root = PathBuf::from(env::var("GARDEN_FS_ROOT").unwrap_or_else(|_| "/".to_string()));
    let store = ConfigStore::new(&fs_root);
    store.init()?;

    let provisioning = provision::load(&fs_root);
    let garden = store.load();
    garden.log_summary();

    let topics = Topics::new(&provisioning.mqtt_topic_prefix);

    // ── Queues ──────────────────────────────────────────────────────
    let water_publish = Queue::new(QUEUE_SIZE);
    let light_publish = Queue::new(QUEUE_SIZE);
    let (reboot_tx, mut reboot_rx) = mpsc::channel::<Duration>(1);

    // ── Watering core ───────────────────────────────────────────────
    let zones = garden.zones();
    let bank = ZoneBank::new(&zones)?;
    let (water_handle, water_worker) = watering(
        garden.num_zones,
        garden.default_water_time,
        bank,
        water_publish.clone(),
    );
    tokio::spawn(water_worker.run());

    // ── Light ───────────────────────────────────────────────────────
    let light_controller = if garden.light {
        Some(LightController::new(
            LightPin::new(garden.light_pin)?,
            light_publish.clone(),
        ))
    } else {
        None
    };

    // ── MQTT transport ──────────────────────────────────────────────
    let options = mqtt::client_options(&provisioning, &topics);
    let (client, eventloop) = AsyncClient::new(options, 20);
    let connected = mqtt::connection_flag();
    let transport = Transport::new(client.clone(), Arc::clone(&connected), topics.clone());

    let dispatcher = mqtt::Dispatcher::new(
        topics,
        water_handle.clone(),
        light_controller,
        store.clone(),
        reboot_tx.clone(),
        transport.clone(),
    );
    tokio::spawn(mqtt::transport_loop(
        eventloop,
        client,
        connected,
        transport.clone(),
        dispatcher,
        reboot_tx.clone(),
    ));

    // ── Publisher fabric ────────────────────────────────────────────
    tokio::spawn(publish::water_publisher_task(water_publish, transport.clone()));
    if garden.light {
        tokio::spawn(publish::light_publisher_task(light_publish, transport.clone()));
    }
    tokio::spawn(publish::health_publisher_task(transport.clone()));

    // ── Buttons ─────────────────────────────────────────────────────
    if garden.has_buttons() {
        let mut pins = Vec::new();
        let mut roles = Vec::new();
        for zone in &zones {
            if let Some(pin) = zone.button_pin {
                pins.push(pin);
                roles.push(ButtonRole::Zone(zone.position));
            }
        }
        if let Some(pin) = garden.stop_button_pin {
            pins.push(pin);
            roles.push(ButtonRole::Stop);
        }
        let button_bank = ButtonBank::new(&pins)?;
        tokio::spawn(buttons::run(button_bank, roles, water_handle.clone()));
    }

    // ── Sensor pollers ──────────────────────────────────────────────
    if garden.temp_humidity {
        tokio::spawn(sensors::temp_humidity_task(
            TempHumiditySim::new(),
            garden.temp_humidity_interval,
            transport.clone(),
        ));
    }
    if garden.moisture {
        let moisture_zones: Vec<(usize, u8)> = zones
            .iter()
            .filter_map(|z| z.moisture_channel.map(|channel| (z.position, channel)))
            .collect();
        if moisture_zones.is_empty() {
            warn!("moisture enabled but no zone has a channel configured");
        } else {
            let sim = MoistureSim::new(
                moisture_zones.len(),
                garden.moisture_dry,
                garden.moisture_wet,
            );
            tokio::spawn(sensors::moisture_task(
                sim,
                moisture_zones,
                garden.moisture_dry,
                garden.moisture_wet,
                garden.moisture_interval,
                transport.clone(),
            ));
        }
    }

    info!("garden-controller setup complete");

    // ── Signals & reboot mailbox ────────────────────────────────────
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let mut reboot = false;
    let exit_reason: &str;

    tokio::select! {
        _ = &mut ctrl_c => {
            exit_reason = "SIGINT";
        }
        _ = sigterm.recv() => {
            exit_reason = "SIGTERM";
        }
        delay = reboot_rx.recv() => {
            let delay = delay.unwrap_or_default();
            info!(delay_ms = delay.as_millis() as u64, "reboot requested");
            tokio::time::sleep(delay).await;
            exit_reason = "reboot";
            reboot = true;
        }
    }

    // ── Graceful shutdown: the worker lowers its own pins ───────────
    warn!(reason = exit_reason, "shutting down — stopping all watering");
    water_handle.stop_all_watering().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    transport
        .log_line(&format!("garden-controller shutting down ({exit_reason})"))
        .await;

    if reboot {
        info!("restarting");
        std::process::exit(REBOOT_EXIT_CODE);
    }

    info!("shutdown complete");
    Ok(())
}
