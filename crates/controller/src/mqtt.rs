//! MQTT transport: client options, the poll loop that doubles as reconnect
//! supervisor, and the dispatcher that turns inbound frames into watering,
//! light, and configuration actions.
//!
//! rumqttc re-dials on every poll after an error, so the 5 s sleep in the
//! error arm gives the periodic reconnect cadence. Subscriptions are
//! re-issued on every ConnAck because the broker may have lost the session.
//! Sustained transport failure is escalated to a reboot request; recovery by
//! restart is simpler than in-band repair on this class of device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::command::{log_line, parse_light_command, parse_water_request, Inbound, Topics};
use crate::config::{ConfigStore, GardenConfig};
use crate::light::LightController;
use crate::provision::Provisioning;
use crate::publish::Transport;
use crate::water::WateringHandle;

/// Reconnect cadence after a transport error.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive poll errors before the network is declared lost (~60 s at the
/// reconnect cadence) and the controller reboots.
const MAX_CONSECUTIVE_ERRORS: u32 = 12;

/// Delay between persisting a new configuration and rebooting into it.
const CONFIG_REBOOT_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Client setup
// ---------------------------------------------------------------------------

/// Build the broker connection: client-id is the topic prefix, sessions are
/// persistent, and a retained last-will marks the controller offline on the
/// log topic.
pub fn client_options(provisioning: &Provisioning, topics: &Topics) -> MqttOptions {
    let mut options = MqttOptions::new(
        topics.prefix(),
        provisioning.mqtt_server.clone(),
        provisioning.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(false);
    options.set_last_will(LastWill::new(
        topics.data_logs(),
        log_line("garden-controller offline").into_bytes(),
        QoS::AtLeastOnce,
        true,
    ));
    options
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Translates inbound command frames into actions. Owns the light controller
/// so all light writes happen on the transport loop task.
pub struct Dispatcher {
    topics: Topics,
    water: WateringHandle,
    light: Option<LightController>,
    config_store: ConfigStore,
    reboot: mpsc::Sender<Duration>,
    transport: Transport,
}

impl Dispatcher {
    pub fn new(
        topics: Topics,
        water: WateringHandle,
        light: Option<LightController>,
        config_store: ConfigStore,
        reboot: mpsc::Sender<Duration>,
        transport: Transport,
    ) -> Self {
        Self {
            topics,
            water,
            light,
            config_store,
            reboot,
            transport,
        }
    }

    pub async fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        let Some(inbound) = self.topics.classify(topic) else {
            warn!(topic = %topic, "unhandled topic");
            return;
        };

        match inbound {
            Inbound::Water => self.handle_water(payload).await,
            Inbound::Stop => {
                info!("received command to stop watering");
                self.water.stop_watering();
            }
            Inbound::StopAll => {
                info!("received command to stop ALL watering");
                self.water.stop_all_watering().await;
            }
            Inbound::Light => self.handle_light(payload).await,
            Inbound::UpdateConfig => self.handle_update_config(payload).await,
        }
    }

    async fn handle_water(&self, payload: &[u8]) {
        match parse_water_request(payload) {
            Ok(request) => {
                info!(
                    zone = request.position,
                    id = %request.request_id,
                    duration_ms = request.duration_ms,
                    "received command to water zone"
                );
                self.water.water_zone(request).await;
            }
            Err(e) => warn!("dropping water command: {e:#}"),
        }
    }

    async fn handle_light(&mut self, payload: &[u8]) {
        let command = match parse_light_command(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("dropping light command: {e:#}");
                return;
            }
        };

        match self.light.as_mut() {
            Some(light) => {
                info!(state = %command.state, "received command to change the light");
                light.handle(command).await;
            }
            None => warn!("light command received but no light is configured"),
        }
    }

    async fn handle_update_config(&mut self, payload: &[u8]) {
        let document = String::from_utf8_lossy(payload);
        let config = match GardenConfig::parse(&document) {
            Ok(config) => config,
            Err(e) => {
                warn!("dropping config update: {e:#}");
                return;
            }
        };

        if let Err(e) = self.config_store.save(&config) {
            error!("failed to persist config update: {e:#}");
            return;
        }

        self.transport
            .log_line("controller config updated, rebooting")
            .await;
        if self.reboot.try_send(CONFIG_REBOOT_DELAY).is_err() {
            warn!("reboot already pending");
        }
    }
}

// ---------------------------------------------------------------------------
// Transport loop
// ---------------------------------------------------------------------------

/// Drive the MQTT event loop forever: dispatch inbound publishes, refresh
/// subscriptions and presence on every connect, back off on errors, and
/// request a reboot when the network stays gone.
pub async fn transport_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    transport: Transport,
    mut dispatcher: Dispatcher,
    reboot: mpsc::Sender<Duration>,
) {
    let mut consecutive_errors: u32 = 0;
    let mut setup_announced = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                connected.store(true, Ordering::Relaxed);
                consecutive_errors = 0;

                for topic in transport.topics().subscriptions() {
                    if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                        error!(topic = %topic, "subscribe failed: {e}");
                    }
                }

                transport.announce_online().await;
                if !setup_announced {
                    transport.log_line("garden-controller setup complete").await;
                    setup_announced = true;
                }
            }

            Ok(Event::Incoming(Packet::Publish(publish))) => {
                info!(topic = %publish.topic, "message received");
                dispatcher.dispatch(&publish.topic, &publish.payload).await;
            }

            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                connected.store(false, Ordering::Relaxed);
            }

            Ok(_) => {}

            Err(e) => {
                connected.store(false, Ordering::Relaxed);
                consecutive_errors += 1;
                error!(attempt = consecutive_errors, "mqtt error: {e}");

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!("network still unreachable after repeated retries — requesting reboot");
                    let _ = reboot.try_send(Duration::ZERO);
                    consecutive_errors = 0;
                }

                tokio::time::sleep(RECONNECT_INTERVAL).await;
            }
        }
    }
}

/// Shared connected flag updated by the transport loop and read by emitters.
pub fn connection_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::gpio::{LightPin, ZoneBank};
    use crate::queue::{Queue, QUEUE_SIZE};
    use crate::water::watering;

    struct Fixture {
        dispatcher: Dispatcher,
        water_handle: WateringHandle,
        light_states: Queue<u8>,
        reboot_rx: mpsc::Receiver<Duration>,
        dir: tempfile::TempDir,
        // Keeps the client's internal channel open for the test's lifetime.
        _eventloop: EventLoop,
    }

    /// A dispatcher wired to a three-zone core (worker not spawned), a mock
    /// light, a temp-dir config store, and an unpolled MQTT client.
    fn fixture() -> Fixture {
        let config = GardenConfig::default();
        let topics = Topics::new("test-garden");

        let bank = ZoneBank::new(&config.zones()).unwrap();
        let publish = Queue::new(QUEUE_SIZE);
        let (water_handle, _worker) =
            watering(config.num_zones, config.default_water_time, bank, publish);

        let light_states = Queue::new(QUEUE_SIZE);
        let light = LightController::new(LightPin::new(32).unwrap(), light_states.clone());

        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());

        let (reboot_tx, reboot_rx) = mpsc::channel(1);

        let options = MqttOptions::new("test", "127.0.0.1", 1883);
        let (client, eventloop) = AsyncClient::new(options, 10);
        let transport = Transport::new(client, connection_flag(), topics.clone());

        let dispatcher = Dispatcher::new(
            topics,
            water_handle.clone(),
            Some(light),
            store,
            reboot_tx,
            transport,
        );

        Fixture {
            dispatcher,
            water_handle,
            light_states,
            reboot_rx,
            dir,
            _eventloop: eventloop,
        }
    }

    #[tokio::test]
    async fn water_command_reaches_the_queue() {
        let mut fx = fixture();
        fx.dispatcher
            .dispatch(
                "test-garden/command/water",
                br#"{"position":1,"duration":3000,"id":"a","zone_id":"z"}"#,
            )
            .await;
        assert_eq!(fx.water_handle.pending_len().await, 1);
    }

    #[tokio::test]
    async fn malformed_water_command_is_dropped() {
        let mut fx = fixture();
        fx.dispatcher
            .dispatch("test-garden/command/water", b"{oops")
            .await;
        assert_eq!(fx.water_handle.pending_len().await, 0);
    }

    #[tokio::test]
    async fn out_of_range_water_command_is_rejected() {
        let mut fx = fixture();
        fx.dispatcher
            .dispatch("test-garden/command/water", br#"{"position":7}"#)
            .await;
        assert_eq!(fx.water_handle.pending_len().await, 0);
    }

    #[tokio::test]
    async fn foreign_topic_is_ignored() {
        let mut fx = fixture();
        fx.dispatcher
            .dispatch("someone-else/command/water", br#"{"position":0}"#)
            .await;
        assert_eq!(fx.water_handle.pending_len().await, 0);
    }

    #[tokio::test]
    async fn light_command_toggles_and_publishes() {
        let mut fx = fixture();
        fx.dispatcher
            .dispatch("test-garden/command/light", b"{}")
            .await;
        assert_eq!(fx.light_states.recv().await, 1);

        fx.dispatcher
            .dispatch("test-garden/command/light", br#"{"state":"OFF"}"#)
            .await;
        assert_eq!(fx.light_states.recv().await, 0);
    }

    #[tokio::test]
    async fn update_config_persists_and_requests_reboot() {
        let mut fx = fixture();
        let document = br#"{"num_zones":2,"valve_pins":[16,17],"pump_pins":[18,18]}"#;

        fx.dispatcher
            .dispatch("test-garden/command/update_config", document)
            .await;

        assert!(fx.dir.path().join(CONFIG_FILE).exists());
        let saved = ConfigStore::new(fx.dir.path()).load();
        assert_eq!(saved.num_zones, 2);

        let delay = fx.reboot_rx.try_recv().expect("reboot should be requested");
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn invalid_update_config_changes_nothing() {
        let mut fx = fixture();

        // Structurally invalid: pin arrays don't match the zone count.
        fx.dispatcher
            .dispatch(
                "test-garden/command/update_config",
                br#"{"num_zones":4,"valve_pins":[16],"pump_pins":[18]}"#,
            )
            .await;

        assert!(!fx.dir.path().join(CONFIG_FILE).exists());
        assert!(fx.reboot_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_all_command_drains_pending_requests() {
        let mut fx = fixture();
        fx.dispatcher
            .dispatch("test-garden/command/water", br#"{"position":0}"#)
            .await;
        fx.dispatcher
            .dispatch("test-garden/command/water", br#"{"position":1}"#)
            .await;
        assert_eq!(fx.water_handle.pending_len().await, 2);

        fx.dispatcher
            .dispatch("test-garden/command/stop_all", b"")
            .await;
        assert_eq!(fx.water_handle.pending_len().await, 0);
    }
}
