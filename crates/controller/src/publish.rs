//! Publisher fabric: the transport wrapper shared by every emitter, plus the
//! water, light, and health emitter tasks.
//!
//! Telemetry is best-effort: an emitter that finds the transport
//! disconnected drops the message with a log line and keeps consuming, so a
//! broker outage never backs up into the watering core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::command::{health_line, light_line, log_line, water_line, Topics};
use crate::queue::Queue;
use crate::water::WaterEvent;

/// Health check-in cadence.
pub const HEALTH_PUBLISH_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Cloneable publish-side view of the MQTT connection. The underlying client
/// serializes all publishes onto its event loop, so emitters can share it
/// freely.
#[derive(Clone)]
pub struct Transport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    topics: Topics,
}

impl Transport {
    pub fn new(client: AsyncClient, connected: Arc<AtomicBool>, topics: Topics) -> Self {
        Self {
            client,
            connected,
            topics,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Publish one telemetry line, dropping it if the broker is unreachable.
    pub async fn publish_data(&self, topic: String, line: String) {
        if !self.is_connected() {
            warn!(topic = %topic, "unable to publish: not connected to MQTT broker");
            return;
        }

        debug!(topic = %topic, message = %line, "publishing to MQTT");
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, line.into_bytes())
            .await
        {
            warn!("publish failed: {e}");
        }
    }

    /// Publish a free-form device log line to `<prefix>/data/logs`.
    pub async fn log_line(&self, message: &str) {
        self.publish_data(self.topics.data_logs(), log_line(message)).await;
    }

    /// Retained presence announcement on the log topic; pairs with the
    /// last-will registered at connect time.
    pub async fn announce_online(&self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self
            .client
            .publish(
                self.topics.data_logs(),
                QoS::AtLeastOnce,
                true,
                log_line("garden-controller online").into_bytes(),
            )
            .await
        {
            warn!("online announcement failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Emitters
// ---------------------------------------------------------------------------

/// Drain the water event queue into `<prefix>/data/water`, preserving FIFO
/// order.
pub async fn water_publisher_task(events: Queue<WaterEvent>, transport: Transport) {
    info!("water publisher started");
    loop {
        let event = events.recv().await;
        let topic = transport.topics().data_water();
        transport.publish_data(topic, water_line(&event)).await;
    }
}

/// Drain the light state queue into `<prefix>/data/light`.
pub async fn light_publisher_task(states: Queue<u8>, transport: Transport) {
    info!("light publisher started");
    loop {
        let state = states.recv().await;
        let topic = transport.topics().data_light();
        let line = light_line(transport.topics().prefix(), state);
        transport.publish_data(topic, line).await;
    }
}

/// Publish a health check-in every minute.
pub async fn health_publisher_task(transport: Transport) {
    info!("health publisher started");
    let mut ticker = interval(HEALTH_PUBLISH_INTERVAL);
    loop {
        ticker.tick().await;
        let topic = transport.topics().data_health();
        let line = health_line(transport.topics().prefix());
        transport.publish_data(topic, line).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
