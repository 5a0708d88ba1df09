//! The watering core: a bounded queue of pending requests and a single
//! worker task that owns the valve/pump pins.
//!
//! The worker blocks on the queue, and each dequeued request becomes a timed
//! pulse armed as an interruptible wait: stop cancels just the in-flight
//! pulse, stop-all drains the queue *before* interrupting so the woken
//! worker finds no successor. Completion events are enqueued only after the
//! pins are lowered and carry the measured duration, not the requested one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::gpio::ZoneBank;
use crate::queue::{Queue, StopSignal, QUEUE_SIZE};

// ---------------------------------------------------------------------------
// Requests and events
// ---------------------------------------------------------------------------

/// An instruction to pulse one zone. Correlation tokens are owned by the
/// queued element and echoed verbatim in telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterRequest {
    pub position: i16,
    /// Requested pulse length; 0 selects the configured default.
    pub duration_ms: u64,
    pub zone_id: String,
    pub request_id: String,
}

impl WaterRequest {
    /// Request generated by a local zone button press.
    pub fn button(position: usize) -> Self {
        Self {
            position: position as i16,
            duration_ms: 0,
            zone_id: "N/A".to_string(),
            request_id: "N/A".to_string(),
        }
    }
}

/// A record of a pulse starting (`done == false`, duration 0) or finishing
/// (`done == true`, measured duration). Both records for one request carry
/// identical correlation tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterEvent {
    pub position: i16,
    pub zone_id: String,
    pub request_id: String,
    pub done: bool,
    pub actual_duration_ms: u64,
}

impl WaterEvent {
    fn start(request: &WaterRequest) -> Self {
        Self {
            position: request.position,
            zone_id: request.zone_id.clone(),
            request_id: request.request_id.clone(),
            done: false,
            actual_duration_ms: 0,
        }
    }

    fn complete(request: &WaterRequest, actual_duration_ms: u64) -> Self {
        Self {
            position: request.position,
            zone_id: request.zone_id.clone(),
            request_id: request.request_id.clone(),
            done: true,
            actual_duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Build the watering core: the producer-facing handle and the worker that
/// must be spawned exactly once.
pub fn watering(
    num_zones: usize,
    default_water_time_ms: u64,
    bank: ZoneBank,
    publish: Queue<WaterEvent>,
) -> (WateringHandle, WaterWorker) {
    let pending = Queue::new(QUEUE_SIZE);
    let stop = Arc::new(StopSignal::new());

    let handle = WateringHandle {
        pending: pending.clone(),
        stop: Arc::clone(&stop),
        num_zones,
    };
    let worker = WaterWorker {
        pending,
        stop,
        publish,
        bank,
        default_duration: Duration::from_millis(default_water_time_ms),
    };
    (handle, worker)
}

// ---------------------------------------------------------------------------
// Producer handle
// ---------------------------------------------------------------------------

/// Shared entry point for the command dispatcher and the button poller.
#[derive(Clone)]
pub struct WateringHandle {
    pending: Queue<WaterRequest>,
    stop: Arc<StopSignal>,
    num_zones: usize,
}

impl WateringHandle {
    /// Queue a request for the worker. Out-of-range positions are rejected
    /// here, before anything is enqueued; a send on a full queue waits.
    pub async fn water_zone(&self, request: WaterRequest) {
        if request.position < 0 || request.position as usize >= self.num_zones {
            warn!(
                position = request.position,
                "position out of range, aborting request"
            );
            return;
        }
        info!(
            zone = request.position,
            id = %request.request_id,
            duration_ms = request.duration_ms,
            "queueing water request"
        );
        self.pending.send(request).await;
    }

    /// Interrupt the in-flight pulse, if any. Queued requests proceed in
    /// order.
    pub fn stop_watering(&self) {
        self.stop.raise();
    }

    /// Interrupt the in-flight pulse and discard every queued request. The
    /// drain happens before the interrupt so the woken worker sees an empty
    /// queue.
    pub async fn stop_all_watering(&self) {
        let dropped = self.pending.drain().await;
        self.stop.raise();
        info!(dropped, "stopping all watering");
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.len().await
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// The single task allowed to actuate valve and pump pins.
pub struct WaterWorker {
    pending: Queue<WaterRequest>,
    stop: Arc<StopSignal>,
    publish: Queue<WaterEvent>,
    bank: ZoneBank,
    default_duration: Duration,
}

impl WaterWorker {
    pub async fn run(mut self) {
        // Fail-safe: make sure nothing is actuated from a previous run.
        self.bank.all_off();

        loop {
            let request = self.pending.recv().await;
            self.pulse(request).await;
        }
    }

    async fn pulse(&mut self, request: WaterRequest) {
        // A stop delivered while idle must not cut the next pulse short.
        self.stop.clear();

        let target = if request.duration_ms == 0 {
            self.default_duration
        } else {
            Duration::from_millis(request.duration_ms)
        };

        self.publish.send(WaterEvent::start(&request)).await;

        let position = request.position as usize;
        info!(zone = position, target_ms = target.as_millis() as u64, "turning on zone");
        self.bank.zone_on(position);
        let started = Instant::now();

        // Sleep for the target duration unless a stop arrives first.
        let interrupted = timeout(target, self.stop.wait()).await.is_ok();

        self.bank.zone_off(position);
        let actual = started.elapsed().as_millis() as u64;

        if interrupted {
            info!(zone = position, actual_ms = actual, "watering interrupted");
        } else {
            info!(zone = position, actual_ms = actual, "turning off zone");
        }

        self.publish.send(WaterEvent::complete(&request, actual)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
