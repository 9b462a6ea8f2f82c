//! Periodic aggregation and publishing.
//!
//! A 1 Hz (configurable) cycle: sweep stale devices, report the visible
//! beacon count, build the aggregate payload and hand it to messaging.
//! The timer keeps firing no matter how a cycle went; publish outcomes
//! arrive asynchronously through the messaging event channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::app::StatusEvent;
use crate::config::BeaconConfig;
use crate::mqtt::Messaging;
use crate::registry::{DeviceReading, DeviceRegistry, NO_SIGNAL_RSSI};

/// One publish cycle's summary, built fresh every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePayload {
    pub device_id: String,
    /// Averaged RSSI per configured label, [`NO_SIGNAL_RSSI`] where no
    /// tracked device answers to the label's minor.
    pub readings: BTreeMap<String, i32>,
}

impl AggregatePayload {
    /// Whether at least one label resolved to a real reading.
    pub fn has_signal(&self) -> bool {
        self.readings.values().any(|&rssi| rssi != NO_SIGNAL_RSSI)
    }

    /// Flat JSON object: a `device_id` field plus one field per label.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("device_id".to_string(), Value::from(self.device_id.clone()));
        for (label, rssi) in &self.readings {
            object.insert(label.clone(), Value::from(*rssi));
        }
        Value::Object(object)
    }
}

/// Resolve every configured label against a registry snapshot.
pub fn build_payload(
    readings: &[DeviceReading],
    config: &BeaconConfig,
    device_id: &str,
) -> AggregatePayload {
    let mut resolved = BTreeMap::new();
    for (minor, label) in &config.labels {
        let rssi = readings
            .iter()
            .find(|reading| {
                reading
                    .identity
                    .as_ref()
                    .is_some_and(|identity| identity.minor == *minor)
            })
            .map_or(NO_SIGNAL_RSSI, DeviceReading::average_rssi);
        resolved.insert(label.clone(), rssi);
    }
    AggregatePayload {
        device_id: device_id.to_string(),
        readings: resolved,
    }
}

/// Count distinct tracked devices in a snapshot.
pub fn visible_beacons(readings: &[DeviceReading], config: &BeaconConfig) -> usize {
    readings
        .iter()
        .filter(|reading| {
            reading
                .identity
                .as_ref()
                .is_some_and(|identity| config.labels.contains_key(&identity.minor))
        })
        .count()
}

/// The recurring aggregation task.
pub struct Scheduler {
    config: Arc<BeaconConfig>,
    registry: Arc<DeviceRegistry>,
    device_id: String,
    messaging: Arc<dyn Messaging>,
    status: mpsc::Sender<StatusEvent>,
}

impl Scheduler {
    pub fn new(
        config: Arc<BeaconConfig>,
        registry: Arc<DeviceRegistry>,
        device_id: String,
        messaging: Arc<dyn Messaging>,
        status: mpsc::Sender<StatusEvent>,
    ) -> Self {
        Self {
            config,
            registry,
            device_id,
            messaging,
            status,
        }
    }

    /// Drive the cycle forever. The first tick fires one full interval
    /// after startup; cancellation is the caller aborting the task.
    pub async fn run(self) {
        let period = self.config.publish_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick(Instant::now());
        }
    }

    /// One aggregation cycle: sweep, count, build, publish or skip.
    pub fn tick(&self, now: Instant) {
        self.registry.sweep(now, self.config.staleness);
        let snapshot = self.registry.snapshot();

        let visible = visible_beacons(&snapshot, &self.config);
        self.report(StatusEvent::Beacons {
            visible,
            total: self.config.labels.len(),
        });

        let payload = build_payload(&snapshot, &self.config, &self.device_id);
        if payload.has_signal() {
            self.messaging.publish(payload.to_json().to_string().into_bytes());
        } else {
            debug!("no tracked beacons visible, skipping publish");
            self.report(StatusEvent::PublishSkipped);
        }
    }

    // The observer is a display; losing a status line under backpressure
    // beats stalling the cycle.
    fn report(&self, event: StatusEvent) {
        let _ = self.status.try_send(event);
    }
}
