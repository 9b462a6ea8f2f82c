//! Concurrent per-device signal state.
//!
//! The registry is the only object touched by more than one actor: the
//! ingestion path records samples while the aggregation scheduler sweeps and
//! snapshots. A single lock around the map keeps every reading internally
//! consistent; all operations hold it only briefly.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::beacon::BeaconIdentity;
use crate::mac_address::MacAddress;

/// Reported when a window holds no samples. Distinct from any plausible
/// RSSI, which is negative but stays above this floor. Not an error value.
pub const NO_SIGNAL_RSSI: i32 = -100;

/// Signal state for one advertisement source.
#[derive(Debug, Clone)]
pub struct DeviceReading {
    pub address: MacAddress,
    /// Most recent RSSI samples, oldest first.
    window: VecDeque<i32>,
    pub last_seen: Instant,
    /// Latest parsed identity; overwritten on every sighting.
    pub identity: Option<BeaconIdentity>,
}

impl DeviceReading {
    fn new(address: MacAddress, capacity: usize, now: Instant) -> Self {
        Self {
            address,
            window: VecDeque::with_capacity(capacity),
            last_seen: now,
            identity: None,
        }
    }

    /// Arithmetic mean of the window, truncated toward zero, or
    /// [`NO_SIGNAL_RSSI`] when no samples have arrived yet.
    pub fn average_rssi(&self) -> i32 {
        if self.window.is_empty() {
            return NO_SIGNAL_RSSI;
        }
        let sum: i64 = self.window.iter().map(|&rssi| i64::from(rssi)).sum();
        (sum / self.window.len() as i64) as i32
    }

    /// The current window contents in arrival order.
    pub fn samples(&self) -> Vec<i32> {
        self.window.iter().copied().collect()
    }
}

/// Shared map from hardware address to [`DeviceReading`].
#[derive(Debug)]
pub struct DeviceRegistry {
    capacity: usize,
    devices: Mutex<HashMap<MacAddress, DeviceReading>>,
}

impl DeviceRegistry {
    /// Create an empty registry with the given per-device window capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Record one sighting: append the sample (evicting the oldest at
    /// capacity), overwrite the identity and refresh the last-seen time.
    pub fn record(&self, address: MacAddress, rssi: i32, identity: BeaconIdentity, now: Instant) {
        let mut devices = self.devices.lock();
        let reading = devices
            .entry(address)
            .or_insert_with(|| DeviceReading::new(address, self.capacity, now));
        if reading.window.len() >= self.capacity {
            reading.window.pop_front();
        }
        reading.window.push_back(rssi);
        reading.identity = Some(identity);
        reading.last_seen = now;
    }

    /// Drop every device not seen for longer than `threshold`.
    pub fn sweep(&self, now: Instant, threshold: Duration) {
        self.devices
            .lock()
            .retain(|_, reading| now.saturating_duration_since(reading.last_seen) <= threshold);
    }

    /// A point-in-time copy of every reading, for payload building without
    /// holding the lock across the publish path.
    pub fn snapshot(&self) -> Vec<DeviceReading> {
        self.devices.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}
