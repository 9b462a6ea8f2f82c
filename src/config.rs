//! Runtime configuration for the beacon agent.
//!
//! All values are read once at startup (CLI flags with defaults matching the
//! deployed installation) and are immutable afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::beacon::{BeaconIdentity, BeaconUuid};

/// Proximity UUID of the deployed beacon set.
pub const DEFAULT_TARGET_UUID: BeaconUuid = BeaconUuid([
    0xB3, 0x81, 0x39, 0x6E, 0xA6, 0x91, 0x40, 0x28, 0xB3, 0xB6, 0xCC, 0x5F, 0x87, 0xD3, 0x50,
    0xAA,
]);

/// Per-device sliding-window capacity for RSSI samples.
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// How long a device may go unseen before the sweep drops it.
pub const DEFAULT_STALENESS: Duration = Duration::from_millis(2000);

/// Interval between aggregate publishes.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(1000);

/// Weight given to new samples by the position display filter.
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.15;

/// A parsed `minor=label` mapping for one tracked beacon.
#[derive(Debug, Clone)]
pub struct BeaconLabel {
    /// The beacon's minor number on the wire.
    pub minor: u16,
    /// The key used for this beacon in published payloads (e.g. "b1").
    pub label: String,
}

/// Parse a beacon mapping from a string in the format "MINOR=LABEL".
///
/// # Example
/// ```
/// use beacon_agent::config::parse_label;
///
/// let mapping = parse_label("1=b1").unwrap();
/// assert_eq!(mapping.minor, 1);
/// assert_eq!(mapping.label, "b1");
/// ```
pub fn parse_label(src: &str) -> Result<BeaconLabel, String> {
    let (minor, label) = src
        .split_once('=')
        .ok_or_else(|| "invalid beacon mapping: expected format MINOR=LABEL".to_string())?;
    let minor = minor
        .trim()
        .parse()
        .map_err(|_| format!("invalid beacon minor: {minor}"))?;
    if label.is_empty() {
        return Err("invalid beacon mapping: empty label".to_string());
    }
    Ok(BeaconLabel {
        minor,
        label: label.to_string(),
    })
}

/// Convert a slice of mappings into a minor-to-label lookup map.
pub fn to_label_map(labels: &[BeaconLabel]) -> BTreeMap<u16, String> {
    labels
        .iter()
        .map(|l| (l.minor, l.label.clone()))
        .collect()
}

/// The installation default: minors 1-3 labelled b1-b3.
pub fn default_labels() -> BTreeMap<u16, String> {
    (1..=3).map(|minor| (minor, format!("b{minor}"))).collect()
}

/// Which beacons are tracked and how the pipeline is timed.
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// Only beacons advertising this UUID are tracked.
    pub target_uuid: BeaconUuid,
    /// Tracked minors and the payload keys they publish under.
    pub labels: BTreeMap<u16, String>,
    pub window_capacity: usize,
    pub staleness: Duration,
    pub publish_interval: Duration,
    pub smoothing_factor: f64,
}

impl BeaconConfig {
    /// Whether an identity belongs to the tracked beacon set.
    pub fn tracks(&self, identity: &BeaconIdentity) -> bool {
        identity.uuid == self.target_uuid && self.labels.contains_key(&identity.minor)
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            target_uuid: DEFAULT_TARGET_UUID,
            labels: default_labels(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            staleness: DEFAULT_STALENESS,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use beacon_agent::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    }

    if let Some(num) = src.strip_suffix('h') {
        let hours: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid hours: {}", num))?;
        return Ok(Duration::from_secs(hours * 3600));
    }

    if let Some(num) = src.strip_suffix('m') {
        let minutes: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid minutes: {}", num))?;
        return Ok(Duration::from_secs(minutes * 60));
    }

    if let Some(num) = src.strip_suffix('s') {
        let secs: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds: {}", num))?;
        return Ok(Duration::from_secs(secs));
    }

    // No suffix, treat as seconds
    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::parse_advertisement;
    use crate::test_utils::{TEST_UUID, ibeacon_advertisement};

    #[test]
    fn test_parse_label_valid() {
        let mapping = parse_label("2=kitchen").unwrap();
        assert_eq!(mapping.minor, 2);
        assert_eq!(mapping.label, "kitchen");
    }

    #[test]
    fn test_parse_label_invalid() {
        assert!(parse_label("no-equals-sign").is_err());
        assert!(parse_label("x=b1").is_err());
        assert!(parse_label("1=").is_err());
    }

    #[test]
    fn test_to_label_map() {
        let labels = vec![
            BeaconLabel {
                minor: 1,
                label: "b1".to_string(),
            },
            BeaconLabel {
                minor: 3,
                label: "b3".to_string(),
            },
        ];
        let map = to_label_map(&labels);
        assert_eq!(map.get(&1), Some(&"b1".to_string()));
        assert_eq!(map.get(&3), Some(&"b3".to_string()));
        assert_eq!(map.get(&2), None);
    }

    #[test]
    fn test_default_labels() {
        let map = default_labels();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&2), Some(&"b2".to_string()));
    }

    #[test]
    fn test_tracks_target_and_minor() {
        let config = BeaconConfig::default();

        let tracked = parse_advertisement(&ibeacon_advertisement(TEST_UUID, 1, 2, -59)).unwrap();
        assert!(config.tracks(&tracked));

        let unknown_minor =
            parse_advertisement(&ibeacon_advertisement(TEST_UUID, 1, 9, -59)).unwrap();
        assert!(!config.tracks(&unknown_minor));

        let foreign_uuid = parse_advertisement(&ibeacon_advertisement(
            BeaconUuid([0x11; 16]),
            1,
            2,
            -59,
        ))
        .unwrap();
        assert!(!config.tracks(&foreign_uuid));
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration(" 2s ").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
    }
}
