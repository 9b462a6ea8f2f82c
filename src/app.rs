//! Core application runner for `beacon-agent`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit
//! codes so it can be tested deterministically with an injected scanner,
//! injected messaging and injected output streams.

use crate::beacon::{BeaconUuid, parse_advertisement};
use crate::config::{self, BeaconConfig, BeaconLabel};
use crate::mqtt::{Messaging, MqttClient, MqttEvent, MqttSettings, client_id_from};
use crate::position::PositionSmoother;
use crate::registry::DeviceRegistry;
use crate::scanner::{Advertisement, Backend, ScanError};
use crate::scheduler::Scheduler;
use clap::Parser;
use std::fmt;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

const STATUS_CHANNEL_BUFFER_SIZE: usize = 16;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// MQTT broker host.
    #[arg(long, default_value = "192.168.8.10")]
    pub broker_host: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    pub broker_port: u16,

    /// Device identifier used as the broker client id and in published
    /// payloads. Defaults to the sanitized hostname.
    #[arg(long)]
    pub device_id: Option<String>,

    /// Proximity UUID of the beacons to track.
    #[arg(long, default_value_t = config::DEFAULT_TARGET_UUID)]
    pub uuid: BeaconUuid,

    /// Track a beacon minor under a payload label.
    /// Format: --beacon 1=b1 (repeatable; defaults to 1=b1 2=b2 3=b3)
    #[arg(long = "beacon", value_parser = config::parse_label, value_name = "MINOR=LABEL")]
    pub beacons: Vec<BeaconLabel>,

    /// Sliding-window capacity for per-device RSSI samples.
    #[arg(long, default_value_t = config::DEFAULT_WINDOW_CAPACITY)]
    pub window: usize,

    /// Drop a device after this long without an advertisement.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, default_value = "2s", value_parser = config::parse_duration)]
    pub staleness: Duration,

    /// Interval between aggregate publishes.
    #[arg(long, default_value = "1s", value_parser = config::parse_duration)]
    pub interval: Duration,

    /// Weight given to new samples by the position display filter.
    #[arg(long, default_value_t = config::DEFAULT_SMOOTHING_FACTOR)]
    pub smoothing: f64,

    /// Verbose output, print ignored advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

impl Options {
    /// Assemble the immutable pipeline configuration.
    pub fn beacon_config(&self) -> BeaconConfig {
        let labels = if self.beacons.is_empty() {
            config::default_labels()
        } else {
            config::to_label_map(&self.beacons)
        };
        BeaconConfig {
            target_uuid: self.uuid,
            labels,
            window_capacity: self.window,
            staleness: self.staleness,
            publish_interval: self.interval,
            smoothing_factor: self.smoothing,
        }
    }

    /// The sanitized device identifier, from the flag or the hostname.
    pub fn resolved_device_id(&self) -> String {
        match &self.device_id {
            Some(id) => client_id_from(id),
            None => client_id_from(&gethostname::gethostname().to_string_lossy()),
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Observer-facing status updates, rendered as the lines the display shows.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    MqttConnected,
    MqttConnectFailed(String),
    MqttConnectionLost(String),
    Beacons { visible: usize, total: usize },
    PublishOk,
    PublishFailed(String),
    PublishSkipped,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::MqttConnected => write!(f, "MQTT: Connected"),
            StatusEvent::MqttConnectFailed(_) => write!(f, "MQTT: Connection Failed"),
            StatusEvent::MqttConnectionLost(reason) => {
                write!(f, "MQTT: Connection Lost ({reason})")
            }
            StatusEvent::Beacons { visible, total } => {
                write!(f, "Beacons: {visible}/{total} visible")
            }
            StatusEvent::PublishOk => write!(f, "Last Publish: OK"),
            StatusEvent::PublishFailed(reason) => write!(f, "Last Publish: FAILED ({reason})"),
            StatusEvent::PublishSkipped => write!(f, "Last Publish: SKIPPED (no beacons)"),
        }
    }
}

fn status_for(event: &MqttEvent) -> Option<StatusEvent> {
    match event {
        MqttEvent::Connected => Some(StatusEvent::MqttConnected),
        MqttEvent::ConnectFailed(reason) => Some(StatusEvent::MqttConnectFailed(reason.clone())),
        MqttEvent::ConnectionLost(reason) => Some(StatusEvent::MqttConnectionLost(reason.clone())),
        MqttEvent::PublishOk => Some(StatusEvent::PublishOk),
        MqttEvent::PublishFailed(reason) => Some(StatusEvent::PublishFailed(reason.clone())),
        MqttEvent::Position(_) => None,
    }
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth
/// hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Feed one advertisement through identification into the registry.
///
/// Returns true when the packet carried a tracked beacon and was recorded.
pub fn ingest(
    config: &BeaconConfig,
    registry: &DeviceRegistry,
    advertisement: &Advertisement,
    now: Instant,
) -> bool {
    match parse_advertisement(&advertisement.data) {
        Some(identity) if config.tracks(&identity) => {
            registry.record(advertisement.mac, advertisement.rssi, identity, now);
            true
        }
        _ => false,
    }
}

/// Run the core pipeline, writing display lines to `out` and diagnostics to
/// `err`.
///
/// Advertisement events are identified and recorded; the scheduler sweeps
/// and publishes on its own cadence; inbound positions are smoothed and
/// written as display lines. Returns when the advertisement stream closes,
/// after cancelling the scheduler and dropping the broker session.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    messaging: Arc<dyn Messaging>,
    mut messaging_events: mpsc::Receiver<MqttEvent>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let config = Arc::new(options.beacon_config());
    let device_id = options.resolved_device_id();
    let registry = Arc::new(DeviceRegistry::new(config.window_capacity));
    let mut smoother = PositionSmoother::new(config.smoothing_factor);

    let mut advertisements = scanner.start_scan(options.backend).await?;

    let (status_tx, mut status_rx) = mpsc::channel(STATUS_CHANNEL_BUFFER_SIZE);
    let scheduler = tokio::spawn(
        Scheduler::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            device_id,
            Arc::clone(&messaging),
            status_tx,
        )
        .run(),
    );

    loop {
        tokio::select! {
            advertisement = advertisements.recv() => {
                match advertisement {
                    Some(advertisement) => {
                        let recorded =
                            ingest(&config, &registry, &advertisement, Instant::now());
                        if !recorded && options.verbose {
                            writeln!(err, "ignored advertisement from {}", advertisement.mac)?;
                        }
                    }
                    None => break,
                }
            }
            Some(event) = messaging_events.recv() => {
                if let MqttEvent::Position(raw) = event {
                    let smoothed = smoother.update(raw);
                    writeln!(out, "Position: {:.3},{:.3}", smoothed.x, smoothed.y)?;
                } else if let Some(status) = status_for(&event) {
                    writeln!(out, "{status}")?;
                }
            }
            Some(status) = status_rx.recv() => {
                writeln!(out, "{status}")?;
            }
        }
    }

    // Shutdown order: cancel the publish timer, then drop the broker
    // session. Ingestion already stopped with the advertisement stream.
    scheduler.abort();
    messaging.disconnect();
    Ok(())
}

/// Run against the real scanner backends and a real broker session.
pub async fn run(
    options: Options,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let settings = MqttSettings {
        host: options.broker_host.clone(),
        port: options.broker_port,
        client_id: options.resolved_device_id(),
    };
    let (client, events) = MqttClient::connect(settings);
    run_with_io(options, &RealScanner, Arc::new(client), events, out, err).await
}
