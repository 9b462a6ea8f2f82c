//! BlueZ D-Bus backend.
//!
//! Uses the `bluer` crate to talk to the BlueZ daemon. Monitoring is
//! narrowed to Apple manufacturer data at the radio level; everything else
//! never reaches the channel.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, APPLE_COMPANY_ID, APPLE_COMPANY_ID_BYTES, Advertisement,
    ScanError,
};
use crate::beacon::MANUFACTURER_DATA_TYPE;
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

/// The framed length byte counts the type byte and the company identifier.
const MAX_FRAMED_DATA_LEN: usize = u8::MAX as usize - 3;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Re-frame BlueZ manufacturer data as the raw AD structure it came from.
///
/// BlueZ hands manufacturer payloads with the length, type and company
/// identifier already stripped; the parser walks whole AD structures, so
/// put those bytes back.
fn frame_manufacturer_data(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + data.len());
    frame.push((3 + data.len()) as u8);
    frame.push(MANUFACTURER_DATA_TYPE);
    frame.extend_from_slice(&APPLE_COMPANY_ID_BYTES);
    frame.extend_from_slice(data);
    frame
}

/// Start scanning via the BlueZ daemon.
///
/// Initializes the default adapter and registers a passive monitor for
/// Apple manufacturer data. Received advertisements are sent through the
/// returned channel. Runs until the session drops.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: APPLE_COMPANY_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event
                && let Err(e) = process_device(&adapter, device_id.device, &tx).await
            {
                warn!("device processing failed: {e}");
            }
        }
    });

    Ok(rx)
}

/// Pull manufacturer data and signal strength from a discovered device and
/// forward them as a raw advertisement event.
async fn process_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Advertisement>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;
    let mac: MacAddress = address.into();

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };
    let Some(data) = manufacturer_data.get(&APPLE_COMPANY_ID) else {
        return Ok(());
    };
    if data.len() > MAX_FRAMED_DATA_LEN {
        return Ok(());
    }
    // No RSSI means no usable signal sample; skip the sighting.
    let Some(rssi) = device.rssi().await? else {
        return Ok(());
    };

    let _ = tx
        .send(Advertisement {
            mac,
            rssi: i32::from(rssi),
            data: frame_manufacturer_data(data),
        })
        .await;

    Ok(())
}
