//! MQTT messaging for aggregate readings and position results.
//!
//! One outbound broker session: aggregate payloads go out on
//! [`PUBLISH_TOPIC`], computed positions come back on [`RESULT_TOPIC`].
//! Callers never wait for the network; connect, publish and subscribe
//! completions all arrive through the event channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::position::{Position, decode_position};

/// Topic the aggregate readings are published to.
pub const PUBLISH_TOPIC: &str = "ips/beacons";

/// Topic the computed positions arrive on.
pub const RESULT_TOPIC: &str = "ips/result";

const EVENT_CHANNEL_BUFFER_SIZE: usize = 32;

/// Connection lifecycle of the broker session. No state is ever skipped:
/// `Disconnected -> Connecting -> Connected -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Asynchronous completions and inbound data from the broker session.
#[derive(Debug, Clone, PartialEq)]
pub enum MqttEvent {
    Connected,
    ConnectFailed(String),
    ConnectionLost(String),
    PublishOk,
    PublishFailed(String),
    Position(Position),
}

/// Seam between the aggregation scheduler and the broker session, so the
/// pipeline can be driven by a fake in tests.
pub trait Messaging: Send + Sync {
    /// Hand a serialized aggregate payload to the session. Never blocks;
    /// the outcome arrives as an event.
    fn publish(&self, payload: Vec<u8>);

    /// Tear the session down. Idempotent and callable from any state.
    fn disconnect(&self);

    fn state(&self) -> ClientState;
}

/// Broker connection settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// Derive a broker client identifier from a device name: ASCII
/// alphanumerics pass through, everything else becomes '_'.
pub fn client_id_from(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The real broker session over `rumqttc`.
///
/// There is no automatic reconnect: a failed connect or a lost connection is
/// reported once, the session transitions to `Disconnected` and stays there
/// until the operator restarts the agent.
pub struct MqttClient {
    client: AsyncClient,
    state: Arc<Mutex<ClientState>>,
    events: mpsc::Sender<MqttEvent>,
    eventloop: JoinHandle<()>,
}

impl MqttClient {
    /// Open the broker session. Returns immediately; the connection is
    /// established in the background, subscribes to [`RESULT_TOPIC`] once
    /// up, and reports progress through the returned event channel.
    pub fn connect(settings: MqttSettings) -> (Self, mpsc::Receiver<MqttEvent>) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(15));

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let state = Arc::new(Mutex::new(ClientState::Connecting));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

        let eventloop_task = tokio::spawn({
            let client = client.clone();
            let state = Arc::clone(&state);
            let events = events_tx.clone();
            let host = settings.host.clone();
            async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            *state.lock() = ClientState::Connected;
                            info!("broker session established with {host}");
                            let _ = events.send(MqttEvent::Connected).await;
                            if let Err(e) = client.subscribe(RESULT_TOPIC, QoS::AtMostOnce).await {
                                warn!("result subscription failed: {e}");
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish)))
                            if publish.topic == RESULT_TOPIC =>
                        {
                            match decode_position(&publish.payload) {
                                Some(position) => {
                                    let _ = events.send(MqttEvent::Position(position)).await;
                                }
                                None => debug!("discarding malformed result payload"),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let previous = {
                                let mut state = state.lock();
                                std::mem::replace(&mut *state, ClientState::Disconnected)
                            };
                            match previous {
                                ClientState::Connecting => {
                                    error!("broker connect failed: {e}");
                                    let _ =
                                        events.send(MqttEvent::ConnectFailed(e.to_string())).await;
                                }
                                ClientState::Connected => {
                                    error!("broker connection lost: {e}");
                                    let _ = events
                                        .send(MqttEvent::ConnectionLost(e.to_string()))
                                        .await;
                                }
                                // an explicit disconnect already reported
                                ClientState::Disconnected => {}
                            }
                            break;
                        }
                    }
                }
            }
        });

        (
            Self {
                client,
                state,
                events: events_tx,
                eventloop: eventloop_task,
            },
            events_rx,
        )
    }
}

impl Messaging for MqttClient {
    fn publish(&self, payload: Vec<u8>) {
        if *self.state.lock() != ClientState::Connected {
            let _ = self
                .events
                .try_send(MqttEvent::PublishFailed("disconnected".to_string()));
            return;
        }

        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = match client
                .publish(PUBLISH_TOPIC, QoS::AtLeastOnce, false, payload)
                .await
            {
                Ok(()) => MqttEvent::PublishOk,
                Err(e) => MqttEvent::PublishFailed(e.to_string()),
            };
            let _ = events.send(outcome).await;
        });
    }

    fn disconnect(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, ClientState::Disconnected)
        };
        if previous != ClientState::Disconnected {
            let _ = self.client.try_disconnect();
        }
        // In-flight publishes may be dropped here; acceptable on shutdown.
        self.eventloop.abort();
    }

    fn state(&self) -> ClientState {
        *self.state.lock()
    }
}
