//! MQTT over secure websockets.
//!
//! [`MqttTransport`] turns a `rumqttc` event loop into the
//! [`TransportEvent`] stream the subscription manager consumes. The event
//! loop reconnects on its own: after a failure it waits for the configured
//! reconnect period, reports [`TransportEvent::Reconnecting`] and polls
//! again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Packet, QoS, TlsConfiguration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BrokerTarget, SubscriptionOptions};
use crate::error::{Error, Result};
use crate::traits::{SessionControl, Transport, TransportEvent, TransportSession};

const CLIENT_ID_PREFIX: &str = "aqi_dashboard_";
const REQUEST_CAPACITY: usize = 10;
const EVENT_CAPACITY: usize = 64;

/// `rumqttc`-backed [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Random client id so concurrent dashboards do not kick each other off.
fn client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}{}", CLIENT_ID_PREFIX, &id[..8])
}

fn mqtt_options(
    target: &BrokerTarget,
    options: &SubscriptionOptions,
    client_id: String,
) -> MqttOptions {
    // Websocket transports take the full URL as the host.
    let mut mqtt_options = MqttOptions::new(client_id, target.url.clone(), target.port);
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_transport(rumqttc::Transport::wss_with_config(TlsConfiguration::Native));
    mqtt_options
}

/// Socket-level options; the connect deadline matches the manager's.
fn network_options(options: &SubscriptionOptions) -> NetworkOptions {
    let mut network_options = NetworkOptions::new();
    network_options.set_connection_timeout(options.connect_timeout.as_secs().max(1));
    network_options
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(
        &self,
        target: &BrokerTarget,
        options: &SubscriptionOptions,
    ) -> Result<TransportSession> {
        let client_id = client_id();
        info!(url = %target.url, client_id = %client_id, "Opening MQTT session");

        let (client, mut eventloop) =
            AsyncClient::new(mqtt_options(target, options, client_id), REQUEST_CAPACITY);
        eventloop.set_network_options(network_options(options));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(run_event_loop(
            eventloop,
            events_tx,
            cancel.clone(),
            options.reconnect_period,
        ));

        Ok(TransportSession {
            events: events_rx,
            control: Arc::new(MqttControl { client, cancel }),
        })
    }
}

struct MqttControl {
    client: AsyncClient,
    cancel: CancellationToken,
}

#[async_trait]
impl SessionControl for MqttControl {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }

    fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.client.try_disconnect() {
            debug!("Error disconnecting MQTT client: {}", e);
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    reconnect_period: Duration,
) {
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("MQTT connected: {:?}", ack);
                connected = true;
                TransportEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            },
            Ok(_) => continue,
            Err(e) => {
                let event = if connected {
                    warn!("MQTT connection lost: {}", e);
                    TransportEvent::Offline
                } else {
                    warn!("MQTT connection error: {}", e);
                    TransportEvent::Error(e.to_string())
                };
                connected = false;
                if events.send(event).await.is_err() {
                    break;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_period) => {}
                }
                TransportEvent::Reconnecting
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    let _ = events.try_send(TransportEvent::Closed);
    debug!("MQTT event loop stopped");
}
