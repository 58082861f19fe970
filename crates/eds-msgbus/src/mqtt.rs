//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eds_common::config::{MqttConfig, TlsConfig};
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, SubscribeFilter,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{EventReceiver, Transport, TransportEvent};
use crate::{Message, MsgBusError, QoS, Result};

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// MQTT 3.1.1 transport built on `rumqttc`.
///
/// The event loop runs on its own task once [`connect`](Transport::connect) is
/// called. Polling after a connection error is how `rumqttc` reconnects, so the
/// loop keeps going until [`disconnect`](Transport::disconnect).
pub struct MqttTransport {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
    connect_timeout: Duration,
    broker: String,
}

impl MqttTransport {
    /// Build a client for the configured broker. No network traffic happens until `connect`.
    pub fn new(config: &MqttConfig) -> Result<(Self, EventReceiver)> {
        let client_id = format!("{}-{}", config.client_id_prefix, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(config.clean_session);
        if let Some(username) = &config.username {
            options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }
        if let Some(tls) = &config.tls {
            options.set_transport(tls_transport(tls)?);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events, receiver) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(false);
        let broker = config.broker_url();
        info!(client_id = %client_id, broker = %broker, "mqtt client created");

        Ok((
            Self {
                client,
                event_loop: Mutex::new(Some(event_loop)),
                poller: Mutex::new(None),
                events,
                connected,
                closed: Arc::new(AtomicBool::new(false)),
                connect_timeout: config.connect_timeout,
                broker,
            },
            receiver,
        ))
    }

    fn start_poller(&self) {
        let Some(event_loop) = self.event_loop.lock().take() else {
            return;
        };
        let handle = tokio::spawn(poll_events(
            event_loop,
            self.events.clone(),
            self.connected.clone(),
            Arc::clone(&self.closed),
            self.broker.clone(),
        ));
        *self.poller.lock() = Some(handle);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MsgBusError::Closed);
        }
        Ok(())
    }
}

fn tls_transport(tls: &TlsConfig) -> Result<rumqttc::Transport> {
    let ca = fs::read(&tls.ca_path)?;
    let client_auth = match (&tls.cert_path, &tls.key_path) {
        (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
        _ => None,
    };
    Ok(rumqttc::Transport::tls(ca, client_auth, None))
}

async fn poll_events(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
    broker: String,
) {
    loop {
        if closed.load(Ordering::Acquire) {
            break;
        }
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected.send_replace(true);
                    info!(broker = %broker, "mqtt session established");
                    let _ = events.send(TransportEvent::Connected);
                } else {
                    warn!(broker = %broker, code = ?ack.code, "mqtt connection refused");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Message::new(publish.topic, publish.payload);
                let _ = events.send(TransportEvent::Message(message));
            }
            Ok(_) => {}
            Err(err) => {
                if closed.load(Ordering::Acquire) {
                    break;
                }
                if connected.send_replace(false) {
                    warn!(broker = %broker, error = %err, "mqtt connection lost, trying to reconnect");
                    let _ = events.send(TransportEvent::ConnectionLost(err.to_string()));
                } else {
                    debug!(broker = %broker, error = %err, "mqtt connection attempt failed");
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
    connected.send_replace(false);
    debug!(broker = %broker, "mqtt event loop stopped");
}

fn transport_error(err: rumqttc::ClientError) -> MsgBusError {
    MsgBusError::Transport(err.to_string())
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        self.start_poller();
        let mut state = self.connected.subscribe();
        let waited = tokio::time::timeout(self.connect_timeout, state.wait_for(|up| *up))
            .await
            .map(|ready| ready.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MsgBusError::Closed),
            Err(_) => Err(MsgBusError::Transport(format!(
                "no session with {} within {}ms",
                self.broker,
                self.connect_timeout.as_millis()
            ))),
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.client
            .publish_bytes(topic, qos.into(), retain, payload)
            .await
            .map_err(transport_error)
    }

    async fn subscribe_multiple(&self, filters: &[(String, QoS)]) -> Result<()> {
        self.ensure_open()?;
        let filters = filters
            .iter()
            .map(|(topic, qos)| SubscribeFilter::new(topic.clone(), (*qos).into()))
            .collect::<Vec<_>>();
        self.client
            .subscribe_many(filters)
            .await
            .map_err(transport_error)
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        self.ensure_open()?;
        for topic in topics {
            self.client
                .unsubscribe(topic.clone())
                .await
                .map_err(transport_error)?;
        }
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(err) = self.client.disconnect().await {
            debug!(broker = %self.broker, error = %err, "mqtt disconnect request not delivered");
        }
        let poller = self.poller.lock().take();
        if let Some(mut handle) = poller {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.connected.send_replace(false);
        info!(broker = %self.broker, "mqtt session closed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
