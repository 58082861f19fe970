//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{Message, QoS, Result};

/// Connection lifecycle and inbound traffic reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session with the broker was (re)established.
    Connected,
    /// The session dropped; the transport keeps trying to reconnect.
    ConnectionLost(String),
    /// A message arrived on one of the subscribed filters.
    Message(Message),
}

/// Stream of [`TransportEvent`]s handed to the bus alongside its transport.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Broker client abstraction used by [`MessageBus`](crate::MessageBus).
///
/// Implementations report connection changes and inbound messages through the
/// [`EventReceiver`] returned by their constructor; routing to handlers is the
/// bus's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the session, waiting until the broker accepts it.
    async fn connect(&self) -> Result<()>;
    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;
    /// Publish a payload, resolving once the transport acknowledges it.
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()>;
    /// Subscribe to several filters in one request.
    async fn subscribe_multiple(&self, filters: &[(String, QoS)]) -> Result<()>;
    /// Drop subscriptions.
    async fn unsubscribe(&self, topics: &[String]) -> Result<()>;
    /// Close the session, allowing up to `grace` for in-flight work.
    async fn disconnect(&self, grace: Duration) -> Result<()>;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}
