//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Process-local broker with MQTT-style routing.
//!
//! Clean-session semantics apply: a dropped connection loses its
//! subscriptions, so only the bus's resubscription brings them back. The
//! broker also exposes knobs for failure injection (rejected subscriptions,
//! delayed acknowledgements) and counters used by tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::message::topic_matches;
use crate::transport::{EventReceiver, Transport, TransportEvent};
use crate::{Message, MsgBusError, QoS, Result};

/// Shared in-memory broker; clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    next_client: u64,
    clients: HashMap<u64, ClientEntry>,
    subscribe_calls: HashMap<String, usize>,
    rejected: HashSet<String>,
    ack_delay: Option<Duration>,
}

struct ClientEntry {
    session: Session,
    filters: HashMap<String, QoS>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Idle,
    Connected,
    Lost,
    Closed,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client and return its transport with the matching event stream.
    pub fn transport(&self) -> (InMemoryTransport, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_client += 1;
        let id = state.next_client;
        state.clients.insert(
            id,
            ClientEntry {
                session: Session::Idle,
                filters: HashMap::new(),
                events,
            },
        );
        (
            InMemoryTransport {
                id,
                broker: self.clone(),
            },
            receiver,
        )
    }

    /// Drop every live session; subscriptions are discarded.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        for client in state.clients.values_mut() {
            if client.session == Session::Connected {
                client.session = Session::Lost;
                client.filters.clear();
                let _ = client
                    .events
                    .send(TransportEvent::ConnectionLost("connection reset by broker".into()));
            }
        }
    }

    /// Re-establish the sessions dropped by [`drop_connections`](Self::drop_connections).
    pub fn restore_connections(&self) {
        let mut state = self.state.lock();
        for client in state.clients.values_mut() {
            if client.session == Session::Lost {
                client.session = Session::Connected;
                let _ = client.events.send(TransportEvent::Connected);
            }
        }
    }

    /// Drop and immediately restore every live session.
    pub fn simulate_reconnect(&self) {
        self.drop_connections();
        self.restore_connections();
    }

    /// Reject future subscription requests for `topic`.
    pub fn reject_subscriptions(&self, topic: impl Into<String>) {
        self.state.lock().rejected.insert(topic.into());
    }

    /// Accept subscription requests for `topic` again.
    pub fn accept_subscriptions(&self, topic: &str) {
        self.state.lock().rejected.remove(topic);
    }

    /// Delay publish acknowledgements.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state.lock().ack_delay = delay;
    }

    /// Number of subscription requests received for `topic`, rejected ones included.
    pub fn subscribe_calls(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscribe_calls
            .get(topic)
            .copied()
            .unwrap_or_default()
    }

    /// Every filter currently held by any client.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.state
            .lock()
            .clients
            .values()
            .flat_map(|client| client.filters.keys().cloned())
            .collect()
    }

    fn deliver(&self, message: Message) {
        let state = self.state.lock();
        for client in state.clients.values() {
            if client.session != Session::Connected {
                continue;
            }
            if client
                .filters
                .keys()
                .any(|filter| topic_matches(filter, &message.topic))
            {
                let _ = client.events.send(TransportEvent::Message(message.clone()));
            }
        }
    }
}

/// One client connection to an [`InMemoryBroker`].
pub struct InMemoryTransport {
    id: u64,
    broker: InMemoryBroker,
}

impl InMemoryTransport {
    fn ensure_connected(&self, state: &BrokerState) -> Result<()> {
        match state.clients.get(&self.id).map(|client| client.session) {
            Some(Session::Connected) => Ok(()),
            Some(Session::Closed) => Err(MsgBusError::Closed),
            _ => Err(MsgBusError::NotConnected),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<()> {
        let mut state = self.broker.state.lock();
        let client = state
            .clients
            .get_mut(&self.id)
            .ok_or(MsgBusError::NotConnected)?;
        match client.session {
            Session::Connected => Ok(()),
            Session::Closed => Err(MsgBusError::Closed),
            Session::Idle | Session::Lost => {
                client.session = Session::Connected;
                let _ = client.events.send(TransportEvent::Connected);
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.broker
            .state
            .lock()
            .clients
            .get(&self.id)
            .map(|client| client.session == Session::Connected)
            .unwrap_or(false)
    }

    async fn publish(&self, topic: &str, _qos: QoS, _retain: bool, payload: Bytes) -> Result<()> {
        let delay = {
            let state = self.broker.state.lock();
            self.ensure_connected(&state)?;
            state.ack_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.broker.deliver(Message::new(topic, payload));
        Ok(())
    }

    async fn subscribe_multiple(&self, filters: &[(String, QoS)]) -> Result<()> {
        let mut state = self.broker.state.lock();
        self.ensure_connected(&state)?;
        let mut rejected = Vec::new();
        let mut accepted = Vec::new();
        for (topic, qos) in filters {
            *state.subscribe_calls.entry(topic.clone()).or_default() += 1;
            if state.rejected.contains(topic) {
                rejected.push(topic.clone());
            } else {
                accepted.push((topic.clone(), *qos));
            }
        }
        if let Some(client) = state.clients.get_mut(&self.id) {
            client.filters.extend(accepted);
        }
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(MsgBusError::Transport(format!(
                "subscription rejected: {}",
                rejected.join(", ")
            )))
        }
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        let mut state = self.broker.state.lock();
        self.ensure_connected(&state)?;
        if let Some(client) = state.clients.get_mut(&self.id) {
            for topic in topics {
                client.filters.remove(topic);
            }
        }
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> Result<()> {
        let mut state = self.broker.state.lock();
        if let Some(client) = state.clients.get_mut(&self.id) {
            client.session = Session::Closed;
            client.filters.clear();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(topics: &[&str]) -> Vec<(String, QoS)> {
        topics
            .iter()
            .map(|topic| (topic.to_string(), QoS::AtLeastOnce))
            .collect()
    }

    #[tokio::test]
    async fn routes_only_to_matching_clients() {
        let broker = InMemoryBroker::new();
        let (alpha, mut alpha_events) = broker.transport();
        let (beta, mut beta_events) = broker.transport();
        alpha.connect().await.expect("connect alpha");
        beta.connect().await.expect("connect beta");
        assert_eq!(alpha_events.recv().await, Some(TransportEvent::Connected));
        assert_eq!(beta_events.recv().await, Some(TransportEvent::Connected));

        alpha
            .subscribe_multiple(&filters(&["a/+"]))
            .await
            .expect("subscribe");
        beta.publish("a/b", QoS::AtLeastOnce, false, Bytes::from_static(b"{}"))
            .await
            .expect("publish");

        match alpha_events.recv().await {
            Some(TransportEvent::Message(message)) => assert_eq!(message.topic, "a/b"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(beta_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_sessions_lose_subscriptions() {
        let broker = InMemoryBroker::new();
        let (client, mut events) = broker.transport();
        client.connect().await.expect("connect");
        client
            .subscribe_multiple(&filters(&["x"]))
            .await
            .expect("subscribe");

        broker.drop_connections();
        assert!(!client.is_connected());
        assert!(broker.subscriptions().is_empty());
        assert!(matches!(
            client
                .publish("x", QoS::AtMostOnce, false, Bytes::new())
                .await,
            Err(MsgBusError::NotConnected)
        ));

        broker.restore_connections();
        assert!(client.is_connected());
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::ConnectionLost(_))
        ));
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
    }

    #[tokio::test]
    async fn rejected_subscriptions_are_counted_and_reported() {
        let broker = InMemoryBroker::new();
        let (client, _events) = broker.transport();
        client.connect().await.expect("connect");
        broker.reject_subscriptions("bad");

        let result = client.subscribe_multiple(&filters(&["good", "bad"])).await;
        assert!(matches!(result, Err(MsgBusError::Transport(_))));
        assert_eq!(broker.subscribe_calls("bad"), 1);
        assert_eq!(
            broker.subscriptions().into_iter().collect::<Vec<_>>(),
            vec!["good".to_string()]
        );
    }

    #[tokio::test]
    async fn disconnect_is_terminal() {
        let broker = InMemoryBroker::new();
        let (client, _events) = broker.transport();
        client.connect().await.expect("connect");
        client
            .disconnect(Duration::from_millis(10))
            .await
            .expect("disconnect");
        assert!(matches!(client.connect().await, Err(MsgBusError::Closed)));
    }
}
