//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use eds_common::config::{MessageBusConfig, MessageBusKind, MqttConfig};
use eds_common::errors::EdgeError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::memory::InMemoryBroker;
use crate::message::topic_matches;
use crate::mqtt::MqttTransport;
use crate::transport::{EventReceiver, Transport, TransportEvent};
use crate::{Message, MsgBusError, QoS, Result};

/// Grace period granted to in-flight work on [`MessageBus::disconnect`].
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(2000);

/// Callback invoked for every inbound message matching a subscribed filter.
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

#[derive(Clone)]
struct Route {
    handler: Handler,
    lane: Option<mpsc::UnboundedSender<Message>>,
}

impl Route {
    fn concurrent(handler: Handler) -> Self {
        Self { handler, lane: None }
    }

    /// Feeds one worker that awaits `handler` for each message in arrival order.
    fn ordered(handler: Handler) -> Self {
        let (lane, mut queue) = mpsc::unbounded_channel::<Message>();
        let worker = Arc::clone(&handler);
        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                worker(message).await;
            }
        });
        Self {
            handler,
            lane: Some(lane),
        }
    }

    fn deliver(&self, message: Message) {
        match &self.lane {
            Some(lane) => {
                if lane.send(message).is_err() {
                    debug!("ordered route worker has stopped");
                }
            }
            None => {
                tokio::spawn((self.handler)(message));
            }
        }
    }
}

/// Per-bus timing and delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    /// Quality of service used for every publish and subscribe.
    pub qos: QoS,
    /// Upper bound for transport acknowledgements; zero waits indefinitely.
    pub ack_timeout: Duration,
    /// Default round-trip limit for [`MessageBus::call`].
    pub call_timeout: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            ack_timeout: Duration::from_secs(3),
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl BusSettings {
    /// Derive settings from the MQTT section of the configuration.
    pub fn from_mqtt(config: &MqttConfig) -> Result<Self> {
        Ok(Self {
            qos: QoS::try_from(config.qos)?,
            ack_timeout: config.ack_timeout,
            call_timeout: config.call_timeout,
        })
    }
}

/// Point-in-time view of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetrics {
    /// Messages accepted by the transport.
    pub published: u64,
    /// Inbound messages seen by the dispatcher.
    pub received: u64,
    /// Deliveries handed to a route, started or queued.
    pub dispatched: u64,
    /// Inbound messages with no matching route.
    pub unrouted: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    unrouted: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BusMetrics {
        BusMetrics {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: BusSettings,
    routes: Mutex<HashMap<String, Route>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    sessions: AtomicU64,
    unissued: AtomicBool,
    events: Mutex<Option<EventReceiver>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// Publish/subscribe bus with a subscription table and correlated calls.
///
/// Clones share the same transport and table. Every route registered through
/// [`subscribe`](Self::subscribe) is re-issued to the transport after each
/// reconnect; [`disconnect`](Self::disconnect) is terminal.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    /// Assemble a bus over an already constructed transport. Call [`connect`](Self::connect) next.
    pub fn new(transport: Arc<dyn Transport>, events: EventReceiver, settings: BusSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                routes: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: watch::channel(false).0,
                sessions: AtomicU64::new(0),
                unissued: AtomicBool::new(false),
                events: Mutex::new(Some(events)),
                dispatcher: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Build the configured transport and connect it.
    ///
    /// `in_memory` yields a bus on a private broker, which only talks to itself.
    pub async fn from_config(config: &MessageBusConfig) -> Result<Self> {
        let settings = BusSettings::from_mqtt(&config.mqtt)?;
        let bus = match config.kind {
            MessageBusKind::Mqtt => {
                let (transport, events) = MqttTransport::new(&config.mqtt)?;
                Self::new(Arc::new(transport), events, settings)
            }
            MessageBusKind::InMemory => {
                let (transport, events) = InMemoryBroker::new().transport();
                Self::new(Arc::new(transport), events, settings)
            }
        };
        bus.connect().await?;
        Ok(bus)
    }

    /// Settings the bus was built with.
    pub fn settings(&self) -> BusSettings {
        self.inner.settings
    }

    /// Whether the transport currently holds a session.
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.transport.is_connected()
    }

    /// Start dispatching and open the transport session; a no-op while connected.
    ///
    /// Routes the transport refused earlier, e.g. because they were added
    /// before the first session, are issued once the session is up.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        self.start_dispatcher();
        if self.inner.transport.is_connected() {
            return Ok(());
        }
        self.inner.transport.connect().await?;
        info!(transport = self.inner.transport.name(), "message bus connected");
        if self.inner.unissued.swap(false, Ordering::AcqRel) {
            self.inner.resubscribe().await;
        }
        Ok(())
    }

    /// Close the session for good and drop every route.
    pub async fn disconnect(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(true);
        let result = self.inner.transport.disconnect(DISCONNECT_GRACE).await;
        self.inner.routes.lock().clear();
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
        info!(transport = self.inner.transport.name(), "message bus disconnected");
        result
    }

    /// Publish with the bus-wide QoS, never retained.
    pub async fn publish(&self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        self.inner.publish(message).await
    }

    /// Route `topics` to `handler`, then subscribe on the transport.
    ///
    /// Every matching message runs the handler on its own task. Routes stay in
    /// the table even when the transport refuses the request, so the next
    /// session retries them.
    pub async fn subscribe<I, S>(&self, handler: Handler, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.install(Route::concurrent(handler), topics).await
    }

    /// Like [`subscribe`](Self::subscribe), but `handler` sees messages for
    /// `topics` one at a time, in arrival order.
    ///
    /// A handler that waits stalls only these topics; other routes keep flowing.
    pub async fn subscribe_ordered<I, S>(&self, handler: Handler, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        self.install(Route::ordered(handler), topics).await
    }

    async fn install<I, S>(&self, route: Route, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Ok(());
        }
        {
            let mut routes = self.inner.routes.lock();
            for topic in &topics {
                routes.insert(topic.clone(), route.clone());
            }
        }
        let filters: Vec<(String, QoS)> = topics
            .iter()
            .map(|topic| (topic.clone(), self.inner.settings.qos))
            .collect();
        if let Err(err) = self
            .inner
            .acknowledged(self.inner.transport.subscribe_multiple(&filters))
            .await
        {
            self.inner.unissued.store(true, Ordering::Release);
            return Err(err);
        }
        debug!(topics = ?topics, "subscribed");
        Ok(())
    }

    /// Drop the routes for `topics`, then unsubscribe on the transport.
    pub async fn unsubscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Ok(());
        }
        {
            let mut routes = self.inner.routes.lock();
            for topic in &topics {
                routes.remove(topic);
            }
        }
        self.inner
            .acknowledged(self.inner.transport.unsubscribe(&topics))
            .await?;
        debug!(topics = ?topics, "unsubscribed");
        Ok(())
    }

    /// Publish `request` and wait for a reply on `rsp_topic` or `err_topic`,
    /// bounded by the configured call timeout.
    pub async fn call(&self, request: &Message, rsp_topic: &str, err_topic: &str) -> Result<Message> {
        self.call_with_timeout(request, rsp_topic, err_topic, self.inner.settings.call_timeout)
            .await
    }

    /// [`call`](Self::call) with an explicit round-trip limit.
    ///
    /// A reply on `err_topic` is decoded into [`MsgBusError::Remote`]; silence
    /// yields [`MsgBusError::CallTimeout`] and a [`disconnect`](Self::disconnect)
    /// meanwhile yields [`MsgBusError::Closed`]. Both reply topics are released
    /// on every exit path while the bus is open.
    pub async fn call_with_timeout(
        &self,
        request: &Message,
        rsp_topic: &str,
        err_topic: &str,
        limit: Duration,
    ) -> Result<Message> {
        self.ensure_open()?;
        let (rsp_handler, rsp_rx) = single_shot();
        let (err_handler, err_rx) = single_shot();

        let outcome = self
            .exchange(request, (rsp_topic, rsp_handler, rsp_rx), (err_topic, err_handler, err_rx), limit)
            .await;

        if self.inner.closed.load(Ordering::Acquire) {
            return outcome;
        }
        if let Err(err) = self.unsubscribe([rsp_topic, err_topic]).await {
            warn!(
                rsp_topic = rsp_topic,
                err_topic = err_topic,
                error = %err,
                "failed to release call reply topics"
            );
        }
        if let Err(err) = &outcome {
            debug!(topic = %request.topic, error = %err, "call failed");
        }
        outcome
    }

    async fn exchange(
        &self,
        request: &Message,
        (rsp_topic, rsp_handler, rsp_rx): (&str, Handler, oneshot::Receiver<Message>),
        (err_topic, err_handler, err_rx): (&str, Handler, oneshot::Receiver<Message>),
        limit: Duration,
    ) -> Result<Message> {
        let mut shutdown = self.inner.shutdown.subscribe();
        let closed = async move {
            let _ = shutdown.wait_for(|closed| *closed).await;
        };
        self.subscribe(rsp_handler, [rsp_topic]).await?;
        self.subscribe(err_handler, [err_topic]).await?;
        self.inner.publish(request).await?;
        tokio::select! {
            Ok(response) = rsp_rx => Ok(response),
            Ok(failure) = err_rx => Err(MsgBusError::Remote(EdgeError::from_payload(&failure.payload))),
            () = closed => Err(MsgBusError::Closed),
            () = tokio::time::sleep(limit) => Err(MsgBusError::CallTimeout(limit)),
        }
    }

    /// Filters currently held in the subscription table, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.routes.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Snapshot of the bus counters.
    pub fn metrics(&self) -> BusMetrics {
        self.inner.counters.snapshot()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(MsgBusError::Closed);
        }
        Ok(())
    }

    fn start_dispatcher(&self) {
        let Some(events) = self.inner.events.lock().take() else {
            return;
        };
        let handle = tokio::spawn(dispatch(Arc::downgrade(&self.inner), events));
        *self.inner.dispatcher.lock() = Some(handle);
    }
}

impl Inner {
    async fn publish(&self, message: &Message) -> Result<()> {
        debug!(topic = %message.topic, bytes = message.payload.len(), "publishing message");
        self.acknowledged(self.transport.publish(
            &message.topic,
            self.settings.qos,
            false,
            message.payload.clone(),
        ))
        .await?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn acknowledged<F>(&self, operation: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let limit = self.settings.ack_timeout;
        if limit.is_zero() {
            return operation.await;
        }
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(MsgBusError::AckTimeout(limit)),
        }
    }

    fn route(&self, message: Message) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let matched: Vec<Route> = self
            .routes
            .lock()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &message.topic))
            .map(|(_, route)| route.clone())
            .collect();
        if matched.is_empty() {
            self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %message.topic, "no route for inbound message");
            return;
        }
        for route in matched {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            route.deliver(message.clone());
        }
    }

    async fn resubscribe(&self) {
        let topics: Vec<String> = self.routes.lock().keys().cloned().collect();
        info!(count = topics.len(), "session re-established, restoring subscriptions");
        for topic in topics {
            let filter = [(topic.clone(), self.settings.qos)];
            if let Err(err) = self
                .acknowledged(self.transport.subscribe_multiple(&filter))
                .await
            {
                warn!(topic = %topic, error = %err, "failed to restore subscription");
            }
        }
    }
}

async fn dispatch(inner: Weak<Inner>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Message(message) => inner.route(message),
            TransportEvent::Connected => {
                let resumed = inner.sessions.fetch_add(1, Ordering::AcqRel) > 0;
                if resumed || inner.unissued.swap(false, Ordering::AcqRel) {
                    inner.resubscribe().await;
                }
            }
            TransportEvent::ConnectionLost(reason) => {
                warn!(
                    transport = inner.transport.name(),
                    reason = %reason,
                    "message bus connection lost"
                );
            }
        }
    }
}

fn single_shot() -> (Handler, oneshot::Receiver<Message>) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let handler = handler_fn(move |message| {
        let slot = Arc::clone(&slot);
        async move {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(message);
            }
        }
    });
    (handler, rx)
}
