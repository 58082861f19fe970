//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::sync::Arc;

use eds_msgbus::{handler_fn, Message, MessageBus};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::Result;

/// Default buffer of a [`Subscription`].
pub const SUBSCRIPTION_CAPACITY: usize = 1000;

/// Stream of decoded values published on one topic filter.
///
/// Values arrive in publish order. The buffer is bounded: once full, further
/// deliveries on this filter wait for the consumer instead of being dropped,
/// while other routes on the bus keep flowing. Values that fail to decode are
/// logged and skipped. Call [`close`](Self::close) to release the route;
/// dropping the stream only stops delivery.
pub struct Subscription<T> {
    topic: String,
    bus: MessageBus,
    receiver: mpsc::Receiver<T>,
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) async fn open<F>(
        bus: &MessageBus,
        topic: String,
        capacity: usize,
        decode: F,
    ) -> Result<Self>
    where
        F: Fn(&Message) -> Result<T> + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let decode = Arc::new(decode);
        let filter = topic.clone();
        let handler = handler_fn(move |message: Message| {
            let sender = sender.clone();
            let decode = Arc::clone(&decode);
            let filter = filter.clone();
            async move {
                let value = match decode(&message) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(topic = %message.topic, error = %err, "fail to decode the subscribed operation");
                        return;
                    }
                };
                if sender.send(value).await.is_err() {
                    debug!(topic = %filter, "subscription receiver dropped");
                }
            }
        });
        bus.subscribe_ordered(handler, [topic.as_str()]).await?;
        Ok(Self {
            topic,
            bus: bus.clone(),
            receiver,
        })
    }
}

impl<T> Subscription<T> {
    /// Topic filter the stream is fed from.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next value, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Next value if one is buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Unsubscribe the filter and close the buffer.
    pub async fn close(mut self) -> Result<()> {
        let result = self.bus.unsubscribe([self.topic.as_str()]).await;
        self.receiver.close();
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use eds_msgbus::{BusSettings, InMemoryBroker};

    async fn bus(broker: &InMemoryBroker) -> MessageBus {
        let (transport, events) = broker.transport();
        let bus = MessageBus::new(Arc::new(transport), events, BusSettings::default());
        bus.connect().await.expect("connect");
        bus
    }

    fn decode_number(message: &Message) -> Result<u32> {
        serde_json::from_slice(&message.payload).map_err(crate::OperationError::Decode)
    }

    #[tokio::test]
    async fn delivers_decoded_values_and_skips_garbage() {
        let broker = InMemoryBroker::new();
        let bus = bus(&broker).await;
        let mut numbers = Subscription::open(&bus, "n/+".to_string(), 8, decode_number)
            .await
            .expect("open");

        bus.publish(&Message::new("n/1", "oops")).await.expect("publish");
        bus.publish(&Message::new("n/2", "42")).await.expect("publish");
        assert_eq!(numbers.recv().await, Some(42));
        assert_eq!(numbers.topic(), "n/+");
        assert!(numbers.try_recv().is_none());
    }

    #[tokio::test]
    async fn close_releases_the_route() {
        let broker = InMemoryBroker::new();
        let bus = bus(&broker).await;
        let numbers = Subscription::open(&bus, "n/+".to_string(), 8, decode_number)
            .await
            .expect("open");
        assert_eq!(bus.routes(), vec!["n/+"]);

        numbers.close().await.expect("close");
        assert!(bus.routes().is_empty());
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn full_buffer_holds_its_topic_in_order() {
        let broker = InMemoryBroker::new();
        let bus = bus(&broker).await;
        let mut numbers = Subscription::open(&bus, "n".to_string(), 1, decode_number)
            .await
            .expect("open");
        let mut others = Subscription::open(&bus, "other".to_string(), 8, decode_number)
            .await
            .expect("open other");

        for value in 0..6u32 {
            bus.publish(&Message::new("n", value.to_string()))
                .await
                .expect("publish");
        }
        bus.publish(&Message::new("other", "7")).await.expect("publish other");
        let other = tokio::time::timeout(Duration::from_secs(1), others.recv())
            .await
            .expect("other topic flows while the full one waits");
        assert_eq!(other, Some(7));

        let mut seen = Vec::new();
        for _ in 0..6 {
            let value = tokio::time::timeout(Duration::from_secs(1), numbers.recv())
                .await
                .expect("value delivered")
                .expect("stream open");
            seen.push(value);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
