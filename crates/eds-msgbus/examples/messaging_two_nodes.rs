//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::sync::Arc;

use eds_msgbus::{handler_fn, BusSettings, InMemoryBroker, Message, MessageBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();

    // Node A answers pings on the matching pong topic.
    let (transport_a, events_a) = broker.transport();
    let node_a = MessageBus::new(Arc::new(transport_a), events_a, BusSettings::default());
    node_a.connect().await?;
    let replies = node_a.clone();
    node_a
        .subscribe(
            handler_fn(move |request: Message| {
                let replies = replies.clone();
                async move {
                    let id = request.topic.trim_start_matches("ping/");
                    let reply = Message::new(format!("pong/{id}"), request.payload.clone());
                    if let Err(err) = replies.publish(&reply).await {
                        eprintln!("node A failed to reply: {err}");
                    }
                }
            }),
            ["ping/+"],
        )
        .await?;

    // Node B calls node A over the same broker.
    let (transport_b, events_b) = broker.transport();
    let node_b = MessageBus::new(Arc::new(transport_b), events_b, BusSettings::default());
    node_b.connect().await?;
    let response = node_b
        .call(&Message::new("ping/1", "hello"), "pong/1", "pong-err/1")
        .await?;
    println!("node B received {response}");

    let metrics = node_b.metrics();
    println!(
        "node B published={} received={}",
        metrics.published, metrics.received
    );

    node_b.disconnect().await?;
    node_a.disconnect().await?;
    Ok(())
}
