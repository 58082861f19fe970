//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Message bus shared by drivers and the manager.
//!
//! [`MessageBus`] owns the subscription table, dispatches inbound messages to
//! handlers, re-issues every subscription after the transport reconnects and
//! implements [`MessageBus::call`], a request/response exchange over two
//! dedicated reply topics.

use std::time::Duration;

use eds_common::errors::{EdgeError, ErrorType};

pub mod bus;
pub mod memory;
pub mod message;
pub mod mqtt;
pub mod qos;
pub mod transport;

/// Shared result type for message bus operations.
pub type Result<T> = std::result::Result<T, MsgBusError>;

/// Failures raised by the bus and its transports.
#[derive(Debug, thiserror::Error)]
pub enum MsgBusError {
    /// The transport rejected or failed an operation.
    #[error("transport error: {0}")]
    Transport(String),
    /// The transport has no live connection.
    #[error("not connected to the message broker")]
    NotConnected,
    /// The bus was explicitly disconnected and cannot be reused.
    #[error("message bus has been disconnected")]
    Closed,
    /// No acknowledgement arrived in time.
    #[error("no acknowledgement within {}ms", .0.as_millis())]
    AckTimeout(Duration),
    /// Neither a response nor an error arrived in time.
    #[error("call timeout: {}ms", .0.as_millis())]
    CallTimeout(Duration),
    /// The peer answered on the error topic.
    #[error("{0}")]
    Remote(EdgeError),
    /// The configuration asks for something this build cannot provide.
    #[error("unsupported message bus configuration: {0}")]
    Unsupported(String),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for IO errors, e.g. while reading certificates.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MsgBusError {
    /// Whether the error is a call that ran out of time.
    pub fn is_call_timeout(&self) -> bool {
        matches!(self, MsgBusError::CallTimeout(_))
    }
}

impl From<MsgBusError> for EdgeError {
    #[track_caller]
    fn from(err: MsgBusError) -> Self {
        match err {
            MsgBusError::Remote(remote) => remote,
            other => ErrorType::MessageBus.cause(other, ""),
        }
    }
}

pub use bus::{handler_fn, BusMetrics, BusSettings, Handler, MessageBus, DISCONNECT_GRACE};
pub use memory::{InMemoryBroker, InMemoryTransport};
pub use message::{topic_matches, Message, MULTI_LEVEL_WILDCARD, SINGLE_LEVEL_WILDCARD, TOPIC_SEPARATOR};
pub use mqtt::MqttTransport;
pub use qos::QoS;
pub use transport::{EventReceiver, Transport, TransportEvent};
