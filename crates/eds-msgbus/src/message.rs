//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Separator between topic levels.
pub const TOPIC_SEPARATOR: &str = "/";
/// Matches exactly one topic level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Matches the remaining levels; only valid as the last level of a filter.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Topic plus raw payload, as exchanged with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Serialized payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Create a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Decode the JSON payload.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}bytes", self.topic, self.payload.len())
    }
}

/// MQTT filter matching with `+` and a trailing `#`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split(TOPIC_SEPARATOR);
    let mut topic_levels = topic.split(TOPIC_SEPARATOR);
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(expected), Some(level)) if expected == level => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
