//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use eds_msgbus::{Message, MessageBus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::topic::Topic;
use crate::{OperationError, Result};

/// Correlation id of one-way notifications.
pub const EMPTY_REQ_ID: &str = "";

/// Fresh correlation id: 32 lowercase hex characters, never a topic wildcard.
pub fn new_req_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Direction of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Report from a driver to the manager.
    Up,
    /// Error report from a driver to the manager.
    UpErr,
    /// Command from the manager to a driver.
    Down,
}

impl Mode {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Up => "UP",
            Mode::UpErr => "UP-ERR",
            Mode::Down => "DOWN",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UP" => Ok(Mode::Up),
            "UP-ERR" => Ok(Mode::UpErr),
            "DOWN" => Ok(Mode::Down),
            other => Err(OperationError::invalid_topic(
                s,
                format!("undefined operation mode: {other}"),
            )),
        }
    }
}

/// Body of an operation.
///
/// Outbound operations carry a value set with [`Operation::set_value`];
/// inbound operations keep the raw bytes until the receiver decodes them with
/// [`Operation::unmarshal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    value: Option<JsonValue>,
    raw: Option<Bytes>,
}

impl Payload {
    pub(crate) fn received(raw: Bytes) -> Self {
        Self {
            value: None,
            raw: Some(raw),
        }
    }

    pub(crate) fn set<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.value = Some(serde_json::to_value(value).map_err(OperationError::Encode)?);
        Ok(())
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.value).map_err(OperationError::Encode)
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.raw {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_slice(raw).map_err(OperationError::Decode)
            }
            _ => Err(OperationError::PayloadNotReady),
        }
    }

    /// Whether a received payload carries anything besides JSON `null`.
    pub fn has_value(&self) -> bool {
        match &self.raw {
            Some(raw) => {
                let trimmed = raw.trim_ascii();
                !trimmed.is_empty() && trimmed != b"null"
            }
            None => false,
        }
    }

    /// Raw received bytes.
    pub fn raw(&self) -> Option<&Bytes> {
        self.raw.as_ref()
    }
}

/// Behaviour shared by meta and data operations.
pub trait Operation {
    /// Topic the operation is addressed to.
    fn topic(&self) -> Topic;

    /// Operation body.
    fn payload(&self) -> &Payload;

    /// Mutable operation body.
    fn payload_mut(&mut self) -> &mut Payload;

    /// Attach the outbound value.
    fn set_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.payload_mut().set(value)
    }

    /// Decode the received payload; fails with `PayloadNotReady` on outbound operations.
    fn unmarshal<T: DeserializeOwned>(&self) -> Result<T> {
        self.payload().decode()
    }

    /// Render the topic and serialize the attached value, `null` when none is set.
    fn to_message(&self) -> Result<Message> {
        Ok(Message::new(self.topic().to_string(), self.payload().encode()?))
    }
}

/// Attach `value` and publish the operation one-way.
pub(crate) async fn publish_operation<O, T>(bus: &MessageBus, mut operation: O, value: &T) -> Result<()>
where
    O: Operation,
    T: Serialize + ?Sized,
{
    operation.set_value(value)?;
    let message = operation.to_message()?;
    debug!(topic = %message.topic, bytes = message.payload.len(), "publishing operation");
    bus.publish(&message).await?;
    Ok(())
}
