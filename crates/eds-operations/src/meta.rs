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

use eds_msgbus::Message;

use crate::operation::{Mode, Operation, Payload};
use crate::topic::{Category, Topic};
use crate::{OperationError, Result};

/// Meta operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaOperationType {
    /// Product created, updated or deleted.
    Product,
    /// Device created, updated or deleted.
    Device,
    /// Initial product and device set pushed to a driver.
    Init,
    /// Driver health report.
    Status,
}

impl MetaOperationType {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            MetaOperationType::Product => "PRODUCT",
            MetaOperationType::Device => "DEVICE",
            MetaOperationType::Init => "INIT",
            MetaOperationType::Status => "STATUS",
        }
    }
}

impl fmt::Display for MetaOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetaOperationType {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PRODUCT" => Ok(MetaOperationType::Product),
            "DEVICE" => Ok(MetaOperationType::Device),
            "INIT" => Ok(MetaOperationType::Init),
            "STATUS" => Ok(MetaOperationType::Status),
            other => Err(OperationError::invalid_topic(
                s,
                format!("undefined meta operation type: {other}"),
            )),
        }
    }
}

/// Operation on driver lifecycle or product/device metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaOperation {
    /// Direction.
    pub mode: Mode,
    /// Protocol version tag.
    pub version: String,
    /// Protocol of the addressed driver.
    pub protocol_id: String,
    /// Operation type.
    pub op_type: MetaOperationType,
    /// Correlation id; product/device mutations carry the entity id here.
    pub req_id: String,
    payload: Payload,
}

impl MetaOperation {
    /// Outbound operation with the current meta version.
    pub fn new(
        mode: Mode,
        protocol_id: impl Into<String>,
        op_type: MetaOperationType,
        req_id: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            version: Category::Meta.version().to_string(),
            protocol_id: protocol_id.into(),
            op_type,
            req_id: req_id.into(),
            payload: Payload::default(),
        }
    }

    /// Rebuild an operation from a received message; the payload stays undecoded.
    pub fn parse(message: &Message) -> Result<Self> {
        let topic = Topic::parse(&message.topic)?;
        if topic.category() != Category::Meta {
            return Err(OperationError::invalid_topic(&message.topic, "not a meta topic"));
        }
        let [mode, protocol_id, op_type, req_id] = topic.tag_values() else {
            return Err(OperationError::invalid_topic(&message.topic, "meta tags expected"));
        };
        Ok(Self {
            mode: mode.parse().map_err(|err: OperationError| err.at_topic(&message.topic))?,
            version: topic.version().to_string(),
            protocol_id: protocol_id.clone(),
            op_type: op_type
                .parse()
                .map_err(|err: OperationError| err.at_topic(&message.topic))?,
            req_id: req_id.clone(),
            payload: Payload::received(message.payload.clone()),
        })
    }
}

impl Operation for MetaOperation {
    fn topic(&self) -> Topic {
        Topic {
            category: Category::Meta,
            version: self.version.clone(),
            tags: vec![
                self.mode.as_str().to_string(),
                self.protocol_id.clone(),
                self.op_type.as_str().to_string(),
                self.req_id.clone(),
            ],
        }
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }
}
