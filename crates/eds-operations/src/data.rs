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

use eds_logging::LogContext;
use eds_msgbus::Message;

use crate::operation::{Mode, Operation, Payload};
use crate::topic::{Category, Topic};
use crate::{OperationError, Result};

/// Data operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataOperationType {
    /// Device health report.
    Status,
    /// Property read served from the driver's cache.
    Read,
    /// Property read that goes to the device.
    HardRead,
    /// Property write.
    Write,
    /// Periodic or on-change property report.
    Props,
    /// Device event.
    Event,
    /// Method invocation.
    Call,
}

impl DataOperationType {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            DataOperationType::Status => "STATUS",
            DataOperationType::Read => "READ",
            DataOperationType::HardRead => "HARD-READ",
            DataOperationType::Write => "WRITE",
            DataOperationType::Props => "PROPS",
            DataOperationType::Event => "EVENT",
            DataOperationType::Call => "CALL",
        }
    }
}

impl fmt::Display for DataOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataOperationType {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STATUS" => Ok(DataOperationType::Status),
            "READ" => Ok(DataOperationType::Read),
            "HARD-READ" => Ok(DataOperationType::HardRead),
            "WRITE" => Ok(DataOperationType::Write),
            "PROPS" => Ok(DataOperationType::Props),
            "EVENT" => Ok(DataOperationType::Event),
            "CALL" => Ok(DataOperationType::Call),
            other => Err(OperationError::invalid_topic(
                s,
                format!("undefined data operation type: {other}"),
            )),
        }
    }
}

/// Operation addressed to one function of one device.
///
/// `func_id` is a property, event or method id. `*` stands for every
/// property in reads and writes; it has no defined meaning for events or
/// methods and is passed through as is.
#[derive(Debug, Clone, PartialEq)]
pub struct DataOperation {
    /// Direction.
    pub mode: Mode,
    /// Protocol version tag.
    pub version: String,
    /// Protocol of the addressed driver.
    pub protocol_id: String,
    /// Product of the addressed device.
    pub product_id: String,
    /// Addressed device.
    pub device_id: String,
    /// Property, event or method id.
    pub func_id: String,
    /// Operation type.
    pub op_type: DataOperationType,
    /// Correlation id.
    pub req_id: String,
    payload: Payload,
}

impl DataOperation {
    /// Outbound operation with the current data version.
    pub fn new(
        mode: Mode,
        protocol_id: impl Into<String>,
        product_id: impl Into<String>,
        device_id: impl Into<String>,
        func_id: impl Into<String>,
        op_type: DataOperationType,
        req_id: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            version: Category::Data.version().to_string(),
            protocol_id: protocol_id.into(),
            product_id: product_id.into(),
            device_id: device_id.into(),
            func_id: func_id.into(),
            op_type,
            req_id: req_id.into(),
            payload: Payload::default(),
        }
    }

    /// Rebuild an operation from a received message; the payload stays undecoded.
    pub fn parse(message: &Message) -> Result<Self> {
        let topic = Topic::parse(&message.topic)?;
        if topic.category() != Category::Data {
            return Err(OperationError::invalid_topic(&message.topic, "not a data topic"));
        }
        let [mode, protocol_id, product_id, device_id, func_id, op_type, req_id] =
            topic.tag_values()
        else {
            return Err(OperationError::invalid_topic(&message.topic, "data tags expected"));
        };
        Ok(Self {
            mode: mode.parse().map_err(|err: OperationError| err.at_topic(&message.topic))?,
            version: topic.version().to_string(),
            protocol_id: protocol_id.clone(),
            product_id: product_id.clone(),
            device_id: device_id.clone(),
            func_id: func_id.clone(),
            op_type: op_type
                .parse()
                .map_err(|err: OperationError| err.at_topic(&message.topic))?,
            req_id: req_id.clone(),
            payload: Payload::received(message.payload.clone()),
        })
    }

    /// Same address with another mode and no value attached.
    ///
    /// Responses mirror their request this way, so the request's correlation
    /// id and function address come back unchanged.
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self {
            mode,
            version: self.version.clone(),
            protocol_id: self.protocol_id.clone(),
            product_id: self.product_id.clone(),
            device_id: self.device_id.clone(),
            func_id: self.func_id.clone(),
            op_type: self.op_type,
            req_id: self.req_id.clone(),
            payload: Payload::default(),
        }
    }

    /// Topics a responder answers on: `UP` for success and `UP-ERR` for failure.
    pub fn response_topics(&self) -> (String, String) {
        (
            self.with_mode(Mode::Up).topic().to_string(),
            self.with_mode(Mode::UpErr).topic().to_string(),
        )
    }

    /// Logging context naming the addressed device.
    pub fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_protocol(&self.protocol_id)
            .with_product(&self.product_id)
            .with_device(&self.device_id)
            .with_req_id(&self.req_id)
    }
}

impl Operation for DataOperation {
    fn topic(&self) -> Topic {
        Topic {
            category: Category::Data,
            version: self.version.clone(),
            tags: vec![
                self.mode.as_str().to_string(),
                self.protocol_id.clone(),
                self.product_id.clone(),
                self.device_id.clone(),
                self.func_id.clone(),
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
