//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Operation protocol shared by drivers and the manager.
//!
//! Operations are addressed by hierarchical topics
//! (`<CATEGORY>/<version>/<tag>/...`) and carry a JSON payload. The facades
//! in [`driver_client`], [`driver_service`], [`manager_client`] and
//! [`manager_service`] map named actions onto operations exchanged over a
//! [`MessageBus`](eds_msgbus::MessageBus).

use eds_common::errors::{EdgeError, ErrorType};
use eds_msgbus::MsgBusError;

pub mod data;
pub mod driver_client;
pub mod driver_service;
pub mod manager_client;
pub mod manager_service;
pub mod meta;
pub mod operation;
pub mod subscription;
pub mod topic;

/// Shared result type for operation handling.
pub type Result<T> = std::result::Result<T, OperationError>;

/// Failures raised while encoding, decoding or exchanging operations.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The topic does not follow the schema of any category.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// Offending topic.
        topic: String,
        /// What is wrong with it.
        reason: String,
    },
    /// `unmarshal` was called on an operation without a received payload.
    #[error("the payload of the operation may not be filled yet")]
    PayloadNotReady,
    /// The attached value could not be serialized.
    #[error("fail to encode the operation value: {0}")]
    Encode(#[source] serde_json::Error),
    /// The payload does not match the expected shape.
    #[error("fail to decode the operation payload: {0}")]
    Decode(#[source] serde_json::Error),
    /// The bus failed or the peer reported an error.
    #[error(transparent)]
    Bus(#[from] MsgBusError),
}

impl OperationError {
    pub(crate) fn invalid_topic(topic: &str, reason: impl Into<String>) -> Self {
        OperationError::InvalidTopic {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn at_topic(self, topic: &str) -> Self {
        match self {
            OperationError::InvalidTopic { reason, .. } => OperationError::invalid_topic(topic, reason),
            other => other,
        }
    }

    /// Whether a call went unanswered within its timeout.
    pub fn is_call_timeout(&self) -> bool {
        matches!(self, OperationError::Bus(err) if err.is_call_timeout())
    }

    /// The error reported by the peer, when the call was answered with one.
    pub fn remote(&self) -> Option<&EdgeError> {
        match self {
            OperationError::Bus(MsgBusError::Remote(remote)) => Some(remote),
            _ => None,
        }
    }
}

impl From<OperationError> for EdgeError {
    #[track_caller]
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::Bus(bus) => EdgeError::from(bus),
            invalid @ OperationError::InvalidTopic { .. } => ErrorType::BadRequest.cause(invalid, ""),
            other => ErrorType::Internal.cause(other, ""),
        }
    }
}

pub use data::{DataOperation, DataOperationType};
pub use driver_client::{DataDriverClient, DriverClient, MetaDriverClient};
pub use driver_service::{DataDriverService, DataTarget, DriverService, MetaDriverService};
pub use manager_client::{DataManagerClient, ManagerClient, MetaManagerClient};
pub use manager_service::{DataManagerService, ManagerService, MetaManagerService};
pub use meta::{MetaOperation, MetaOperationType};
pub use operation::{new_req_id, Mode, Operation, Payload, EMPTY_REQ_ID};
pub use subscription::{Subscription, SUBSCRIPTION_CAPACITY};
pub use topic::{Category, TagKey, Topic, DATA_SCHEMA, META_SCHEMA, TAGS_OFFSET};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_onto_categories() {
        let invalid: EdgeError = OperationError::invalid_topic("x", "too short").into();
        assert_eq!(invalid.category(), ErrorType::BadRequest);

        let not_ready: EdgeError = OperationError::PayloadNotReady.into();
        assert_eq!(not_ready.category(), ErrorType::Internal);

        let timeout = OperationError::from(MsgBusError::CallTimeout(std::time::Duration::from_millis(5)));
        assert!(timeout.is_call_timeout());
        assert!(timeout.remote().is_none());
        assert_eq!(EdgeError::from(timeout).category(), ErrorType::MessageBus);
    }

    #[test]
    fn remote_errors_pass_through_unchanged() {
        let remote = ErrorType::Driver.error("device offline");
        let err = OperationError::from(MsgBusError::Remote(remote));
        assert!(!err.is_call_timeout());
        assert_eq!(err.remote().map(EdgeError::code), Some(ErrorType::Driver.code()));

        let edge = EdgeError::from(err);
        assert_eq!(edge.category(), ErrorType::Driver);
        assert_eq!(edge.message(), "device offline");
    }
}
