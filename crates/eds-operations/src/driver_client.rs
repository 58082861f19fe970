//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Reports a driver pushes to the manager. All of them are one-way.

use eds_models::{DeviceStatus, DriverStatus, Properties, DEVICE_STATUS_FUNC_ID};
use eds_msgbus::MessageBus;

use crate::data::{DataOperation, DataOperationType};
use crate::meta::{MetaOperation, MetaOperationType};
use crate::operation::{publish_operation, Mode, EMPTY_REQ_ID};
use crate::Result;

/// Driver-side publisher: driver health plus device status, properties and events.
#[derive(Clone)]
pub struct DriverClient {
    /// Driver lifecycle reports.
    pub meta: MetaDriverClient,
    /// Device reports.
    pub data: DataDriverClient,
}

impl DriverClient {
    /// Both halves over one bus.
    pub fn new(bus: MessageBus) -> Self {
        Self {
            meta: MetaDriverClient { bus: bus.clone() },
            data: DataDriverClient { bus },
        }
    }
}

/// Driver lifecycle reports.
#[derive(Clone)]
pub struct MetaDriverClient {
    bus: MessageBus,
}

impl MetaDriverClient {
    /// Publish the driver's health on `META/v1/UP/<protocol>/STATUS/`.
    pub async fn publish_driver_status(&self, status: &DriverStatus) -> Result<()> {
        let operation = MetaOperation::new(
            Mode::Up,
            status.protocol.id.as_str(),
            MetaOperationType::Status,
            EMPTY_REQ_ID,
        );
        publish_operation(&self.bus, operation, status).await
    }
}

/// Device reports.
#[derive(Clone)]
pub struct DataDriverClient {
    bus: MessageBus,
}

impl DataDriverClient {
    /// Publish a device's connection state.
    pub async fn publish_device_status(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        status: &DeviceStatus,
    ) -> Result<()> {
        let operation = DataOperation::new(
            Mode::Up,
            protocol_id,
            product_id,
            device_id,
            DEVICE_STATUS_FUNC_ID,
            DataOperationType::Status,
            EMPTY_REQ_ID,
        );
        publish_operation(&self.bus, operation, status).await
    }

    /// Publish sampled property values; `property_id` may be `*` for a batch.
    pub async fn publish_device_props(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        property_id: &str,
        props: &Properties,
    ) -> Result<()> {
        let operation = DataOperation::new(
            Mode::Up,
            protocol_id,
            product_id,
            device_id,
            property_id,
            DataOperationType::Props,
            EMPTY_REQ_ID,
        );
        publish_operation(&self.bus, operation, props).await
    }

    /// Publish an event together with its output fields.
    pub async fn publish_device_event(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        event_id: &str,
        props: &Properties,
    ) -> Result<()> {
        let operation = DataOperation::new(
            Mode::Up,
            protocol_id,
            product_id,
            device_id,
            event_id,
            DataOperationType::Event,
            EMPTY_REQ_ID,
        );
        publish_operation(&self.bus, operation, props).await
    }
}
