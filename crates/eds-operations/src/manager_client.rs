//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Commands the manager sends to drivers.
//!
//! Metadata pushes are one-way. Property reads, writes and method calls are
//! correlated: a fresh request id is minted per call and the driver answers on
//! the `UP` or `UP-ERR` twin of the request topic.

use std::time::Duration;

use eds_logging::eds_debug;
use eds_models::{Device, DriverInitialization, Product, Properties};
use eds_msgbus::{Message, MessageBus};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::data::{DataOperation, DataOperationType};
use crate::meta::{MetaOperation, MetaOperationType};
use crate::operation::{new_req_id, publish_operation, Mode, Operation, EMPTY_REQ_ID};
use crate::Result;

/// Manager-side command sender.
#[derive(Clone)]
pub struct ManagerClient {
    /// Driver initialisation and metadata mutations.
    pub meta: MetaManagerClient,
    /// Property and method access.
    pub data: DataManagerClient,
}

impl ManagerClient {
    /// Both halves over one bus.
    pub fn new(bus: MessageBus) -> Self {
        Self {
            meta: MetaManagerClient { bus: bus.clone() },
            data: DataManagerClient::new(bus),
        }
    }
}

/// Driver initialisation and metadata mutations.
#[derive(Clone)]
pub struct MetaManagerClient {
    bus: MessageBus,
}

impl MetaManagerClient {
    /// Hand a driver its full product and device set.
    pub async fn init_driver(
        &self,
        protocol_id: &str,
        products: Vec<Product>,
        devices: Vec<Device>,
    ) -> Result<()> {
        let operation =
            MetaOperation::new(Mode::Down, protocol_id, MetaOperationType::Init, EMPTY_REQ_ID);
        let init = DriverInitialization { products, devices };
        publish_operation(&self.bus, operation, &init).await
    }

    /// Create or replace a product; the product id travels in the request id slot.
    pub async fn update_product(&self, protocol_id: &str, product: &Product) -> Result<()> {
        let operation = MetaOperation::new(
            Mode::Down,
            protocol_id,
            MetaOperationType::Product,
            product.id.as_str(),
        );
        publish_operation(&self.bus, operation, product).await
    }

    /// Remove a product. The payload is `null`.
    pub async fn delete_product(&self, protocol_id: &str, product_id: &str) -> Result<()> {
        let operation =
            MetaOperation::new(Mode::Down, protocol_id, MetaOperationType::Product, product_id);
        publish_operation(&self.bus, operation, &JsonValue::Null).await
    }

    /// Create or replace a device; the device id travels in the request id slot.
    pub async fn update_device(&self, protocol_id: &str, device: &Device) -> Result<()> {
        let operation = MetaOperation::new(
            Mode::Down,
            protocol_id,
            MetaOperationType::Device,
            device.id.as_str(),
        );
        publish_operation(&self.bus, operation, device).await
    }

    /// Remove a device. The payload is `null`.
    pub async fn delete_device(&self, protocol_id: &str, device_id: &str) -> Result<()> {
        let operation =
            MetaOperation::new(Mode::Down, protocol_id, MetaOperationType::Device, device_id);
        publish_operation(&self.bus, operation, &JsonValue::Null).await
    }
}

/// Property and method access on devices behind a driver.
#[derive(Clone)]
pub struct DataManagerClient {
    bus: MessageBus,
    call_timeout: Option<Duration>,
}

impl DataManagerClient {
    fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            call_timeout: None,
        }
    }

    /// Wait at most `timeout` for each answer instead of the bus-wide call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Read cached property values. `*` asks for every property.
    pub async fn read(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        property_id: &str,
    ) -> Result<Properties> {
        let address = (protocol_id, product_id, device_id, property_id);
        let response = self
            .exchange(DataOperationType::Read, address, &JsonValue::Null)
            .await?;
        DataOperation::parse(&response)?.unmarshal()
    }

    /// Read property values straight from the device.
    pub async fn hard_read(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        property_id: &str,
    ) -> Result<Properties> {
        let address = (protocol_id, product_id, device_id, property_id);
        let response = self
            .exchange(DataOperationType::HardRead, address, &JsonValue::Null)
            .await?;
        DataOperation::parse(&response)?.unmarshal()
    }

    /// Write property values and wait for the driver to confirm.
    pub async fn write(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        property_id: &str,
        props: &Properties,
    ) -> Result<()> {
        let address = (protocol_id, product_id, device_id, property_id);
        self.exchange(DataOperationType::Write, address, props)
            .await?;
        Ok(())
    }

    /// Invoke a device method with input fields `ins` and return its outputs.
    pub async fn call(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        method_id: &str,
        ins: &Properties,
    ) -> Result<Properties> {
        let address = (protocol_id, product_id, device_id, method_id);
        let response = self
            .exchange(DataOperationType::Call, address, ins)
            .await?;
        DataOperation::parse(&response)?.unmarshal()
    }

    async fn exchange<T: Serialize + ?Sized>(
        &self,
        op_type: DataOperationType,
        (protocol_id, product_id, device_id, func_id): (&str, &str, &str, &str),
        value: &T,
    ) -> Result<Message> {
        let mut request = DataOperation::new(
            Mode::Down,
            protocol_id,
            product_id,
            device_id,
            func_id,
            op_type,
            new_req_id(),
        );
        request.set_value(value)?;
        let message = request.to_message()?;
        let (rsp_topic, err_topic) = request.response_topics();
        eds_debug!(context = request.log_context(), "calling {} on {}", op_type, func_id);

        let response = match self.call_timeout {
            Some(limit) => {
                self.bus
                    .call_with_timeout(&message, &rsp_topic, &err_topic, limit)
                    .await?
            }
            None => self.bus.call(&message, &rsp_topic, &err_topic).await?,
        };
        Ok(response)
    }
}
