//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Reports the manager listens to, delivered as typed [`Subscription`]s.

use eds_models::{DeviceDataWrapper, DeviceStatus, DriverStatus, Properties};
use eds_msgbus::{Message, MessageBus, SINGLE_LEVEL_WILDCARD};

use crate::data::{DataOperation, DataOperationType};
use crate::meta::{MetaOperation, MetaOperationType};
use crate::operation::{Mode, Operation};
use crate::subscription::{Subscription, SUBSCRIPTION_CAPACITY};
use crate::Result;

/// Manager-side report listeners.
#[derive(Clone)]
pub struct ManagerService {
    /// Driver health.
    pub meta: MetaManagerService,
    /// Device status, properties and events.
    pub data: DataManagerService,
}

impl ManagerService {
    /// Both halves over one bus with the default stream buffer.
    pub fn new(bus: MessageBus) -> Self {
        Self::with_capacity(bus, SUBSCRIPTION_CAPACITY)
    }

    /// Both halves with streams buffering up to `capacity` values.
    pub fn with_capacity(bus: MessageBus, capacity: usize) -> Self {
        Self {
            meta: MetaManagerService {
                bus: bus.clone(),
                capacity,
            },
            data: DataManagerService { bus, capacity },
        }
    }
}

/// Driver health.
#[derive(Clone)]
pub struct MetaManagerService {
    bus: MessageBus,
    capacity: usize,
}

impl MetaManagerService {
    /// Status reports of every driver, whatever its protocol.
    pub async fn subscribe_driver_status(&self) -> Result<Subscription<DriverStatus>> {
        let topic = MetaOperation::new(
            Mode::Up,
            SINGLE_LEVEL_WILDCARD,
            MetaOperationType::Status,
            SINGLE_LEVEL_WILDCARD,
        )
        .topic()
        .to_string();
        Subscription::open(&self.bus, topic, self.capacity, |message: &Message| {
            MetaOperation::parse(message)?.unmarshal()
        })
        .await
    }
}

/// Device status, properties and events.
#[derive(Clone)]
pub struct DataManagerService {
    bus: MessageBus,
    capacity: usize,
}

impl DataManagerService {
    /// Status reports of every device behind the protocol's drivers.
    pub async fn subscribe_device_status(
        &self,
        protocol_id: &str,
    ) -> Result<Subscription<DeviceStatus>> {
        let any = SINGLE_LEVEL_WILDCARD;
        let topic = DataOperation::new(
            Mode::Up,
            protocol_id,
            any,
            any,
            any,
            DataOperationType::Status,
            any,
        )
        .topic()
        .to_string();
        Subscription::open(&self.bus, topic, self.capacity, |message: &Message| {
            DataOperation::parse(message)?.unmarshal()
        })
        .await
    }

    /// Property reports. Any id may be `+`; `*` matches batched reports only.
    pub async fn subscribe_device_props(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        property_id: &str,
    ) -> Result<Subscription<DeviceDataWrapper>> {
        let address = (protocol_id, product_id, device_id, property_id);
        self.subscribe_wrapped(DataOperationType::Props, address)
            .await
    }

    /// Event reports with their output fields.
    pub async fn subscribe_device_event(
        &self,
        protocol_id: &str,
        product_id: &str,
        device_id: &str,
        event_id: &str,
    ) -> Result<Subscription<DeviceDataWrapper>> {
        let address = (protocol_id, product_id, device_id, event_id);
        self.subscribe_wrapped(DataOperationType::Event, address)
            .await
    }

    async fn subscribe_wrapped(
        &self,
        op_type: DataOperationType,
        (protocol_id, product_id, device_id, func_id): (&str, &str, &str, &str),
    ) -> Result<Subscription<DeviceDataWrapper>> {
        let topic = DataOperation::new(
            Mode::Up,
            protocol_id,
            product_id,
            device_id,
            func_id,
            op_type,
            SINGLE_LEVEL_WILDCARD,
        )
        .topic()
        .to_string();
        Subscription::open(&self.bus, topic, self.capacity, wrap_device_data).await
    }
}

fn wrap_device_data(message: &Message) -> Result<DeviceDataWrapper> {
    let operation = DataOperation::parse(message)?;
    let properties: Properties = operation.unmarshal()?;
    Ok(DeviceDataWrapper {
        product_id: operation.product_id,
        device_id: operation.device_id,
        func_id: operation.func_id,
        properties,
    })
}
