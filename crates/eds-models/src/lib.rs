//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Shared schema definitions and validation logic."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Domain models carried as operation payloads.
//!
//! Products describe what a class of device can do (properties, events,
//! methods), devices are concrete instances, and [`DeviceData`] is the unit of
//! value moving between a driver and the manager. All types serialize to the
//! JSON shapes peers already speak.

pub mod device;
pub mod device_data;
pub mod product;
pub mod protocol;
pub mod status;

/// Version tag carried by meta operation topics.
pub const META_VERSION: &str = "v1";
/// Version tag carried by data operation topics.
pub const DATA_VERSION: &str = "v1";

/// Shared result type for model validation routines.
pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    /// The declared value type does not match the accessor used.
    #[error("the expecting type is {expected}, but the pre-defined type is {declared}")]
    TypeMismatch {
        expected: device_data::PropertyValueType,
        declared: device_data::PropertyValueType,
    },
    /// The raw value cannot be represented in the declared type.
    #[error("fail to parse value '{value}' using type {value_type}")]
    InvalidValue {
        value: String,
        value_type: device_data::PropertyValueType,
    },
}

pub use device::Device;
pub use device_data::{DeviceData, DeviceDataWrapper, Properties, PropertyValueType};
pub use product::{
    Product, ProductEvent, ProductEventId, ProductField, ProductFuncId, ProductMethod,
    ProductMethodId, ProductProperty, ProductPropertyId, ProductTopic, ReportMode,
    DEVICE_STATUS_FUNC_ID, MULTI_PROPS_ID,
};
pub use protocol::{Property, Protocol};
pub use status::{DeviceStatus, DriverInitialization, DriverStatus, State};
