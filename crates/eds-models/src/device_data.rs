//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Shared schema definitions and validation logic."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::product::ProductPropertyId;
use crate::{ModelError, ModelResult};

/// Property values keyed by property id, as carried by read/write/props/event payloads.
pub type Properties = BTreeMap<ProductPropertyId, DeviceData>;

/// Declared type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValueType {
    Int,
    Uint,
    Float,
    Bool,
    String,
}

impl PropertyValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyValueType::Int => "int",
            PropertyValueType::Uint => "uint",
            PropertyValueType::Float => "float",
            PropertyValueType::Bool => "bool",
            PropertyValueType::String => "string",
        }
    }

    /// Whether `value` can be stored under this type.
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            PropertyValueType::Int => value.is_i64(),
            PropertyValueType::Uint => value.is_u64(),
            PropertyValueType::Float => value.is_number(),
            PropertyValueType::Bool => value.is_boolean(),
            PropertyValueType::String => value.is_string(),
        }
    }
}

impl fmt::Display for PropertyValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sampled property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: PropertyValueType,
    pub value: JsonValue,
    /// When the value was read from the device.
    pub ts: DateTime<Utc>,
}

impl DeviceData {
    /// Build a sample stamped with the current time, rejecting values that do not fit `value_type`.
    pub fn new(
        name: impl Into<String>,
        value_type: PropertyValueType,
        value: impl Into<JsonValue>,
    ) -> ModelResult<Self> {
        let value = value.into();
        if !value_type.accepts(&value) {
            return Err(ModelError::InvalidValue {
                value: value.to_string(),
                value_type,
            });
        }
        Ok(Self {
            name: name.into(),
            value_type,
            value,
            ts: Utc::now(),
        })
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }

    /// Value rendered without quotes for strings.
    pub fn value_to_string(&self) -> String {
        match &self.value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn int_value(&self) -> ModelResult<i64> {
        self.expect_type(PropertyValueType::Int)?;
        self.value
            .as_i64()
            .or_else(|| self.value.as_f64().map(|f| f as i64))
            .ok_or_else(|| self.invalid())
    }

    pub fn uint_value(&self) -> ModelResult<u64> {
        self.expect_type(PropertyValueType::Uint)?;
        self.value
            .as_u64()
            .or_else(|| {
                self.value
                    .as_f64()
                    .filter(|f| *f >= 0.0)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| self.invalid())
    }

    pub fn float_value(&self) -> ModelResult<f64> {
        self.expect_type(PropertyValueType::Float)?;
        self.value.as_f64().ok_or_else(|| self.invalid())
    }

    pub fn bool_value(&self) -> ModelResult<bool> {
        self.expect_type(PropertyValueType::Bool)?;
        self.value.as_bool().ok_or_else(|| self.invalid())
    }

    pub fn string_value(&self) -> ModelResult<String> {
        self.expect_type(PropertyValueType::String)?;
        self.value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.invalid())
    }

    fn expect_type(&self, expected: PropertyValueType) -> ModelResult<()> {
        if self.value_type != expected {
            return Err(ModelError::TypeMismatch {
                expected,
                declared: self.value_type,
            });
        }
        Ok(())
    }

    fn invalid(&self) -> ModelError {
        ModelError::InvalidValue {
            value: self.value.to_string(),
            value_type: self.value_type,
        }
    }
}

impl fmt::Display for DeviceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Data: {}, {}:{}",
            self.name,
            self.value_type,
            self.value_to_string()
        )
    }
}

/// Values reported by a device for one function, with their coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDataWrapper {
    pub product_id: String,
    pub device_id: String,
    pub func_id: String,
    pub properties: Properties,
}
