//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Shared schema definitions and validation logic."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::device_data::PropertyValueType;

/// A device protocol implemented by one driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub support_funcs: Vec<String>,
    /// Properties shared by every device speaking this protocol.
    #[serde(default)]
    pub aux_props: Vec<Property>,
    /// Per-device connection properties.
    #[serde(default)]
    pub device_props: Vec<Property>,
}

/// Form field describing one configurable protocol property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(rename = "type")]
    pub value_type: PropertyValueType,
    #[serde(default, rename = "style")]
    pub ui_style: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub range: String,
    /// Simple dependency on another property's value.
    #[serde(default)]
    pub precondition: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multiple: bool,
    /// Upper bound on selections when `multiple` is set.
    #[serde(default)]
    pub max_len: i64,
}
