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

use serde::{Deserialize, Serialize};

/// Identifier of a product functionality (property, event or method).
pub type ProductFuncId = String;
pub type ProductPropertyId = ProductFuncId;
pub type ProductEventId = ProductFuncId;
pub type ProductMethodId = ProductFuncId;

/// Function id addressing every property of a device at once.
///
/// Meaningful for reads; events and methods never use it.
pub const MULTI_PROPS_ID: &str = "*";

/// Function id used by device status reports, which are not tied to a function.
pub const DEVICE_STATUS_FUNC_ID: &str = "-";

/// Describes what a class of devices exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_format: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<ProductProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ProductEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<ProductMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<ProductTopic>,
}

impl Product {
    pub fn property(&self, id: &str) -> Option<&ProductProperty> {
        self.properties.iter().find(|property| property.id == id)
    }

    pub fn event(&self, id: &str) -> Option<&ProductEvent> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn method(&self, id: &str) -> Option<&ProductMethod> {
        self.methods.iter().find(|method| method.id == id)
    }
}

/// How a property reports its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// At a fixed interval, e.g. `5s`, `1m`, `0.5h`.
    Periodical,
    OnChange,
}

impl ReportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportMode::Periodical => "periodical",
            ReportMode::OnChange => "onchange",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductProperty {
    pub id: ProductPropertyId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub field_type: String,
    #[serde(default)]
    pub report_mode: String,
    #[serde(default)]
    pub writeable: bool,
    #[serde(default)]
    pub aux_props: BTreeMap<String, String>,
}

impl ProductProperty {
    pub fn report_mode(&self) -> Option<ReportMode> {
        match self.report_mode.as_str() {
            "periodical" => Some(ReportMode::Periodical),
            "onchange" => Some(ReportMode::OnChange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductEvent {
    pub id: ProductEventId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub outs: Vec<ProductField>,
    #[serde(default)]
    pub aux_props: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMethod {
    pub id: ProductMethodId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub ins: Vec<ProductField>,
    #[serde(default)]
    pub outs: Vec<ProductField>,
    #[serde(default)]
    pub aux_props: BTreeMap<String, String>,
}

/// Topic a product functionality is published on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductTopic {
    pub topic: String,
    #[serde(default)]
    pub opt_type: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductField {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub field_type: String,
    #[serde(default)]
    pub desc: String,
}
