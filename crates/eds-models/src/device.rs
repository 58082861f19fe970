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

/// A concrete device instance of a [`Product`](crate::Product).
///
/// `product_id` and `category` are fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub device_status: String,
    /// Protocol specific connection properties.
    #[serde(default)]
    pub device_props: BTreeMap<String, String>,
    #[serde(default)]
    pub device_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub device_meta: BTreeMap<String, String>,
}

impl Device {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.device_props.get(key).map(String::as_str)
    }
}
