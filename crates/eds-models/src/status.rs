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

use crate::{Device, Product, Protocol};

/// Connection state of a device or driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Connected,
    Reconnecting,
    Disconnected,
    Exception,
    /// Driver only.
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default)]
    pub device: Option<Device>,
    pub state: State,
    #[serde(default)]
    pub state_detail: String,
}

impl DeviceStatus {
    pub fn new(device: Device, state: State) -> Self {
        Self {
            device: Some(device),
            state,
            state_detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.state_detail = detail.into();
        self
    }
}

/// Driver heartbeat published on the meta channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatus {
    /// Set on the first report after the driver starts.
    #[serde(default)]
    pub hello: bool,
    pub protocol: Protocol,
    pub state: State,
    #[serde(default)]
    pub state_detail: String,
    #[serde(default)]
    pub health_check_interval_second: u64,
}

/// Everything a driver needs to start serving its devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInitialization {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub devices: Vec<Device>,
}
