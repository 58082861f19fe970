//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Publish/subscribe message bus and transports."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::MsgBusError;

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged, may be duplicated.
    #[default]
    AtLeastOnce,
    /// Acknowledged and deduplicated by the broker.
    ExactlyOnce,
}

impl QoS {
    /// Numeric MQTT level.
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = MsgBusError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MsgBusError::Unsupported(format!("qos level {}", other))),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_both_ways() {
        for level in 0..=2u8 {
            let qos = QoS::try_from(level).expect("valid level");
            assert_eq!(qos.level(), level);
        }
        assert!(QoS::try_from(3).is_err());
    }

    #[test]
    fn maps_onto_mqtt_levels() {
        assert_eq!(rumqttc::QoS::from(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }
}
