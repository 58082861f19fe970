//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Topic codec.
//!
//! Every topic is `<CATEGORY>/<version>/<tag 1>/.../<tag N>` where the tag
//! keys and their order are fixed per category. The order is part of the wire
//! format and must never change.

use std::fmt;
use std::str::FromStr;

use eds_models::{DATA_VERSION, META_VERSION};
use eds_msgbus::TOPIC_SEPARATOR;

use crate::{OperationError, Result};

/// Number of levels before the first tag: category and version.
pub const TAGS_OFFSET: usize = 2;

/// Tag layout of meta topics.
pub const META_SCHEMA: [TagKey; 4] = [
    TagKey::OptMode,
    TagKey::ProtocolId,
    TagKey::OptType,
    TagKey::ReqId,
];

/// Tag layout of data topics.
pub const DATA_SCHEMA: [TagKey; 7] = [
    TagKey::OptMode,
    TagKey::ProtocolId,
    TagKey::ProductId,
    TagKey::DeviceId,
    TagKey::FuncId,
    TagKey::OptType,
    TagKey::ReqId,
];

/// Operation category, the first level of every topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Driver lifecycle and product/device metadata.
    Meta,
    /// Device properties, events, methods and health.
    Data,
}

impl Category {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Meta => "META",
            Category::Data => "DATA",
        }
    }

    /// Ordered tag keys of the category.
    pub fn schema(self) -> &'static [TagKey] {
        match self {
            Category::Meta => &META_SCHEMA,
            Category::Data => &DATA_SCHEMA,
        }
    }

    /// Protocol version emitted for the category.
    pub fn version(self) -> &'static str {
        match self {
            Category::Meta => META_VERSION,
            Category::Data => DATA_VERSION,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "META" => Ok(Category::Meta),
            "DATA" => Ok(Category::Data),
            other => Err(OperationError::invalid_topic(
                s,
                format!("undefined operation category: {other}"),
            )),
        }
    }
}

/// Name of a tag position inside a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKey {
    /// `UP`, `UP-ERR` or `DOWN`.
    OptMode,
    /// Protocol the driver speaks.
    ProtocolId,
    /// Product of the addressed device.
    ProductId,
    /// Addressed device.
    DeviceId,
    /// Property, event or method id.
    FuncId,
    /// Operation type within the category.
    OptType,
    /// Correlation id.
    ReqId,
}

impl TagKey {
    /// Key name.
    pub fn as_str(self) -> &'static str {
        match self {
            TagKey::OptMode => "opt_mode",
            TagKey::ProtocolId => "protocol_id",
            TagKey::ProductId => "product_id",
            TagKey::DeviceId => "device_id",
            TagKey::FuncId => "func_id",
            TagKey::OptType => "opt_type",
            TagKey::ReqId => "req_id",
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded topic: category, version and tag values in schema order.
///
/// Rendering does not validate tag values; values containing `/`, `+` or `#`
/// produce topics that will not parse back to the same tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub(crate) category: Category,
    pub(crate) version: String,
    pub(crate) tags: Vec<String>,
}

impl Topic {
    /// Build a topic, checking the number of tags against the category schema.
    pub fn new(category: Category, version: impl Into<String>, tags: Vec<String>) -> Result<Self> {
        let topic = Self {
            category,
            version: version.into(),
            tags,
        };
        if topic.tags.len() != category.schema().len() {
            return Err(OperationError::invalid_topic(
                &topic.to_string(),
                format!("{} tags expected", category.schema().len()),
            ));
        }
        Ok(topic)
    }

    /// Decode a topic string.
    pub fn parse(topic: &str) -> Result<Self> {
        if topic.is_empty() {
            return Err(OperationError::invalid_topic(topic, "empty topic"));
        }
        let parts: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();
        if parts.len() <= TAGS_OFFSET {
            return Err(OperationError::invalid_topic(
                topic,
                "category, version and tags are necessary",
            ));
        }
        let category = Category::from_str(parts[0]).map_err(|err| err.at_topic(topic))?;
        let keys = category.schema();
        if parts.len() - TAGS_OFFSET != keys.len() {
            let names: Vec<&str> = keys.iter().map(|key| key.as_str()).collect();
            return Err(OperationError::invalid_topic(
                topic,
                format!("keys [{}] are necessary", names.join(", ")),
            ));
        }
        Ok(Self {
            category,
            version: parts[1].to_string(),
            tags: parts[TAGS_OFFSET..].iter().map(|tag| tag.to_string()).collect(),
        })
    }

    /// Operation category.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Protocol version tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Tag keys in schema order.
    pub fn tag_keys(&self) -> &'static [TagKey] {
        self.category.schema()
    }

    /// Tag values in schema order.
    pub fn tag_values(&self) -> &[String] {
        &self.tags
    }

    /// Value of one tag.
    pub fn tag(&self, key: TagKey) -> Option<&str> {
        self.tag_keys()
            .iter()
            .position(|candidate| *candidate == key)
            .and_then(|index| self.tags.get(index))
            .map(String::as_str)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.category, TOPIC_SEPARATOR, self.version)?;
        for tag in &self.tags {
            write!(f, "{}{}", TOPIC_SEPARATOR, tag)?;
        }
        Ok(())
    }
}

impl FromStr for Topic {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        Topic::parse(s)
    }
}
