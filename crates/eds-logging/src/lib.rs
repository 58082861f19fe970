//! ---
//! eds_section: "03-persistence-logging"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Structured logging adapters and sinks."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;
pub mod subscriber;

pub use subscriber::init_tracing;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Operation coordinates attached to log events by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Protocol identifier of the driver involved.
    pub protocol: Option<&'a str>,
    /// Product identifier.
    pub product: Option<&'a str>,
    /// Device identifier.
    pub device: Option<&'a str>,
    /// Correlation id of the request.
    pub req_id: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a protocol identifier.
    pub fn with_protocol(mut self, protocol: &'a str) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Attach a product identifier.
    pub fn with_product(mut self, product: &'a str) -> Self {
        self.product = Some(product);
        self
    }

    /// Attach a device identifier.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach a correlation id; empty ids are ignored.
    pub fn with_req_id(mut self, req_id: &'a str) -> Self {
        if !req_id.is_empty() {
            self.req_id = Some(req_id);
        }
        self
    }
}
