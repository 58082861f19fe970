//! ---
//! eds_section: "01-core-functionality"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Shared primitives and utilities for drivers and the manager."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Core shared primitives for the edge device workspace.
//! This crate exposes configuration loading and the error taxonomy
//! that travels between drivers and the manager.

pub mod config;
pub mod errors;

pub use config::{
    DriverConfig, EdsConfig, LoadedEdsConfig, LogFormat, LoggingConfig, MessageBusConfig,
    MessageBusKind, MqttConfig, TlsConfig,
};
pub use errors::{EdgeError, EdgeResult, ErrorType};
