//! ---
//! eds_section: "01-core-functionality"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Shared primitives and utilities for drivers and the manager."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::errors::{EdgeResult, ErrorType};

fn default_mqtt_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_qos() -> u8 {
    1
}

fn default_clean_session() -> bool {
    true
}

fn default_client_id_prefix() -> String {
    "edge-device-sub".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_console() -> bool {
    true
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Primary configuration object shared by drivers and the manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdsConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default, rename = "log")]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub msgbus: MessageBusConfig,
}

/// Metadata describing where an [`EdsConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedEdsConfig {
    pub config: EdsConfig,
    pub source: PathBuf,
}

impl EdsConfig {
    pub const ENV_CONFIG_PATH: &str = "EDS_CONFIG";
    /// Prefix for per-field overrides, e.g. `EDS__MSGBUS__MQTT__HOST`.
    pub const ENV_PREFIX: &str = "EDS";

    /// Load configuration from disk, respecting the `EDS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> EdgeResult<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> EdgeResult<LoadedEdsConfig> {
        Self::locate_and_load(candidates).map_err(|err| {
            ErrorType::Configuration.cause(err, "fail to load the configuration file")
        })
    }

    fn locate_and_load<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedEdsConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path, Self::ENV_PREFIX)?;
                return Ok(LoadedEdsConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path, Self::ENV_PREFIX)?;
                return Ok(LoadedEdsConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path, env_prefix: &str) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let layered = config::Config::builder()
            .add_source(config::File::from_str(&contents, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        let config = layered
            .try_deserialize::<EdsConfig>()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.msgbus.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for EdsConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: EdsConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Message bus implementations a component can be wired to.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageBusKind {
    #[default]
    Mqtt,
    /// Process-local broker, used by tests and single-process setups.
    InMemory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBusConfig {
    #[serde(default, rename = "type")]
    pub kind: MessageBusKind,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl MessageBusConfig {
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            MessageBusKind::Mqtt => self.mqtt.validate(),
            MessageBusKind::InMemory => Ok(()),
        }
    }
}

/// Connection and timing settings for an MQTT broker.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_millisecond")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a publish/subscribe acknowledgement; zero waits indefinitely.
    #[serde(default = "default_ack_timeout", rename = "ack_timeout_millisecond")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ack_timeout: Duration,
    #[serde(default = "default_call_timeout", rename = "method_call_timeout_millisecond")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub call_timeout: Duration,
    #[serde(default = "default_keep_alive", rename = "keep_alive_second")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl MqttConfig {
    /// Broker address in `scheme://host:port` form.
    pub fn broker_url(&self) -> String {
        let scheme = if self.tls.is_some() { "ssl" } else { "tcp" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("mqtt host must not be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("mqtt port must not be 0"));
        }
        if self.qos > 2 {
            return Err(anyhow!("mqtt qos must be 0, 1 or 2, got {}", self.qos));
        }
        if self.call_timeout.is_zero() {
            return Err(anyhow!("method call timeout must be greater than zero"));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
            ack_timeout: default_ack_timeout(),
            call_timeout: default_call_timeout(),
            keep_alive: default_keep_alive(),
            qos: default_qos(),
            clean_session: default_clean_session(),
            client_id_prefix: default_client_id_prefix(),
            tls: None,
        }
    }
}

/// Certificate material for `ssl://` brokers. Client auth is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub ca_path: PathBuf,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.ca_path.is_file() {
            return Err(anyhow!(
                "tls ca_path {} does not exist or is not a file",
                self.ca_path.display()
            ));
        }
        match (&self.cert_path, &self.key_path) {
            (Some(_), None) | (None, Some(_)) => Err(anyhow!(
                "tls cert_path and key_path must be configured together"
            )),
            _ => Ok(()),
        }
    }
}

/// Log output formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_console")]
    pub console: bool,
    /// Directory for daily rolling log files; file logging is off when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(anyhow!(
                "unknown log level '{}', expected one of {}",
                self.level,
                LOG_LEVELS.join("|")
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            console: default_console(),
            directory: None,
            file_prefix: None,
        }
    }
}

/// Health-check and reconnect cadence for drivers.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(
        default = "default_health_check_interval",
        rename = "driver_health_check_interval_second"
    )]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub driver_health_check_interval: Duration,
    #[serde(
        default = "default_health_check_interval",
        rename = "device_health_check_interval_second"
    )]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub device_health_check_interval: Duration,
    #[serde(default)]
    pub device_auto_reconnect: bool,
    #[serde(
        default = "default_reconnect_interval",
        rename = "device_auto_reconnect_interval_second"
    )]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub device_auto_reconnect_interval: Duration,
    /// Zero means no limit.
    #[serde(default)]
    pub device_auto_reconnect_max_retries: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_health_check_interval: default_health_check_interval(),
            device_health_check_interval: default_health_check_interval(),
            device_auto_reconnect: false,
            device_auto_reconnect_interval: default_reconnect_interval(),
            device_auto_reconnect_max_retries: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[driver]
driver_health_check_interval_second = 10
device_auto_reconnect = true

[log]
level = "debug"
format = "json"

[msgbus]
type = "mqtt"

[msgbus.mqtt]
host = "broker.local"
port = 1884
qos = 2
method_call_timeout_millisecond = 1500
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn defaults_are_applied() {
        let config: EdsConfig = "".parse().expect("empty config parses");
        assert_eq!(config.msgbus.kind, MessageBusKind::Mqtt);
        assert_eq!(config.msgbus.mqtt.port, 1883);
        assert_eq!(config.msgbus.mqtt.qos, 1);
        assert_eq!(config.msgbus.mqtt.call_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.logging.console);
    }

    #[test]
    fn parses_sections_and_units() {
        let config: EdsConfig = SAMPLE.parse().expect("sample parses");
        assert_eq!(config.msgbus.mqtt.host, "broker.local");
        assert_eq!(config.msgbus.mqtt.qos, 2);
        assert_eq!(config.msgbus.mqtt.call_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.driver.driver_health_check_interval,
            Duration::from_secs(10)
        );
        assert!(config.driver.device_auto_reconnect);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn broker_url_reflects_tls() {
        let mut mqtt = MqttConfig::default();
        assert_eq!(mqtt.broker_url(), "tcp://127.0.0.1:1883");
        mqtt.tls = Some(TlsConfig {
            ca_path: PathBuf::from("ca.pem"),
            cert_path: None,
            key_path: None,
        });
        assert_eq!(mqtt.broker_url(), "ssl://127.0.0.1:1883");
    }

    #[test]
    fn rejects_invalid_qos() {
        let err = "[msgbus.mqtt]\nqos = 3\n"
            .parse::<EdsConfig>()
            .expect_err("qos 3 rejected");
        assert!(err.to_string().contains("qos"));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = "[log]\nlevel = \"loud\"\n"
            .parse::<EdsConfig>()
            .expect_err("level rejected");
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn rejects_half_configured_client_auth() {
        let ca = write_config("not really a certificate");
        let tls = TlsConfig {
            ca_path: ca.path().to_path_buf(),
            cert_path: Some(PathBuf::from("client.pem")),
            key_path: None,
        };
        assert!(tls.validate().is_err());
    }

    #[test]
    fn in_memory_bus_skips_mqtt_validation() {
        let config: EdsConfig = "[msgbus]\ntype = \"in_memory\"\n[msgbus.mqtt]\nport = 0\n"
            .parse()
            .expect("in-memory bus ignores mqtt section");
        assert_eq!(config.msgbus.kind, MessageBusKind::InMemory);
    }

    #[test]
    fn load_picks_first_existing_candidate() {
        let file = write_config(SAMPLE);
        let missing = PathBuf::from("/definitely/not/here.toml");
        let loaded = EdsConfig::load_with_source(&[missing, file.path().to_path_buf()])
            .expect("load succeeds");
        assert_eq!(loaded.source, file.path());
        assert_eq!(loaded.config.msgbus.mqtt.port, 1884);
    }

    #[test]
    fn load_without_candidates_is_a_configuration_error() {
        let err = EdsConfig::load(&[PathBuf::from("/definitely/not/here.toml")])
            .expect_err("nothing to load");
        assert_eq!(err.category(), ErrorType::Configuration);
        assert!(err.to_string().contains("no configuration files found"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let file = write_config(SAMPLE);
        std::env::set_var("EDSCFGTEST__MSGBUS__MQTT__HOST", "env.broker");
        std::env::set_var("EDSCFGTEST__MSGBUS__MQTT__PORT", "2883");
        let config = EdsConfig::from_path(file.path(), "EDSCFGTEST").expect("load succeeds");
        std::env::remove_var("EDSCFGTEST__MSGBUS__MQTT__HOST");
        std::env::remove_var("EDSCFGTEST__MSGBUS__MQTT__PORT");
        assert_eq!(config.msgbus.mqtt.host, "env.broker");
        assert_eq!(config.msgbus.mqtt.port, 2883);
        assert_eq!(config.msgbus.mqtt.qos, 2);
    }
}
