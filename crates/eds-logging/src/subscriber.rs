//! ---
//! eds_section: "03-persistence-logging"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Structured logging adapters and sinks."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use eds_common::config::{LogFormat, LoggingConfig};
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "EDS_LOG";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Initialize the tracing subscriber from configuration and environment variables.
///
/// * `EDS_LOG` overrides the filter (e.g. `info`, `debug,eds_msgbus=trace`). When unset
///   the standard `RUST_LOG` variable is honoured, finally falling back to the
///   configured level.
/// * Console output follows `config.format`; when `config.directory` is set a daily
///   rolling JSON file is written as well.
///
/// A second call is a no-op apart from the log line.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level);

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console {
        let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        let _ = STDOUT_GUARD.set(stdout_guard);
        let console = match config.format {
            LogFormat::Json => fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(stdout_writer)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(stdout_writer)
                .boxed(),
        };
        layers.push(console);
    }

    if let Some(directory) = &config.directory {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("unable to create log directory {}", directory.display()))?;
        let prefix = config
            .file_prefix
            .clone()
            .unwrap_or_else(|| service_name.to_owned());
        let file_appender = daily(directory, format!("{}.log", prefix));
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(file_guard);
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        level = %config.level,
        format = ?config.format,
        log_dir = ?config.directory,
        "tracing initialised"
    );
    Ok(())
}

fn build_filter(configured_level: &str) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to {} logging",
                LOG_ENV, err, configured_level
            );
            EnvFilter::new(configured_level)
        }),
        Err(_) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log_dir = dir.path().join("logs");
        let config = LoggingConfig {
            console: false,
            directory: Some(log_dir.clone()),
            ..LoggingConfig::default()
        };
        init_tracing("eds-test", &config).expect("init succeeds");
        assert!(log_dir.is_dir());
    }

    #[test]
    fn console_only_initialisation_succeeds() {
        init_tracing("eds-test", &LoggingConfig::default()).expect("init succeeds");
    }
}
