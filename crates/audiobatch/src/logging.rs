//! Process-wide logging setup for the daemon and tools.
//!
//! Code logs through the `log` facade; `LogTracer` forwards those records
//! into the tracing subscriber so they share filtering and formatting with
//! spans.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingSettings;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Logging is already initialized")]
    AlreadyInitialized,
}

/// `RUST_LOG` wins over the configured level when it is set and valid.
pub fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}

/// Installs the global subscriber. Only the first call in a process takes
/// effect.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    tracing_log::LogTracer::init().map_err(|_| LoggingError::AlreadyInitialized)?;

    let json_layer = settings.json.then(|| fmt::layer().json().with_current_span(true));
    let pretty_layer = (!settings.json).then(|| fmt::layer().with_target(true));

    let subscriber = Registry::default()
        .with(build_filter(settings))
        .with(json_layer)
        .with(pretty_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    log::debug!(
        "Logging initialized (level={}, json={})",
        settings.level,
        settings.json
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_second_init_reports_already_initialized() {
        let settings = LoggingSettings::default();
        // Another test in this binary may have initialized first.
        let _ = init_logging(&settings);
        assert!(matches!(
            init_logging(&settings),
            Err(LoggingError::AlreadyInitialized)
        ));
    }

    #[test]
    #[serial]
    fn test_filter_falls_back_to_configured_level() {
        let previous = std::env::var("RUST_LOG").ok();
        std::env::remove_var("RUST_LOG");

        let filter = build_filter(&LoggingSettings {
            level: "warn".to_string(),
            json: true,
        });
        assert_eq!(filter.to_string(), "warn");

        if let Some(value) = previous {
            std::env::set_var("RUST_LOG", value);
        }
    }
}
