//! Telemetry setup for services that embed the RPC pipeline.
//!
//! This crate wires the observability stack the pipeline's middleware reports into:
//! - **Tracing**: Structured logging (JSON or compact) filtered by level and `RUST_LOG`
//! - **Metrics**: Prometheus recorder for the counters and histograms emitted by
//!   the tracing middleware
//!
//! # Features
//! - `prometheus` (default): Prometheus metrics exporter

use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Noisy dependencies kept at `info` regardless of the configured level.
const QUIET_TARGETS: &[&str] = &["tower=info", "h2=info", "hyper=info", "tonic=info"];

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub log_level: String,
    /// Use JSON log format
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: true,
        }
    }
}

impl TelemetryConfig {
    /// Resolve the configured level, falling back to `INFO` for unknown values.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn level(&self) -> Level {
        match self.log_level.to_uppercase().as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Telemetry initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid filter directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
    #[cfg(feature = "prometheus")]
    #[error("failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install the Prometheus recorder and return the handle used to render `/metrics`.
///
/// # Errors
/// Returns `TelemetryError::Metrics` if a recorder is already installed.
#[cfg(feature = "prometheus")]
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    Ok(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?)
}

/// Build the level filter, honouring `RUST_LOG` on top of the configured level.
///
/// # Errors
/// Returns `TelemetryError::Directive` if a built-in directive fails to parse.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level().into());
    for directive in QUIET_TARGETS {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Setup console logging (JSON or human-readable).
///
/// Unlike a bare `init()`, a second call returns an error instead of panicking,
/// so tests and embedding services can call it unconditionally.
///
/// # Errors
/// Returns `TelemetryError::Subscriber` if a global subscriber is already set.
pub fn setup_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = env_filter(config)?;

    let fmt_layer = if config.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
            .compact()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::debug!(level = %config.level(), json = config.json_logs, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, "INFO");
        assert!(config.json_logs);
    }

    #[test]
    fn level_parsing_is_case_insensitive() {
        let config = TelemetryConfig {
            log_level: "debug".to_string(),
            json_logs: false,
        };
        assert_eq!(config.level(), Level::DEBUG);

        let config = TelemetryConfig {
            log_level: "verbose".to_string(),
            json_logs: false,
        };
        assert_eq!(config.level(), Level::INFO);
    }

    #[test]
    fn second_setup_reports_error_instead_of_panicking() {
        let config = TelemetryConfig {
            log_level: "WARN".to_string(),
            json_logs: false,
        };
        assert!(setup_telemetry(&config).is_ok());
        assert!(matches!(
            setup_telemetry(&config),
            Err(TelemetryError::Subscriber(_))
        ));
    }
}
