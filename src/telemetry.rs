//! Process-wide logging and metrics setup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, MetricsConfig};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid metrics address {0}: {1}")]
    InvalidAddress(String, std::net::AddrParseError),
    #[error("failed to install Prometheus exporter: {0}")]
    Exporter(#[from] BuildError),
}

/// Installs the tracing subscriber. `RUST_LOG` wins over the configured level.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Starts the Prometheus scrape endpoint when one is configured.
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<SocketAddr>, TelemetryError> {
    let Some(listen) = config.listen.as_deref() else {
        return Ok(None);
    };

    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(listen.to_string(), e))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(Some(addr))
}
