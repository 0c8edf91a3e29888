use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct Telemetry {
    metrics_addr: Option<SocketAddr>,
}

impl Telemetry {
    /// Installs the log subscriber and, when an address is given, a
    /// Prometheus scrape endpoint. Must run inside the tokio runtime.
    pub fn init(metrics_addr: Option<SocketAddr>) -> Result<Self> {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        if let Some(addr) = metrics_addr {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("failed to install Prometheus exporter")?;
            info!(metrics_addr = %addr, "prometheus exporter listening");
        }

        Ok(Self { metrics_addr })
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_addr.is_some()
    }
}
