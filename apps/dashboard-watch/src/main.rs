use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dashboard_sdk::DashboardClient;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use watch_proto::{Channel, ClusterEvent, DevWorkspace, Pod, Resource};
use watch_sync::{FixedNamespace, ResourceSynchronizer, SessionConfig, SyncPhase, WatchSession};
use watch_transport::TransportConfig;

mod sinks;
mod telemetry;

use sinks::LoggingSink;

#[derive(Debug, Clone)]
struct WatchConfig {
    backend_url: String,
    namespace: String,
    token: Option<String>,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    retry_interval: Duration,
    channels: Vec<Channel>,
    metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Parser)]
#[command(
    name = "dashboard-watch",
    author,
    version,
    about = "Keeps workspace, pod and event snapshots for one namespace up to date"
)]
struct Cli {
    /// Base URL of the dashboard backend.
    #[arg(
        long,
        env = "DASHBOARD_BACKEND_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    backend_url: String,

    /// Namespace whose resources are followed.
    #[arg(long, env = "DASHBOARD_NAMESPACE")]
    namespace: String,

    /// Bearer token for REST calls and websocket subscriptions.
    #[arg(long, env = "DASHBOARD_TOKEN")]
    token: Option<String>,

    /// Delay between websocket reconnect attempts.
    #[arg(long, env = "DASHBOARD_WATCH_RECONNECT_DELAY_MS", default_value_t = 3000)]
    reconnect_delay_ms: u64,

    /// Upper bound on a single websocket connect attempt.
    #[arg(long, env = "DASHBOARD_WATCH_CONNECT_TIMEOUT_SECS", default_value_t = 20)]
    connect_timeout_secs: u64,

    /// How often failed synchronizers are retried.
    #[arg(long, env = "DASHBOARD_WATCH_RETRY_SECS", default_value_t = 10)]
    retry_secs: u64,

    /// Channels to follow (comma separated).
    #[arg(
        long,
        env = "DASHBOARD_WATCH_CHANNELS",
        value_delimiter = ',',
        default_value = "devWorkspace,pod,event"
    )]
    channels: Vec<String>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "DASHBOARD_WATCH_METRICS_ADDR")]
    metrics_addr: Option<String>,
}

impl TryFrom<Cli> for WatchConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let mut channels = Vec::new();
        for raw in &cli.channels {
            let channel: Channel = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid channel: {raw}"))?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        let metrics_addr = cli
            .metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("invalid metrics address: {addr}"))
            })
            .transpose()?;
        Ok(WatchConfig {
            backend_url: cli.backend_url,
            namespace: cli.namespace,
            token: cli.token.filter(|token| !token.is_empty()),
            reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
            connect_timeout: Duration::from_secs(cli.connect_timeout_secs),
            retry_interval: Duration::from_secs(cli.retry_secs.max(1)),
            channels,
            metrics_addr,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = WatchConfig::try_from(cli)?;
    let telemetry = telemetry::Telemetry::init(config.metrics_addr)?;
    info!(
        backend_url = %config.backend_url,
        namespace = %config.namespace,
        channels = ?config.channels,
        metrics = telemetry.metrics_enabled(),
        "starting dashboard-watch"
    );

    run(config).await
}

async fn run(config: WatchConfig) -> Result<()> {
    let client = Arc::new(
        DashboardClient::new(&config.backend_url, config.token.clone())
            .context("failed to build dashboard client")?,
    );
    let websocket_url = client
        .websocket_url()
        .context("failed to derive websocket url")?;
    let transport = TransportConfig::new(websocket_url)
        .with_reconnect_delay(config.reconnect_delay)
        .with_connect_timeout(config.connect_timeout);

    let session = Arc::new(WatchSession::new(SessionConfig {
        transport,
        token: config.token.clone(),
        namespace: Arc::new(FixedNamespace(config.namespace.clone())),
    }));
    session
        .connect()
        .await
        .context("failed to open watch websocket")?;

    let mut supervisors = Vec::new();
    for channel in &config.channels {
        let handle = match channel {
            Channel::DevWorkspace => follow::<DevWorkspace>(&session, &client, &config).await,
            Channel::Pod => follow::<Pod>(&session, &client, &config).await,
            Channel::Event => follow::<ClusterEvent>(&session, &client, &config).await,
        };
        supervisors.push(handle);
    }

    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
    for supervisor in supervisors {
        supervisor.abort();
    }
    session.shutdown().await;
    Ok(())
}

/// Starts a synchronizer for `R` and keeps retrying it while it is failed.
async fn follow<R: Resource>(
    session: &Arc<WatchSession>,
    client: &Arc<DashboardClient>,
    config: &WatchConfig,
) -> JoinHandle<()> {
    let sync: ResourceSynchronizer<R> = session.synchronizer::<R>(
        client.clone(),
        Arc::new(LoggingSink::<R>::new(config.namespace.clone())),
    );
    if let Err(err) = session.start(&sync).await {
        warn!(channel = %R::CHANNEL, error = %err, "initial sync failed; will retry");
    }

    let retry_interval = config.retry_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(retry_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sync.phase() != SyncPhase::Failed {
                continue;
            }
            match sync.retry().await {
                Ok(()) => info!(channel = %R::CHANNEL, "synchronizer recovered"),
                Err(err) => warn!(channel = %R::CHANNEL, error = %err, "retry failed"),
            }
        }
    })
}
