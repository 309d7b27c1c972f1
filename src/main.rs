//! nfstats daemon.
//!
//! Starts the metric store, serves `/metrics`, optionally polls named kernel
//! maps into the monitor-map gauge, and runs until SIGINT/SIGTERM.

use std::time::Duration;

use clap::Parser;
use nfstats::config::MetricsConfig;
use nfstats::kernel_map::lookup_map_value;
use nfstats::stats::{self, GaugeKind};
use nfstats::setup_metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Command line options. Unset options keep the `NFSTATS_*` environment
/// configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Daemon name used as the metric name prefix
    #[arg(long)]
    daemon_name: Option<String>,

    /// Exposition listen address (e.g. "0.0.0.0:9090" or ":9090")
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Collector base URL receiving /counter and /gauge pushes
    #[arg(long)]
    collector_url: Option<String>,

    /// Disable pushing updates to the collector
    #[arg(long)]
    no_push: bool,

    /// Kernel map to poll into the monitor-map gauge (repeatable)
    #[arg(long = "poll-map", env = "NFSTATS_POLL_MAPS", value_delimiter = ',')]
    poll_maps: Vec<String>,

    /// Seconds between map polls
    #[arg(long, env = "NFSTATS_POLL_INTERVAL_SECS", default_value = "10")]
    poll_interval_secs: u64,

    /// Program label attached to polled readings
    #[arg(long, env = "NFSTATS_POLL_PROGRAM", default_value = "")]
    poll_program: String,

    /// Interface label attached to polled readings
    #[arg(long, env = "NFSTATS_POLL_IFACE", default_value = "")]
    poll_iface: String,
}

impl Config {
    fn metrics_config(&self) -> MetricsConfig {
        let mut config = MetricsConfig::from_env();
        if let Some(name) = &self.daemon_name {
            config.daemon_name = name.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics_addr = addr.clone();
        }
        if let Some(url) = &self.collector_url {
            config.collector_url = url.clone();
        }
        if self.no_push {
            config.push_enabled = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli_config = Config::parse();
    let metrics_config = cli_config.metrics_config();

    info!(
        daemon = %metrics_config.daemon_name,
        metrics_addr = %metrics_config.metrics_addr,
        collector = %metrics_config.collector_url,
        push_enabled = metrics_config.push_enabled,
        "nfstats starting"
    );

    let handle = match setup_metrics(&metrics_config).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Metrics setup failed");
            return Err(e.into());
        }
    };

    if !stats::init_global(handle.registry()) {
        warn!("global metric registry already installed");
    }

    let shutdown = CancellationToken::new();
    let poller = if cli_config.poll_maps.is_empty() {
        None
    } else {
        Some(tokio::spawn(poll_maps(cli_config.clone(), shutdown.clone())))
    };

    wait_for_signal().await;
    shutdown.cancel();

    if let Some(poller) = poller {
        if let Err(e) = poller.await {
            error!(error = %e, "map poller task failed");
        }
    }
    handle.shutdown().await;

    info!("nfstats stopped");
    Ok(())
}

/// Publish every configured map into the global registry on an interval
/// until cancelled.
async fn poll_maps(config: Config, shutdown: CancellationToken) {
    let Some(registry) = stats::global() else {
        error!("map poller started before the metric registry was installed");
        return;
    };

    let period = Duration::from_secs(config.poll_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);

    info!(
        maps = ?config.poll_maps,
        interval_secs = period.as_secs(),
        "map poller started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        for map_name in &config.poll_maps {
            let name = map_name.clone();
            let result = tokio::task::spawn_blocking(move || lookup_map_value(&name)).await;

            match result {
                Ok(Ok(Some(value))) => {
                    registry.set_value(
                        value as f64,
                        GaugeKind::MonitorMap,
                        &config.poll_program,
                        map_name,
                        &config.poll_iface,
                    );
                }
                Ok(Ok(None)) => debug!(map = %map_name, "polled map not present"),
                Ok(Err(e)) => warn!(map = %map_name, error = %e, "map poll failed"),
                Err(e) => error!(map = %map_name, error = %e, "map poll task panicked"),
            }
        }
    }

    info!("map poller stopped");
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
