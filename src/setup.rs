//! Process startup of the metric store.
//!
//! [`setup_metrics`] builds the registry, binds the exposition listener and
//! starts serving in the background. Any failure is returned before a
//! registry is handed out.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::MetricsConfig;
use crate::error::SetupError;
use crate::exposition::ExpositionServer;
use crate::push::{DiscardSink, HttpPushForwarder, PushSink};
use crate::stats::MetricsRegistry;

/// Running metric store: the registry plus its exposition server.
pub struct MetricsHandle {
    registry: Arc<MetricsRegistry>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl MetricsHandle {
    /// Registry to hand to the update call sites.
    pub fn registry(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.registry)
    }

    /// Address the exposition listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the exposition server and shut the meter provider down.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            error!(error = %e, "exposition task failed");
        }
        self.registry.shutdown();
    }
}

/// Build the push sink selected by `config`.
///
/// Must be called from within a tokio runtime when push is enabled.
pub fn push_sink(config: &MetricsConfig) -> Result<Arc<dyn PushSink>, SetupError> {
    if !config.push_enabled {
        info!("collector push disabled");
        return Ok(Arc::new(DiscardSink));
    }

    let forwarder =
        HttpPushForwarder::new(&config.collector_url, config.push_timeout, Handle::current())?;
    info!(collector = %config.collector_url, "collector push enabled");
    Ok(Arc::new(forwarder))
}

/// Create every metric, start the exposition listener and register the
/// scrape callbacks.
pub async fn setup_metrics(config: &MetricsConfig) -> Result<MetricsHandle, SetupError> {
    let sink = push_sink(config)?;
    let registry = Arc::new(MetricsRegistry::new(config, sink)?);

    let bind_addr = config.bind_string();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|source| SetupError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| SetupError::Bind {
        addr: bind_addr.clone(),
        source,
    })?;

    let shutdown = CancellationToken::new();
    let server = ExpositionServer::new(registry.prometheus_registry().clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = server.serve(listener, server_shutdown).await {
            error!(error = %e, "Exposition server error");
        }
    });

    info!(
        hostname = %config.hostname,
        daemon = %config.daemon_name,
        addr = %local_addr,
        "Metrics setup complete"
    );

    Ok(MetricsHandle {
        registry,
        local_addr,
        shutdown,
        server,
    })
}
