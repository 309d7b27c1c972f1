//! Error types for nfstats.
//!
//! Nothing on the update or exposition path returns these to callers of the
//! update API. They surface only from setup, from the collector push (where
//! they are logged and dropped) and from the kernel map lookup.

use thiserror::Error;

/// Invalid configuration detected by [`crate::config::MetricsConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Daemon name is used as the metric name prefix and must be non-empty.
    #[error("daemon name must not be empty")]
    EmptyDaemonName,

    /// Daemon name contains characters that are not valid in a metric name.
    #[error("daemon name '{name}' may only contain ASCII letters, digits and '_'")]
    InvalidDaemonName { name: String },

    /// Metrics listen address is empty.
    #[error("metrics address must not be empty")]
    EmptyMetricsAddr,

    /// Collector URL does not parse or is not http(s).
    #[error("invalid collector URL '{url}': {reason}")]
    InvalidCollectorUrl { url: String, reason: String },

    /// Label key used for the counter program label is empty.
    #[error("counter program label key must not be empty")]
    EmptyCounterProgramLabel,
}

/// Errors that abort metrics setup.
///
/// Setup either yields a fully populated registry or one of these; a
/// registry with missing entries is never handed out.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The Prometheus exporter could not be built.
    #[error("failed to build prometheus exporter: {reason}")]
    Exporter { reason: String },

    /// The HTTP client used for collector pushes could not be built.
    #[error("failed to build push client: {0}")]
    PushClient(#[from] reqwest::Error),

    /// The exposition listener could not bind.
    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single push to the collector.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// POST to the collector failed at the transport level.
    #[error("POST request to collector failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors from the kernel map lookup.
#[derive(Debug, Error)]
pub enum MapLookupError {
    /// Walking the kernel map ids failed.
    #[error("failed to fetch next map id after {after}: {source}")]
    Enumerate {
        after: u32,
        #[source]
        source: std::io::Error,
    },

    /// A map id could not be opened.
    #[error("failed to open map {id}: {source}")]
    Open {
        id: u32,
        #[source]
        source: std::io::Error,
    },

    /// Map metadata could not be read.
    #[error("failed to read info for map {id}: {source}")]
    Info {
        id: u32,
        #[source]
        source: std::io::Error,
    },

    /// The matching map could not be read at the zero key.
    #[error("failed to look up map '{name}': {source}")]
    Lookup {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
