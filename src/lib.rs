//! nfstats - metric value store for managed eBPF network functions.
//!
//! Worker code records counter and gauge updates through
//! [`MetricsRegistry`]. Each update is:
//!
//! - stored in a lock-guarded holder that the Prometheus exporter reads on
//!   every scrape of `GET /metrics`;
//! - forwarded, best effort, as a JSON payload to an external collector.
//!
//! Monitor-map readings of the rate limiter maps also feed the dedicated
//! receive/drop gauges. [`kernel_map`] reads scalar values straight from
//! named kernel eBPF maps.

pub mod config;
pub mod error;
pub mod exposition;
pub mod kernel_map;
pub mod logging_layer;
pub mod push;
pub mod setup;
pub mod stats;

pub use config::MetricsConfig;
pub use error::{ConfigError, ForwardError, MapLookupError, SetupError};
pub use kernel_map::{ebpf_map_value, lookup_map_value};
pub use setup::{MetricsHandle, setup_metrics};
pub use stats::{CounterKind, GaugeKind, MetricsRegistry};
