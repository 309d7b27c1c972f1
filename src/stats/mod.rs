//! Metric value store for managed network functions.
//!
//! - [`attributes`] - reusable label buffers
//! - [`value`] - lock-guarded value holders
//! - [`registry`] - the fixed metric catalogue and the update API
//! - [`router`] - monitor-map fan-out into the rate limiter gauges

pub mod attributes;
pub mod registry;
pub mod router;
pub mod value;

pub use attributes::{AttributeBuffer, DYNAMIC_LABEL_HEADROOM};
pub use registry::{CounterKind, GaugeKind, METER_SCOPE, MetricsRegistry, global, init_global};
pub use router::route_monitored_map;
pub use value::{COUNTER_MIRROR_VALUE, CounterValue, GaugeValue, MetricValue, Snapshot};
