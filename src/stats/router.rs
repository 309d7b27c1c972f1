//! Fan-out of monitor-map updates into the rate-limiter gauges.
//!
//! The monitor-map gauge carries readings of many kernel maps. Two of them,
//! the rate limiter's receive and drop counters, are also exposed as their
//! own series.

use super::registry::GaugeKind;

/// Map name prefix of the rate limiter's receive counter.
pub const RL_RECV_COUNT_MAP_PREFIX: &str = "rl_recv_count_map";

/// Map name prefix of the rate limiter's drop counter.
pub const RL_DROP_COUNT_MAP_PREFIX: &str = "rl_drop_count_map";

/// Gauge that should additionally receive an update of `gauge` for
/// `map_name`, if any.
///
/// Only [`GaugeKind::MonitorMap`] updates are ever routed.
pub fn route_monitored_map(gauge: GaugeKind, map_name: &str) -> Option<GaugeKind> {
    if gauge != GaugeKind::MonitorMap {
        return None;
    }

    if map_name.starts_with(RL_RECV_COUNT_MAP_PREFIX) {
        Some(GaugeKind::RlRecvCount)
    } else if map_name.starts_with(RL_DROP_COUNT_MAP_PREFIX) {
        Some(GaugeKind::RlDropCount)
    } else {
        None
    }
}
