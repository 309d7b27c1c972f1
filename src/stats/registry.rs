//! The metric registry and the update API.
//!
//! # Locking
//!
//! Two lock domains are involved:
//!
//! - the registry-wide gauge lock, held exclusively only while one gauge
//!   holder is resolved and mutated;
//! - each holder's own lock, which the scrape callbacks take for reading.
//!
//! Neither is held while a payload is handed to the push sink.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, MeterProvider as _, ObservableGauge};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use parking_lot::RwLock;
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, trace};

use super::router::route_monitored_map;
use super::value::{CounterValue, GaugeValue, Snapshot};
use crate::config::MetricsConfig;
use crate::error::SetupError;
use crate::push::{PayloadValue, PushSink};

/// Instrumentation scope of every instrument created here.
pub const METER_SCOPE: &str = "ebpfmanagement";

/// Tracked counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    StartCount,
    StopCount,
    UpdateCount,
}

impl CounterKind {
    pub const ALL: [CounterKind; 3] = [
        CounterKind::StartCount,
        CounterKind::StopCount,
        CounterKind::UpdateCount,
    ];

    /// Metric name suffix after the daemon name.
    pub fn suffix(self) -> &'static str {
        match self {
            CounterKind::StartCount => "OtelNFStartCount",
            CounterKind::StopCount => "OtelNFStopCount",
            CounterKind::UpdateCount => "OtelNFUpdateCount",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CounterKind::StartCount => "The count of network functions started",
            CounterKind::StopCount => "The count of network functions stopped",
            CounterKind::UpdateCount => "The count of network functions updated",
        }
    }
}

/// Tracked gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GaugeKind {
    Running,
    StartTime,
    MonitorMap,
    RlRecvCount,
    RlDropCount,
}

impl GaugeKind {
    pub const ALL: [GaugeKind; 5] = [
        GaugeKind::Running,
        GaugeKind::StartTime,
        GaugeKind::MonitorMap,
        GaugeKind::RlRecvCount,
        GaugeKind::RlDropCount,
    ];

    /// Metric name suffix after the daemon name.
    pub fn suffix(self) -> &'static str {
        match self {
            GaugeKind::Running => "OtelNFRunning",
            GaugeKind::StartTime => "OtelNFStartTime",
            GaugeKind::MonitorMap => "OtelNFMonitorMap",
            GaugeKind::RlRecvCount => "RLRecvCount",
            GaugeKind::RlDropCount => "RLDropCount",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            GaugeKind::Running => "This value indicates network functions is running or not",
            GaugeKind::StartTime => {
                "This value indicates start time of the network function since unix epoch in seconds"
            }
            GaugeKind::MonitorMap => "This value indicates network function monitor counters",
            GaugeKind::RlRecvCount => {
                "This value indicates network packets received by the rate limiter"
            }
            GaugeKind::RlDropCount => {
                "This value indicates network packets dropped by the rate limiter"
            }
        }
    }
}

struct CounterEntry {
    instrument: Counter<u64>,
    value: Arc<CounterValue>,
}

struct GaugeEntry {
    // Keeps the SDK handle alive next to the holder its callback reads.
    _instrument: ObservableGauge<f64>,
    value: Arc<GaugeValue>,
}

/// Counters and gauges of the managed network functions.
///
/// The key set is fixed at construction: every [`CounterKind`] and
/// [`GaugeKind`] has an entry for the registry's whole lifetime.
pub struct MetricsRegistry {
    provider: SdkMeterProvider,
    prometheus: prometheus::Registry,
    counters: HashMap<CounterKind, CounterEntry>,
    gauges: RwLock<HashMap<GaugeKind, GaugeEntry>>,
    sink: Arc<dyn PushSink>,
    counter_program_label: String,
}

impl MetricsRegistry {
    /// Build the registry, its SDK instruments and the scrape callbacks.
    ///
    /// Instruments export into a registry-owned `prometheus::Registry`, so
    /// independent registries can coexist in one process.
    pub fn new(config: &MetricsConfig, sink: Arc<dyn PushSink>) -> Result<Self, SetupError> {
        config.validate()?;

        let prometheus = prometheus::Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(prometheus.clone())
            .build()
            .map_err(|e| SetupError::Exporter {
                reason: e.to_string(),
            })?;

        let resource = Resource::builder()
            .with_service_name(config.daemon_name.clone())
            .with_attribute(KeyValue::new("host.name", config.hostname.clone()))
            .build();

        let provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(exporter)
            .build();
        let meter = provider.meter(METER_SCOPE);

        let base_labels = config.base_labels.to_key_values();

        let counters = CounterKind::ALL
            .into_iter()
            .map(|kind| {
                let name = config.metric_name(kind.suffix());
                let instrument = meter
                    .u64_counter(name.clone())
                    .with_description(kind.description())
                    .build();
                let value = Arc::new(CounterValue::counter(name, &base_labels));
                (kind, CounterEntry { instrument, value })
            })
            .collect();

        let gauges = GaugeKind::ALL
            .into_iter()
            .map(|kind| {
                let name = config.metric_name(kind.suffix());
                let value = Arc::new(GaugeValue::gauge(name.clone(), &base_labels));

                let observed = Arc::clone(&value);
                let instrument = meter
                    .f64_observable_gauge(name)
                    .with_description(kind.description())
                    .with_callback(move |observer| {
                        let snapshot = observed.snapshot();
                        observer.observe(snapshot.value, &snapshot.labels);
                    })
                    .build();

                (
                    kind,
                    GaugeEntry {
                        _instrument: instrument,
                        value,
                    },
                )
            })
            .collect();

        debug!(
            daemon = %config.daemon_name,
            counters = CounterKind::ALL.len(),
            gauges = GaugeKind::ALL.len(),
            "metric registry initialized"
        );

        Ok(Self {
            provider,
            prometheus,
            counters,
            gauges: RwLock::new(gauges),
            sink,
            counter_program_label: config.counter_program_label.clone(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Update API
    // ─────────────────────────────────────────────────────────────────────────

    /// Count one event of `counter`.
    ///
    /// Labels are replaced before the increment is recorded, so the
    /// increment is attributed to exactly these labels.
    pub fn incr(&self, counter: CounterKind, program: &str, direction: &str, iface: &str) {
        let Some(entry) = self.counters.get(&counter) else {
            error!(?counter, "counter missing from registry");
            return;
        };

        let snapshot = entry.value.relabel([
            (self.counter_program_label.as_str(), program),
            ("direction", direction),
            ("ifaceName", iface),
        ]);
        entry.instrument.add(1, &snapshot.labels);

        self.forward(snapshot);
    }

    /// Set a gauge labelled with program and interface.
    pub fn set(&self, value: f64, gauge: GaugeKind, program: &str, iface: &str) {
        self.update_gauge_value(value, gauge, &[("ebpfProgram", program), ("ifaceName", iface)]);
    }

    /// Set a gauge with a kernel map reading.
    ///
    /// Monitor-map readings of the rate limiter maps are also written to the
    /// matching rate limiter gauge.
    pub fn set_value(
        &self,
        value: f64,
        gauge: GaugeKind,
        program: &str,
        map_name: &str,
        iface: &str,
    ) {
        let labels = [
            ("ebpfProgram", program),
            ("mapName", map_name),
            ("ifaceName", iface),
        ];
        self.update_gauge_value(value, gauge, &labels);

        if let Some(target) = route_monitored_map(gauge, map_name) {
            trace!(map_name, ?target, "routing monitor map reading");
            self.update_gauge_value(value, target, &labels);
        }
    }

    /// Set a gauge labelled with program version and direction.
    pub fn set_with_version(
        &self,
        value: f64,
        gauge: GaugeKind,
        program: &str,
        version: &str,
        direction: &str,
        iface: &str,
    ) {
        self.update_gauge_value(
            value,
            gauge,
            &[
                ("ebpfProgram", program),
                ("version", version),
                ("direction", direction),
                ("ifaceName", iface),
            ],
        );
    }

    fn update_gauge_value(&self, value: f64, gauge: GaugeKind, labels: &[(&str, &str)]) {
        let snapshot = {
            let gauges = self.gauges.write();
            let Some(entry) = gauges.get(&gauge) else {
                error!(?gauge, "gauge missing from registry");
                return;
            };
            entry.value.update(value, labels.iter().copied())
        };

        self.forward(snapshot);
    }

    fn forward<T: Into<PayloadValue>>(&self, snapshot: Snapshot<T>) {
        self.sink.push(snapshot.into_payload());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readers
    // ─────────────────────────────────────────────────────────────────────────

    /// Holder of a gauge.
    pub fn gauge(&self, kind: GaugeKind) -> Option<Arc<GaugeValue>> {
        self.gauges.read().get(&kind).map(|entry| Arc::clone(&entry.value))
    }

    /// Holder of a counter.
    pub fn counter(&self, kind: CounterKind) -> Option<Arc<CounterValue>> {
        self.counters.get(&kind).map(|entry| Arc::clone(&entry.value))
    }

    /// Prometheus registry the instruments export into.
    pub fn prometheus_registry(&self) -> &prometheus::Registry {
        &self.prometheus
    }

    /// Render the current exposition text. Runs every gauge callback.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.prometheus.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Shut the meter provider down.
    pub fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            error!(error = %e, "meter provider shutdown failed");
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();

/// Install the process-wide registry. Returns `false` if one is already set.
pub fn init_global(registry: Arc<MetricsRegistry>) -> bool {
    GLOBAL_REGISTRY.set(registry).is_ok()
}

/// The process-wide registry, if installed.
pub fn global() -> Option<Arc<MetricsRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}
