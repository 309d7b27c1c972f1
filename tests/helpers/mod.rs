//! Shared fixtures for the integration tests.
//!
//! Not every test binary uses every helper.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use nfstats::config::MetricsConfig;
use nfstats::push::{MetricPayload, PushSink};
use nfstats::stats::MetricsRegistry;
use opentelemetry::KeyValue;
use parking_lot::Mutex;

/// Sink that keeps every payload it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pushed: Mutex<Vec<MetricPayload>>,
}

impl RecordingSink {
    pub fn payloads(&self) -> Vec<MetricPayload> {
        self.pushed.lock().clone()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.pushed
            .lock()
            .iter()
            .map(|p| p.metric_name.clone())
            .collect()
    }
}

impl PushSink for RecordingSink {
    fn push(&self, payload: MetricPayload) {
        self.pushed.lock().push(payload);
    }
}

/// Config bound to an ephemeral local port with push disabled.
pub fn local_config(daemon_name: &str) -> MetricsConfig {
    MetricsConfig {
        daemon_name: daemon_name.to_string(),
        metrics_addr: "127.0.0.1:0".to_string(),
        push_enabled: false,
        ..MetricsConfig::default()
    }
}

pub fn recording_registry(daemon_name: &str) -> (Arc<MetricsRegistry>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let registry = MetricsRegistry::new(&local_config(daemon_name), sink.clone())
        .expect("registry setup");
    (Arc::new(registry), sink)
}

/// Label set as sorted key/value pairs.
pub fn label_pairs(labels: &[KeyValue]) -> BTreeSet<(String, String)> {
    labels
        .iter()
        .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
        .collect()
}

pub fn pairs(items: &[(&str, &str)]) -> BTreeSet<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The exposition line of `metric`, if present.
pub fn series_line<'a>(text: &'a str, metric: &str) -> Option<&'a str> {
    let prefix = format!("{metric}{{");
    text.lines().find(|l| l.starts_with(&prefix))
}
