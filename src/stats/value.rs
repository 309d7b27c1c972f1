//! Metric value holders.
//!
//! A holder pairs the latest scalar reading with its [`AttributeBuffer`]
//! behind a single reader/writer lock, so readers always see a value and a
//! label set that were written together.

use opentelemetry::KeyValue;
use parking_lot::RwLock;

use super::attributes::AttributeBuffer;
use crate::push::{MetricPayload, PayloadValue};

/// Initial value of a counter holder.
///
/// The real count lives in the SDK counter; the holder only mirrors this
/// constant, so counter pushes always report it.
pub const COUNTER_MIRROR_VALUE: i64 = 1;

/// Latest reading of a gauge.
pub type GaugeValue = MetricValue<f64>;

/// Mirror of a counter together with the labels of its last increment.
pub type CounterValue = MetricValue<i64>;

#[derive(Debug)]
struct ValueState<T> {
    value: T,
    attributes: AttributeBuffer,
}

/// Consistent copy of a holder taken under one read lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub metric_name: String,
    pub value: T,
    pub labels: Vec<KeyValue>,
}

impl<T: Into<PayloadValue>> Snapshot<T> {
    /// Convert into the collector wire payload.
    pub fn into_payload(self) -> MetricPayload {
        MetricPayload::new(self.metric_name, self.value.into(), &self.labels)
    }
}

/// A scalar reading plus its labels, guarded by one lock.
#[derive(Debug)]
pub struct MetricValue<T> {
    state: RwLock<ValueState<T>>,
}

impl<T: Copy> MetricValue<T> {
    /// Create a holder with an initial value and base labels.
    pub fn new(metric_name: impl Into<String>, base_labels: &[KeyValue], initial: T) -> Self {
        Self {
            state: RwLock::new(ValueState {
                value: initial,
                attributes: AttributeBuffer::new(metric_name, base_labels),
            }),
        }
    }

    /// Metric name of this holder.
    pub fn metric_name(&self) -> String {
        self.state.read().attributes.name().to_string()
    }

    pub fn value(&self) -> T {
        self.state.read().value
    }

    pub fn set_value(&self, value: T) {
        self.state.write().value = value;
    }

    /// Replace the dynamic labels.
    pub fn set_attributes<'a, I>(&self, labels: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.state.write().attributes.set_dynamic(labels);
    }

    /// Current full label set.
    pub fn label_set(&self) -> Vec<KeyValue> {
        self.state.read().attributes.labels().to_vec()
    }

    /// Value and labels read under one lock.
    pub fn snapshot(&self) -> Snapshot<T> {
        let state = self.state.read();
        Snapshot {
            metric_name: state.attributes.name().to_string(),
            value: state.value,
            labels: state.attributes.labels().to_vec(),
        }
    }

    /// Store a value and its labels in one critical section.
    ///
    /// Returns the state as written, before any later writer can interleave.
    pub fn update<'a, I>(&self, value: T, labels: I) -> Snapshot<T>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = self.state.write();
        state.value = value;
        state.attributes.set_dynamic(labels);
        Snapshot {
            metric_name: state.attributes.name().to_string(),
            value: state.value,
            labels: state.attributes.labels().to_vec(),
        }
    }

    /// Replace the labels and return the resulting snapshot.
    pub fn relabel<'a, I>(&self, labels: I) -> Snapshot<T>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = self.state.write();
        state.attributes.set_dynamic(labels);
        Snapshot {
            metric_name: state.attributes.name().to_string(),
            value: state.value,
            labels: state.attributes.labels().to_vec(),
        }
    }
}

impl GaugeValue {
    /// Gauge holder starting at `0.0`.
    pub fn gauge(metric_name: impl Into<String>, base_labels: &[KeyValue]) -> Self {
        Self::new(metric_name, base_labels, 0.0)
    }
}

impl CounterValue {
    /// Counter holder starting at [`COUNTER_MIRROR_VALUE`].
    pub fn counter(metric_name: impl Into<String>, base_labels: &[KeyValue]) -> Self {
        Self::new(metric_name, base_labels, COUNTER_MIRROR_VALUE)
    }
}
