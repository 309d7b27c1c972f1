//! Reusable label storage for a single metric instance.
//!
//! The buffer keeps the base labels as a fixed prefix and overwrites the
//! dynamic suffix in place on every update, so the hot update path does not
//! allocate a fresh label vector per call.

use opentelemetry::KeyValue;

/// Slots reserved beyond the base labels so the common update (a handful of
/// dynamic labels) never reallocates.
pub const DYNAMIC_LABEL_HEADROOM: usize = 5;

/// Base labels followed by the most recently set dynamic labels.
///
/// Invariant: `slots[..base_count]` always equals the construction-time base
/// labels, in order.
#[derive(Debug, Clone)]
pub struct AttributeBuffer {
    name: String,
    base_count: usize,
    slots: Vec<KeyValue>,
}

impl AttributeBuffer {
    /// Create a buffer for `name` seeded with `base` labels.
    pub fn new(name: impl Into<String>, base: &[KeyValue]) -> Self {
        let mut slots = Vec::with_capacity(base.len() + DYNAMIC_LABEL_HEADROOM);
        slots.extend_from_slice(base);

        Self {
            name: name.into(),
            base_count: base.len(),
            slots,
        }
    }

    /// Metric name these labels belong to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of base labels.
    pub fn base_count(&self) -> usize {
        self.base_count
    }

    /// Replace the dynamic labels.
    ///
    /// Previous dynamic labels are discarded, never merged. Labels are
    /// appended in the iteration order of `labels`; callers must not rely on
    /// that order.
    pub fn set_dynamic<'a, I>(&mut self, labels: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.slots.truncate(self.base_count);
        self.slots.extend(
            labels
                .into_iter()
                .map(|(key, value)| KeyValue::new(key.to_string(), value.to_string())),
        );
    }

    /// Full label sequence, base labels first.
    pub fn labels(&self) -> &[KeyValue] {
        &self.slots
    }

    /// The fixed base prefix.
    pub fn base_labels(&self) -> &[KeyValue] {
        &self.slots[..self.base_count]
    }

    /// Labels set by the last update.
    pub fn dynamic_labels(&self) -> &[KeyValue] {
        &self.slots[self.base_count..]
    }

    /// Allocated slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
