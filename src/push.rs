//! Side-channel push of metric updates to the local collector.
//!
//! Every update is serialized and POSTed to `<collector>/counter` or
//! `<collector>/gauge`. Pushes are best effort: failures are logged and
//! dropped, never retried, and never block the caller.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use crate::error::ForwardError;

/// Default cap on collector pushes in flight at once.
pub const MAX_IN_FLIGHT_PUSHES: usize = 64;

/// Collector endpoint a payload is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRoute {
    Counter,
    Gauge,
}

impl PushRoute {
    pub fn path(self) -> &'static str {
        match self {
            PushRoute::Counter => "/counter",
            PushRoute::Gauge => "/gauge",
        }
    }
}

/// Scalar carried in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Counter(i64),
    Gauge(f64),
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Counter(value)
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Gauge(value)
    }
}

/// Typed attribute value as the collector decodes it.
///
/// All labels produced by this crate are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeValue {
    #[serde(rename = "Type")]
    pub kind: &'static str,
    #[serde(rename = "Value")]
    pub value: String,
}

/// One label pair of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadAttribute {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: AttributeValue,
}

/// JSON body of a collector push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPayload {
    #[serde(rename = "Value")]
    pub value: PayloadValue,
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Attribs")]
    pub attribs: Vec<PayloadAttribute>,
}

impl MetricPayload {
    pub fn new(metric_name: String, value: PayloadValue, labels: &[KeyValue]) -> Self {
        let attribs = labels
            .iter()
            .map(|kv| PayloadAttribute {
                key: kv.key.as_str().to_string(),
                value: AttributeValue {
                    kind: "STRING",
                    value: kv.value.as_str().into_owned(),
                },
            })
            .collect();

        Self {
            value,
            metric_name,
            attribs,
        }
    }

    /// Endpoint this payload belongs to.
    pub fn route(&self) -> PushRoute {
        match self.value {
            PayloadValue::Counter(_) => PushRoute::Counter,
            PayloadValue::Gauge(_) => PushRoute::Gauge,
        }
    }
}

/// Destination for metric updates besides the scrape endpoint.
///
/// Implementations must return promptly; `push` is called on the caller's
/// update path.
pub trait PushSink: Send + Sync {
    fn push(&self, payload: MetricPayload);
}

/// Sink used when collector push is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl PushSink for DiscardSink {
    fn push(&self, payload: MetricPayload) {
        trace!(metric = %payload.metric_name, "push disabled, dropping update");
    }
}

/// Pushes payloads to the collector over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPushForwarder {
    client: reqwest::Client,
    base_url: String,
    runtime: Handle,
    in_flight: Arc<Semaphore>,
}

impl HttpPushForwarder {
    /// Create a forwarder for `collector_url`.
    ///
    /// Requests are spawned on `runtime`, so `push` may be called from any
    /// thread. Idle connections are not pooled: each push opens and releases
    /// its own connection. At most [`MAX_IN_FLIGHT_PUSHES`] requests run at
    /// once; pushes beyond that are dropped.
    pub fn new(
        collector_url: &str,
        timeout: Duration,
        runtime: Handle,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            client,
            base_url: collector_url.trim_end_matches('/').to_string(),
            runtime,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT_PUSHES)),
        })
    }

    /// Replace the cap on concurrent pushes. A cap of zero is raised to one.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Pushes that can start right now without being dropped.
    pub fn available_slots(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Full URL for a route.
    pub fn url_for(&self, route: PushRoute) -> String {
        format!("{}{}", self.base_url, route.path())
    }

    /// Deliver one payload and wait for the collector's answer.
    pub async fn send(&self, payload: &MetricPayload) -> Result<(), ForwardError> {
        let body = serde_json::to_vec(payload)?;
        post(&self.client, &self.url_for(payload.route()), body).await
    }
}

impl PushSink for HttpPushForwarder {
    fn push(&self, payload: MetricPayload) {
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    metric = %payload.metric_name,
                    error = %ForwardError::from(e),
                    "dropping collector push"
                );
                return;
            }
        };

        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            warn!(
                metric = %payload.metric_name,
                "too many collector pushes in flight, dropping update"
            );
            return;
        };

        let url = self.url_for(payload.route());
        let client = self.client.clone();
        let metric = payload.metric_name;

        self.runtime.spawn(async move {
            let _permit = permit;
            if let Err(e) = post(&client, &url, body).await {
                warn!(metric = %metric, url = %url, error = %e, "collector push failed");
            }
        });
    }
}

async fn post(client: &reqwest::Client, url: &str, body: Vec<u8>) -> Result<(), ForwardError> {
    let resp = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

    if !resp.status().is_success() {
        debug!(url, status = %resp.status(), "collector returned non-success status");
    }

    Ok(())
}
