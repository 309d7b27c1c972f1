//! Runtime configuration for the metrics store.
//!
//! Every field can be overridden through an environment variable; unset or
//! unparsable variables fall back to the defaults.

use std::time::Duration;

use opentelemetry::KeyValue;

use crate::error::ConfigError;

/// Label key the collector historically expects for the program name on
/// counter pushes.
pub const LEGACY_COUNTER_PROGRAM_LABEL: &str = "dbpfProgram";

/// Organizational identity attached to every metric as base labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseLabels {
    pub organization: String,
    pub team: String,
    pub project: String,
}

impl Default for BaseLabels {
    fn default() -> Self {
        Self {
            organization: "LSG".to_string(),
            team: "LIDT".to_string(),
            project: "eBPFManagement".to_string(),
        }
    }
}

impl BaseLabels {
    /// Base labels in their fixed order.
    pub fn to_key_values(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("Organization", self.organization.clone()),
            KeyValue::new("Team", self.team.clone()),
            KeyValue::new("Project", self.project.clone()),
        ]
    }
}

/// Configuration for the metric registry, exposition listener and collector
/// push.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Host identity, exported as the `host.name` resource attribute.
    pub hostname: String,

    /// Prefix of every metric name (`<daemon_name>_<suffix>`).
    pub daemon_name: String,

    /// Listen address of the exposition server. `":9090"` is accepted.
    pub metrics_addr: String,

    /// Base URL of the side-channel collector.
    pub collector_url: String,

    /// When false, updates are only exposed for scraping and never pushed.
    pub push_enabled: bool,

    /// Timeout of a single collector push.
    pub push_timeout: Duration,

    /// Label key used for the program name on counter updates.
    pub counter_program_label: String,

    /// Labels shared by every metric instance.
    pub base_labels: BaseLabels,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            daemon_name: "nfstats".to_string(),
            metrics_addr: "127.0.0.1:9090".to_string(),
            collector_url: "http://localhost:8897".to_string(),
            push_enabled: true,
            push_timeout: Duration::from_millis(2000),
            counter_program_label: LEGACY_COUNTER_PROGRAM_LABEL.to_string(),
            base_labels: BaseLabels::default(),
        }
    }
}

impl MetricsConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `HOSTNAME` (default: localhost)
    /// - `NFSTATS_DAEMON_NAME` (default: nfstats)
    /// - `NFSTATS_METRICS_ADDR` (default: 127.0.0.1:9090)
    /// - `NFSTATS_COLLECTOR_URL` (default: http://localhost:8897)
    /// - `NFSTATS_PUSH_ENABLED` (default: true)
    /// - `NFSTATS_PUSH_TIMEOUT_MS` (default: 2000)
    /// - `NFSTATS_COUNTER_PROGRAM_LABEL` (default: dbpfProgram)
    /// - `NFSTATS_ORGANIZATION`, `NFSTATS_TEAM`, `NFSTATS_PROJECT`
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or(default.hostname),

            daemon_name: std::env::var("NFSTATS_DAEMON_NAME").unwrap_or(default.daemon_name),

            metrics_addr: std::env::var("NFSTATS_METRICS_ADDR").unwrap_or(default.metrics_addr),

            collector_url: std::env::var("NFSTATS_COLLECTOR_URL")
                .unwrap_or(default.collector_url),

            push_enabled: std::env::var("NFSTATS_PUSH_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.push_enabled),

            push_timeout: std::env::var("NFSTATS_PUSH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.push_timeout),

            counter_program_label: std::env::var("NFSTATS_COUNTER_PROGRAM_LABEL")
                .unwrap_or(default.counter_program_label),

            base_labels: BaseLabels {
                organization: std::env::var("NFSTATS_ORGANIZATION")
                    .unwrap_or(default.base_labels.organization),
                team: std::env::var("NFSTATS_TEAM").unwrap_or(default.base_labels.team),
                project: std::env::var("NFSTATS_PROJECT").unwrap_or(default.base_labels.project),
            },
        }
    }

    /// Check the configuration before any metric handle is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon_name.is_empty() {
            return Err(ConfigError::EmptyDaemonName);
        }
        if !self
            .daemon_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidDaemonName {
                name: self.daemon_name.clone(),
            });
        }
        if self.metrics_addr.trim().is_empty() {
            return Err(ConfigError::EmptyMetricsAddr);
        }
        if self.counter_program_label.is_empty() {
            return Err(ConfigError::EmptyCounterProgramLabel);
        }

        let url = reqwest::Url::parse(&self.collector_url).map_err(|e| {
            ConfigError::InvalidCollectorUrl {
                url: self.collector_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidCollectorUrl {
                url: self.collector_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(())
    }

    /// Address to bind the exposition listener to.
    ///
    /// A bare `":port"` binds all interfaces.
    pub fn bind_string(&self) -> String {
        let addr = self.metrics_addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        }
    }

    /// Full metric name for a catalogue suffix.
    pub fn metric_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.daemon_name, suffix)
    }
}
