//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::log::LoggerKind;
use crate::observability::metrics::MetricsRegistry;

pub const DEFAULT_LOG_FILE_NAME: &str = "log/default.log";
/// Rotation threshold in MiB (1 GiB).
pub const DEFAULT_LOG_MAX_SIZE: u64 = 1 << 10;
pub const DEFAULT_LOG_MAX_AGE: u32 = 29;
pub const DEFAULT_LOG_MAX_BACKUPS: usize = 30;
/// Largest request body the telemetry middleware buffers (2 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Root configuration for a service using this crate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener and request labelling.
    pub http: HttpConfig,

    /// Log sink settings.
    pub log: LogConfig,

    /// Which log sink to build.
    pub log_kind: LoggerKind,

    /// Span export. Tracing is disabled when absent.
    pub trace: Option<TraceConfig>,

    /// Prometheus exporter. Metrics are disabled when absent.
    pub metrics: Option<MetricsConfig>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Service name recorded on spans and metric labels.
    pub service_name: String,

    /// Deployment environment (e.g., "prod", "staging").
    pub environment: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Requests with a larger body are answered with 413.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            service_name: "web-contrib".to_string(),
            environment: "dev".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Log sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Emit DEBUG lines to the file sink.
    pub debug: bool,

    /// Rotate once the active file exceeds this many MiB.
    pub max_size: u64,

    /// Days to keep rotated files.
    pub max_age: u32,

    /// Number of rotated files to keep.
    pub max_backups: usize,

    /// Path of the active log file.
    pub file_name: String,

    /// Gzip rotated files.
    pub compress: bool,

    /// Rotate once a day instead of by size. Needs `max_backups >= max_age`.
    pub rotate_by_day: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: true,
            max_size: DEFAULT_LOG_MAX_SIZE,
            max_age: DEFAULT_LOG_MAX_AGE,
            max_backups: DEFAULT_LOG_MAX_BACKUPS,
            file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            compress: true,
            rotate_by_day: false,
        }
    }
}

impl LogConfig {
    /// Replaces zero-valued size, age, backup and name fields with defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.file_name.is_empty() {
            self.file_name = DEFAULT_LOG_FILE_NAME.to_string();
        }
        if self.max_size == 0 {
            self.max_size = DEFAULT_LOG_MAX_SIZE;
        }
        if self.max_age == 0 {
            self.max_age = DEFAULT_LOG_MAX_AGE;
        }
        if self.max_backups == 0 {
            self.max_backups = DEFAULT_LOG_MAX_BACKUPS;
        }
        self
    }
}

/// Span exporter selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceExporterKind {
    /// OTLP over HTTP to `endpoint_url`.
    #[default]
    Otlp,
    /// Pretty-printed to standard output.
    Stdout,
}

/// Tracer provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    /// `service.name` resource attribute.
    pub service_name: String,

    /// Collector URL (e.g., "http://localhost:4318/v1/traces").
    pub endpoint_url: String,

    /// Fraction of root traces to sample, 0.0 to 1.0.
    pub sampler_rate: f64,

    pub exporter: TraceExporterKind,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            endpoint_url: "http://localhost:4318/v1/traces".to_string(),
            sampler_rate: 1.0,
            exporter: TraceExporterKind::Otlp,
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// `service_name` label on `target_info`. Omitted when empty.
    pub service_name: String,

    /// Serve `/metrics` on this port when set.
    pub port: Option<u16>,

    /// Registry to record into and serve. The process-wide registry when unset.
    #[serde(skip)]
    pub registry: Option<MetricsRegistry>,
}
