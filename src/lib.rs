//! Telemetry plumbing for HTTP services: structured logging, OTLP tracing,
//! Prometheus metrics and the middleware that ties them to each request.

pub mod config;
pub mod context;
pub mod http;
pub mod log;
pub mod observability;
pub mod utils;

pub use config::AppConfig;
pub use http::HttpServer;
pub use log::{any, Field, Logger, LoggerKind};
pub use observability::{
    metrics::{MetricsRegistry, PrometheusMetrics},
    tracing::OtlpTracer,
    TelemetryError,
};
