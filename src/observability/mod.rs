//! Tracing and metrics providers.
//!
//! # Data Flow
//! ```text
//! TraceConfig   → tracing.rs (OTLP/HTTP or stdout span exporter)
//! MetricsConfig → metrics.rs (Prometheus recorder, optional /metrics listener)
//!
//! Consumers:
//!     → http::middleware::telemetry (one span + counter + histogram per request)
//!     → embedders via `install_global()`
//! ```
//!
//! # Design Decisions
//! - Handles are built from config and passed explicitly
//! - Installing a handle as the process-wide default is a separate call
//! - Construction errors are returned; runtime export errors stay in the SDK

pub mod metrics;
pub mod tracing;

use metrics_exporter_prometheus::BuildError;
use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_sdk::error::OTelSdkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build span exporter: {0}")]
    Exporter(#[from] ExporterBuildError),

    #[error("tracer provider shutdown failed: {0}")]
    Shutdown(#[from] OTelSdkError),

    #[error("failed to build prometheus recorder: {0}")]
    MetricsBuild(#[from] BuildError),

    #[error("a global metrics recorder is already installed")]
    GlobalRecorderInstalled,

    #[error("metrics provider already shut down")]
    AlreadyShutdown,
}
