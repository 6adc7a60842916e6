//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Build Prometheus registries with latency buckets for `web.*` histograms
//! - Keep one process-wide registry for providers configured without one
//! - Publish the service as a `target_info` gauge
//! - Serve `GET /metrics` on an optional port
//! - Hand out [`Meter`]s bound to the recorder
//!
//! # Metrics
//! - `web.request` (counter): requests by service, route, method, env, status
//! - `web.histogram` (histogram): request latency in milliseconds
//! - `promhttp_metric_handler_requests_total` (counter): scrapes served
//!
//! # Design Decisions
//! - The recorder is not installed in the `metrics` facade unless asked
//! - After shutdown every meter bound to the provider is a no-op; the
//!   registry itself stays usable by other providers
//! - The listener logs its failures and never takes the process down

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use futures_util::FutureExt;
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Label, Metadata, Recorder, SharedString, Unit,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use once_cell::sync::OnceCell;
use tokio::net::TcpListener;

use crate::config::MetricsConfig;
use crate::observability::TelemetryError;

/// Request counter recorded by the HTTP middleware.
pub const REQUEST_COUNTER: &str = "web.request";
/// Request latency histogram (milliseconds) recorded by the HTTP middleware.
pub const LATENCY_HISTOGRAM: &str = "web.histogram";
/// Upper bounds of the latency histogram, in milliseconds.
pub const LATENCY_BUCKETS_MS: [f64; 8] = [100.0, 200.0, 300.0, 500.0, 700.0, 1000.0, 2000.0, 5000.0];

const SCRAPE_COUNTER: &str = "promhttp_metric_handler_requests_total";
const TARGET_INFO: &str = "target_info";

static GLOBAL_REGISTRY: OnceCell<MetricsRegistry> = OnceCell::new();

/// A Prometheus recorder together with the handle that renders it.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct MetricsRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// A private registry with the latency buckets preset.
    pub fn new() -> Result<Self, TelemetryError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Prefix("web".to_string()), &LATENCY_BUCKETS_MS)?
            .build_recorder();
        let handle = recorder.handle();
        Ok(Self {
            recorder: Arc::new(recorder),
            handle,
        })
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Result<Self, TelemetryError> {
        GLOBAL_REGISTRY.get_or_try_init(Self::new).cloned()
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Current exposition in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Prometheus recorder shared between the provider handle and its meters.
#[derive(Clone)]
struct SharedRecorder {
    recorder: Arc<PrometheusRecorder>,
    closed: Arc<AtomicBool>,
}

impl SharedRecorder {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Recorder for SharedRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.recorder.describe_counter(key, unit, description)
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.recorder.describe_gauge(key, unit, description)
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.recorder.describe_histogram(key, unit, description)
    }

    fn register_counter(&self, key: &Key, metadata: &Metadata<'_>) -> Counter {
        if self.is_closed() {
            return Counter::noop();
        }
        self.recorder.register_counter(key, metadata)
    }

    fn register_gauge(&self, key: &Key, metadata: &Metadata<'_>) -> Gauge {
        if self.is_closed() {
            return Gauge::noop();
        }
        self.recorder.register_gauge(key, metadata)
    }

    fn register_histogram(&self, key: &Key, metadata: &Metadata<'_>) -> Histogram {
        if self.is_closed() {
            return Histogram::noop();
        }
        self.recorder.register_histogram(key, metadata)
    }
}

#[derive(Clone)]
enum MeterTarget {
    /// Whatever recorder the `metrics` facade resolves at call time.
    Global,
    Local(SharedRecorder),
}

/// Records counters, gauges and histograms.
#[derive(Clone)]
pub struct Meter {
    target: MeterTarget,
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match self.target {
            MeterTarget::Global => "global",
            MeterTarget::Local(_) => "local",
        };
        f.debug_struct("Meter").field("target", &target).finish()
    }
}

impl Meter {
    /// A meter that records into the process-wide `metrics` recorder,
    /// or nowhere when none is installed.
    pub fn global() -> Self {
        Self {
            target: MeterTarget::Global,
        }
    }

    pub fn increment_counter(&self, name: &'static str, labels: Vec<Label>, value: u64) {
        let key = Key::from_parts(name, labels);
        self.with_recorder(|recorder| recorder.register_counter(&key, &metadata()).increment(value));
    }

    pub fn record_histogram(&self, name: &'static str, labels: Vec<Label>, value: f64) {
        let key = Key::from_parts(name, labels);
        self.with_recorder(|recorder| recorder.register_histogram(&key, &metadata()).record(value));
    }

    pub fn set_gauge(&self, name: &'static str, labels: Vec<Label>, value: f64) {
        let key = Key::from_parts(name, labels);
        self.with_recorder(|recorder| recorder.register_gauge(&key, &metadata()).set(value));
    }

    fn with_recorder(&self, f: impl FnOnce(&dyn Recorder)) {
        match &self.target {
            MeterTarget::Global => metrics::with_recorder(f),
            MeterTarget::Local(shared) => f(shared),
        }
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::global()
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), metrics::Level::INFO, Some(module_path!()))
}

/// Records into a [`MetricsRegistry`] and, optionally, serves it on `/metrics`.
#[derive(Clone)]
pub struct PrometheusMetrics {
    recorder: SharedRecorder,
    handle: PrometheusHandle,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("closed", &self.recorder.is_closed())
            .finish_non_exhaustive()
    }
}

impl PrometheusMetrics {
    /// Binds to `config.registry` (the process-wide registry when unset)
    /// and, when `config.port` is set, spawns the listener on the current
    /// tokio runtime.
    pub fn new(config: &MetricsConfig) -> Result<Self, TelemetryError> {
        let registry = match &config.registry {
            Some(registry) => registry.clone(),
            None => MetricsRegistry::global()?,
        };

        let metrics = Self {
            recorder: SharedRecorder {
                recorder: registry.recorder,
                closed: Arc::new(AtomicBool::new(false)),
            },
            handle: registry.handle,
        };

        let mut target_labels = Vec::new();
        if !config.service_name.is_empty() {
            target_labels.push(Label::new("service_name", config.service_name.clone()));
        }
        metrics.meter().set_gauge(TARGET_INFO, target_labels, 1.0);

        if let Some(port) = config.port {
            metrics.spawn_listener(port);
        }

        Ok(metrics)
    }

    /// A meter recording into this provider's recorder.
    pub fn meter(&self) -> Meter {
        Meter {
            target: MeterTarget::Local(self.recorder.clone()),
        }
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Current exposition in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Makes this recorder the target of the `metrics` macros and of
    /// [`Meter::global`]. Fails if a global recorder is already set.
    pub fn install_global(&self) -> Result<(), TelemetryError> {
        metrics::set_global_recorder(self.recorder.clone())
            .map_err(|_| TelemetryError::GlobalRecorderInstalled)
    }

    /// Stops recording. Meters bound to this provider become no-ops.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        if self.recorder.closed.swap(true, Ordering::AcqRel) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        tracing::info!("metrics provider shut down");
        Ok(())
    }

    fn spawn_listener(&self, port: u16) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(port, "no tokio runtime, metrics listener not started");
                return;
            }
        };

        let state = ScrapeState {
            handle: self.handle.clone(),
            meter: self.meter(),
        };
        runtime.spawn(async move {
            if let Err(panic) = AssertUnwindSafe(serve_metrics(port, state)).catch_unwind().await {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(port, reason = %reason, "metrics listener panicked");
            }
        });
    }
}

#[derive(Clone)]
struct ScrapeState {
    handle: PrometheusHandle,
    meter: Meter,
}

async fn serve_metrics(port: u16, state: ScrapeState) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "metrics listener failed to bind");
            return;
        }
    };
    tracing::info!(address = %addr, "metrics listener starting");

    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(state);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(address = %addr, error = %e, "metrics listener stopped");
    }
}

async fn scrape(State(state): State<ScrapeState>) -> String {
    state
        .meter
        .increment_counter(SCRAPE_COUNTER, vec![Label::new("code", "200")], 1);
    state.handle.render()
}
