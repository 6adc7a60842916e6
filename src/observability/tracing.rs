//! Tracer provider and context propagation.
//!
//! # Responsibilities
//! - Build an OTLP/HTTP (protobuf, gzip) or stdout span exporter
//! - Own the SDK provider and the `"default"` tracer
//! - Extract upstream context from W3C `traceparent` and B3 headers
//!
//! # Design Decisions
//! - Batch span processor; export failures are handled inside the SDK
//! - Root spans sampled by trace id ratio, children follow their parent
//! - Nothing is installed globally until `install_global()`

use std::ops::Deref;

use axum::http::HeaderMap;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::{Extractor, TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::Context;
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_zipkin::{B3Encoding, Propagator as B3Propagator};

use crate::config::{TraceConfig, TraceExporterKind};
use crate::observability::TelemetryError;

/// Name of the tracer handed out by [`OtlpTracer`] and looked up from the
/// global provider by the middleware.
pub const DEFAULT_TRACER_NAME: &str = "default";

/// Owns a tracer provider and its `"default"` tracer.
///
/// Derefs to the tracer, so spans can be started directly on the handle.
#[derive(Debug, Clone)]
pub struct OtlpTracer {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl OtlpTracer {
    /// Exports over OTLP/HTTP to `config.endpoint_url`.
    pub fn new(config: &TraceConfig) -> Result<Self, TelemetryError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(config.endpoint_url.clone())
            .with_protocol(Protocol::HttpBinary)
            .with_compression(Compression::Gzip)
            .build()?;

        tracing::info!(
            endpoint = %config.endpoint_url,
            sampler_rate = config.sampler_rate,
            "OTLP tracer configured"
        );
        Ok(Self::with_exporter(config, exporter))
    }

    /// Pretty-prints finished spans to standard output.
    pub fn stdout(config: &TraceConfig) -> Self {
        Self::with_exporter(config, opentelemetry_stdout::SpanExporter::default())
    }

    /// Builds from config, picking the exporter named by `config.exporter`.
    pub fn from_config(config: &TraceConfig) -> Result<Self, TelemetryError> {
        match config.exporter {
            TraceExporterKind::Otlp => Self::new(config),
            TraceExporterKind::Stdout => Ok(Self::stdout(config)),
        }
    }

    fn with_exporter<E>(config: &TraceConfig, exporter: E) -> Self
    where
        E: SpanExporter + 'static,
    {
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(config.service_name.clone())
                    .build(),
            )
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                config.sampler_rate,
            ))))
            .build();

        Self::from_provider(provider)
    }

    /// Wraps an already built provider, e.g. one with an in-memory exporter.
    pub fn from_provider(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(DEFAULT_TRACER_NAME);
        Self { provider, tracer }
    }

    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// A type-erased copy of the tracer, as the middleware stores it.
    pub fn boxed(&self) -> BoxedTracer {
        BoxedTracer::new(Box::new(self.tracer.clone()))
    }

    /// Registers the provider and the composite propagator process-wide.
    pub fn install_global(&self) {
        global::set_tracer_provider(self.provider.clone());
        global::set_text_map_propagator(propagator());
    }

    /// Flushes pending spans and releases the exporter.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider.shutdown()?;
        Ok(())
    }
}

impl Deref for OtlpTracer {
    type Target = SdkTracer;

    fn deref(&self) -> &Self::Target {
        &self.tracer
    }
}

/// W3C trace-context plus B3 in both single and multi header forms.
pub fn propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(B3Propagator::with_encoding(B3Encoding::SingleAndMultiHeader)),
    ])
}

/// Reads propagation fields out of request headers.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Upstream context carried by `headers`, or an empty context.
pub fn extract_context(propagator: &dyn TextMapPropagator, headers: &HeaderMap) -> Context {
    propagator.extract(&HeaderExtractor(headers))
}
