//! Request telemetry middleware.
//!
//! # Responsibilities
//! - Continue upstream traces (W3C and B3 headers) with a SERVER span
//! - Log every request, and every response data frame, with its `trace_id`
//! - Count requests and record latency once the response body is done
//!
//! # Design Decisions
//! - The request body is buffered, up to a limit, so it can be logged,
//!   then handed on
//! - The span-bearing `opentelemetry::Context` is put in the request
//!   extensions for handlers to log with
//! - The span ends when the response body finishes or is dropped

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode, Version},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use metrics::Label;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::{SpanBuilder, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::context;
use crate::log::{any, Logger};
use crate::observability::metrics::{Meter, LATENCY_HISTOGRAM, REQUEST_COUNTER};
use crate::observability::tracing::{extract_context, propagator, DEFAULT_TRACER_NAME};
use crate::utils::{IdGenerator, TRACE_ID_GENERATOR};

pub const ATTR_PARAMS: &str = "http.params";
pub const ATTR_REQUEST_BODY: &str = "http.request_body";
pub const ATTR_REQUEST_BODY_SIZE: &str = "http.request_body_size";
pub const ATTR_CLIENT_IP: &str = "http.client_ip";
pub const ATTR_TRACE_ID: &str = "trace_id";

const NETWORK_PROTOCOL_VERSION: &str = "network.protocol.version";
const HTTP_ROUTE: &str = "http.route";
const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
const HTTP_REQUEST_METHOD: &str = "http.request.method";
const SERVICE_NAME: &str = "service.name";
const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
const HTTP_RESPONSE_BODY_SIZE: &str = "http.response.body.size";

/// Content types whose request bodies are never logged.
const UNLOGGED_CONTENT_TYPES: [&str; 2] = ["multipart/form-data", "application/octet-stream"];

/// Shared state of the telemetry middleware.
pub struct Telemetry {
    service_name: String,
    environment: String,
    logger: Logger,
    tracer: BoxedTracer,
    meter: Meter,
    propagator: TextMapCompositePropagator,
    max_body_bytes: usize,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("service_name", &self.service_name)
            .field("environment", &self.environment)
            .field("meter", &self.meter)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    /// Uses the global tracer and metrics recorder until overridden.
    pub fn new(service_name: impl Into<String>, environment: impl Into<String>, logger: Logger) -> Self {
        Self {
            service_name: service_name.into(),
            environment: environment.into(),
            logger,
            tracer: global::tracer(DEFAULT_TRACER_NAME),
            meter: Meter::global(),
            propagator: propagator(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = meter;
        self
    }

    /// Requests whose body exceeds `max` bytes are answered with 413.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Instruments one request/response cycle.
///
/// Mount with `axum::middleware::from_fn_with_state(Arc<Telemetry>, telemetry_trace)`
/// through `Router::layer` so the matched route is known.
pub async fn telemetry_trace(
    State(telemetry): State<Arc<Telemetry>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let body = match Limited::new(body, telemetry.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            telemetry
                .logger
                .error_with_ctx(&Context::new(), "[Logger Middleware]", [any("error", e.to_string())]);
            let status = if e.is::<LengthLimitError>() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            return status.into_response();
        }
    };

    let parent = extract_context(&telemetry.propagator, &parts.headers);
    let path = parts.uri.path().to_string();
    let route = parts
        .extensions
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let method = parts.method.to_string();
    let params = parts.uri.query().unwrap_or_default().to_string();
    let client_ip = client_ip(&parts);

    let builder = SpanBuilder::from_name(route.clone()).with_kind(SpanKind::Server);
    let span = telemetry.tracer.build_with_context(builder, &parent);
    let mut cx = parent.with_span(span);
    if !cx.span().span_context().is_valid() {
        cx = context::with_trace_id(&cx, TRACE_ID_GENERATOR.new_id());
    }

    cx.span().set_attributes([
        KeyValue::new(NETWORK_PROTOCOL_VERSION, protocol_version(parts.version)),
        KeyValue::new(HTTP_ROUTE, route.clone()),
        KeyValue::new(DEPLOYMENT_ENVIRONMENT, telemetry.environment.clone()),
        KeyValue::new(HTTP_REQUEST_METHOD, method.clone()),
        KeyValue::new(SERVICE_NAME, telemetry.service_name.clone()),
        KeyValue::new(ATTR_PARAMS, params.clone()),
        KeyValue::new(ATTR_REQUEST_BODY, String::from_utf8_lossy(&body).into_owned()),
        KeyValue::new(ATTR_REQUEST_BODY_SIZE, header_str(&parts.headers, header::CONTENT_LENGTH).to_string()),
        KeyValue::new(ATTR_CLIENT_IP, client_ip.clone()),
        KeyValue::new(ATTR_TRACE_ID, context::trace_id(&cx)),
    ]);

    let start = Instant::now();
    log_request(&telemetry.logger, &cx, &parts, &body, &client_ip, &params);

    parts.extensions.insert(cx.clone());
    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (parts, body) = response.into_parts();
    let inflight = Inflight {
        telemetry,
        cx,
        start,
        path,
        route,
        method,
        status: parts.status,
        body_size: 0,
    };
    Response::from_parts(
        parts,
        Body::new(ResponseBody {
            inner: body,
            inflight: Some(inflight),
        }),
    )
}

fn log_request(logger: &Logger, cx: &Context, parts: &Parts, body: &Bytes, client_ip: &str, params: &str) {
    let body = if body_is_logged(&parts.headers) {
        String::from_utf8_lossy(body).into_owned()
    } else {
        String::new()
    };
    let body_size = body.len();

    logger.info_with_ctx(
        cx,
        "http.request",
        [
            any("client_ip", client_ip),
            any("method", parts.method.as_str()),
            any("path", parts.uri.path()),
            any("params", params),
            any("header", header_values(&parts.headers)),
            any("body", body),
            any("body_size", body_size),
            any("time", chrono::Local::now().to_rfc3339()),
        ],
    );
}

/// False when `Content-Type` is exactly one of the binary upload types.
fn body_is_logged(headers: &HeaderMap) -> bool {
    let content_type = header_str(headers, header::CONTENT_TYPE);
    !UNLOGGED_CONTENT_TYPES.contains(&content_type)
}

/// First `X-Forwarded-For` entry, then `X-Real-Ip`, then the socket peer.
fn client_ip(parts: &Parts) -> String {
    let forwarded = header_str(&parts.headers, "x-forwarded-for")
        .split(',')
        .next()
        .unwrap_or_default()
        .trim();
    if !forwarded.is_empty() {
        return forwarded.to_string();
    }

    let real_ip = header_str(&parts.headers, "x-real-ip").trim();
    if !real_ip.is_empty() {
        return real_ip.to_string();
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn header_values(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        values
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    values
}

fn protocol_version(version: Version) -> String {
    format!("{:?}", version)
}

/// Response body that logs each data frame and finishes the request's
/// telemetry when it ends.
pub struct ResponseBody {
    inner: Body,
    inflight: Option<Inflight>,
}

impl http_body::Body for ResponseBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(inflight)) = (frame.data_ref(), this.inflight.as_mut()) {
                    inflight.on_data(data);
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                this.inflight.take();
            }
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Per-request record carried by [`ResponseBody`]. Dropping it finishes
/// the span and records the metrics, so it happens exactly once.
struct Inflight {
    telemetry: Arc<Telemetry>,
    cx: Context,
    start: Instant,
    path: String,
    route: String,
    method: String,
    status: StatusCode,
    body_size: usize,
}

impl Inflight {
    fn on_data(&mut self, data: &Bytes) {
        self.body_size += data.len();
        self.telemetry.logger.info_with_ctx(
            &self.cx,
            "http.response",
            [
                any("path", self.path.as_str()),
                any("body", String::from_utf8_lossy(data)),
                any("status", self.status.as_u16()),
                any("response_content_length", data.len()),
                any("latency", format!("{:?}", self.start.elapsed())),
            ],
        );
    }

    fn labels(&self) -> Vec<Label> {
        vec![
            Label::new(SERVICE_NAME, self.telemetry.service_name.clone()),
            Label::new(HTTP_ROUTE, self.route.clone()),
            Label::new(HTTP_REQUEST_METHOD, self.method.clone()),
            Label::new(DEPLOYMENT_ENVIRONMENT, self.telemetry.environment.clone()),
            Label::new(HTTP_RESPONSE_STATUS_CODE, self.status.as_u16().to_string()),
        ]
    }
}

impl Drop for Inflight {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_millis() as f64;

        let span = self.cx.span();
        span.set_attributes([
            KeyValue::new(HTTP_RESPONSE_BODY_SIZE, self.body_size as i64),
            KeyValue::new(SERVICE_NAME, self.telemetry.service_name.clone()),
            KeyValue::new(HTTP_ROUTE, self.route.clone()),
            KeyValue::new(HTTP_REQUEST_METHOD, self.method.clone()),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT, self.telemetry.environment.clone()),
            KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(self.status.as_u16())),
        ]);

        let meter = &self.telemetry.meter;
        meter.increment_counter(REQUEST_COUNTER, self.labels(), 1);
        meter.record_histogram(LATENCY_HISTOGRAM, self.labels(), latency_ms);

        span.end();
    }
}
