//! End-to-end tests of the telemetry middleware through `HttpServer`.

mod common;

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::{get, post},
    Extension, Json, Router,
};
use opentelemetry::trace::SpanKind;
use opentelemetry::{Context, Value};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use serde_json::json;
use tower::ServiceExt;

use common::{field, Capture};
use web_contrib::config::{HttpConfig, MetricsConfig};
use web_contrib::observability::metrics::MetricsRegistry;
use web_contrib::http::{HttpServer, Telemetry};
use web_contrib::observability::{metrics::PrometheusMetrics, tracing::OtlpTracer};
use web_contrib::Logger;

struct Harness {
    router: Router,
    spans: InMemorySpanExporter,
    metrics: PrometheusMetrics,
    logs: Capture,
}

fn routes() -> Router {
    Router::new()
        .route(
            "/orders",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Json(json!({ "ok": true }))
            }),
        )
        .route("/orders/{id}", get(|| async { "one order" }))
        .route("/upload", post(|body: String| async move { body.len().to_string() }))
        .route(
            "/whoami",
            get(|Extension(cx): Extension<Context>| async move {
                web_contrib::context::trace_id(&cx)
            }),
        )
}

fn harness() -> Harness {
    harness_with(HttpConfig::default())
}

fn harness_with(config: HttpConfig) -> Harness {
    let spans = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(spans.clone())
        .build();
    let tracer = OtlpTracer::from_provider(provider);
    let metrics = PrometheusMetrics::new(&MetricsConfig {
        service_name: "orders-svc".to_string(),
        port: None,
        registry: Some(MetricsRegistry::new().unwrap()),
    })
    .unwrap();
    let logs = Capture::default();

    let telemetry = Telemetry::new("orders-svc", "test", Logger::from_writer(logs.clone(), true))
        .with_tracer(tracer.boxed())
        .with_meter(metrics.meter());
    let router = HttpServer::new(&config, telemetry, routes()).router();

    Harness {
        router,
        spans,
        metrics,
        logs,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn attr(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

fn only_span(spans: &InMemorySpanExporter) -> SpanData {
    let mut finished = spans.get_finished_spans().unwrap();
    assert_eq!(finished.len(), 1, "expected exactly one finished span");
    finished.remove(0)
}

fn metric_line<'a>(rendered: &'a str, prefix: &str, must_contain: &[&str]) -> Option<&'a str> {
    rendered
        .lines()
        .find(|line| line.starts_with(prefix) && must_contain.iter().all(|s| line.contains(s)))
}

#[tokio::test]
async fn test_orders_request_is_traced_logged_and_counted() {
    let h = harness();
    let request = Request::builder()
        .uri("/orders?id=5")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"id":5}"#))
        .unwrap();

    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"ok":true}"#);

    // One SERVER span named by the route.
    let span = only_span(&h.spans);
    assert_eq!(span.name, "/orders");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(attr(&span, "http.route"), Some(Value::from("/orders")));
    assert_eq!(attr(&span, "http.request.method"), Some(Value::from("GET")));
    assert_eq!(attr(&span, "http.params"), Some(Value::from("id=5")));
    assert_eq!(attr(&span, "http.request_body"), Some(Value::from(r#"{"id":5}"#)));
    assert_eq!(attr(&span, "deployment.environment"), Some(Value::from("test")));
    assert_eq!(attr(&span, "service.name"), Some(Value::from("orders-svc")));
    assert_eq!(attr(&span, "http.response.status_code"), Some(Value::I64(200)));
    assert_eq!(attr(&span, "http.response.body.size"), Some(Value::I64(11)));
    let trace_id = span.span_context.trace_id().to_string();
    assert_eq!(attr(&span, "trace_id"), Some(Value::from(trace_id.clone())));

    // Counter and histogram carry the same labels as the span.
    let rendered = h.metrics.render();
    let labels = [
        "service_name=\"orders-svc\"",
        "http_route=\"/orders\"",
        "http_request_method=\"GET\"",
        "deployment_environment=\"test\"",
        "http_response_status_code=\"200\"",
    ];
    let counter = metric_line(&rendered, "web_request{", &labels).expect("web_request sample");
    assert!(counter.ends_with(" 1"), "{counter}");

    let mut le_200 = labels.to_vec();
    le_200.push("le=\"200\"");
    let bucket = metric_line(&rendered, "web_histogram_bucket{", &le_200).expect("le=200 bucket");
    assert!(bucket.ends_with(" 1"), "{bucket}");

    let mut le_100 = labels.to_vec();
    le_100.push("le=\"100\"");
    let bucket = metric_line(&rendered, "web_histogram_bucket{", &le_100).expect("le=100 bucket");
    assert!(bucket.ends_with(" 0"), "{bucket}");

    // Request and response lines share the span's trace id.
    let request_lines = h.logs.lines_with("http.request");
    assert_eq!(request_lines.len(), 1);
    assert_eq!(field(&request_lines[0], "method"), Some("GET"));
    assert_eq!(field(&request_lines[0], "path"), Some("/orders"));
    assert_eq!(field(&request_lines[0], "params"), Some("id=5"));
    assert!(request_lines[0].contains(r#" body={"id":5} body_size=8 "#));
    assert_eq!(
        field(&request_lines[0], "header"),
        Some(r#"{"content-type":["application/json"]}"#)
    );
    assert_eq!(field(&request_lines[0], "trace_id"), Some(trace_id.as_str()));

    let response_lines = h.logs.lines_with("http.response");
    assert_eq!(response_lines.len(), 1);
    assert_eq!(field(&response_lines[0], "body"), Some(r#"{"ok":true}"#));
    assert_eq!(field(&response_lines[0], "status"), Some("200"));
    assert_eq!(field(&response_lines[0], "response_content_length"), Some("11"));
    assert_eq!(field(&response_lines[0], "trace_id"), Some(trace_id.as_str()));
}

#[tokio::test]
async fn test_route_template_names_span() {
    let h = harness();

    let (status, _) = send(&h.router, get_request("/orders/42")).await;
    assert_eq!(status, StatusCode::OK);

    let span = only_span(&h.spans);
    assert_eq!(span.name, "/orders/{id}");
    assert!(metric_line(&h.metrics.render(), "web_request{", &["http_route=\"/orders/{id}\""]).is_some());
}

#[tokio::test]
async fn test_upstream_traceparent_is_continued() {
    let h = harness();
    let request = Request::builder()
        .uri("/orders/7")
        .header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .body(Body::empty())
        .unwrap();

    send(&h.router, request).await;

    let span = only_span(&h.spans);
    assert_eq!(
        span.span_context.trace_id().to_string(),
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
    assert_eq!(span.parent_span_id.to_string(), "00f067aa0ba902b7");
}

#[tokio::test]
async fn test_handler_sees_span_context() {
    let h = harness();

    let (_, body) = send(&h.router, get_request("/whoami")).await;

    let span = only_span(&h.spans);
    assert_eq!(body, span.span_context.trace_id().to_string());
}

#[tokio::test]
async fn test_binary_upload_body_not_logged() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, "12")
        .body(Body::from("secret-bytes"))
        .unwrap();

    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);
    // The handler still receives the buffered body.
    assert_eq!(body, "12");

    let request_line = &h.logs.lines_with("http.request")[0];
    assert!(!request_line.contains("secret-bytes"));
    assert_eq!(field(request_line, "body_size"), Some("0"));

    let span = only_span(&h.spans);
    assert_eq!(attr(&span, "http.request_body_size"), Some(Value::from("12")));
}

#[tokio::test]
async fn test_unmatched_path_uses_raw_path() {
    let h = harness();

    let (status, _) = send(&h.router, get_request("/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let span = only_span(&h.spans);
    assert_eq!(span.name, "/missing");
    assert_eq!(attr(&span, "http.response.status_code"), Some(Value::I64(404)));
}

#[tokio::test]
async fn test_forwarded_client_ip_is_recorded() {
    let h = harness();
    let request = Request::builder()
        .uri("/orders/1")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::empty())
        .unwrap();

    send(&h.router, request).await;

    let span = only_span(&h.spans);
    assert_eq!(attr(&span, "http.client_ip"), Some(Value::from("203.0.113.7")));
    let request_line = &h.logs.lines_with("http.request")[0];
    assert_eq!(field(request_line, "client_ip"), Some("203.0.113.7"));
}

#[tokio::test]
async fn test_fallback_trace_id_without_tracer() {
    let logs = Capture::default();
    let metrics = PrometheusMetrics::new(&MetricsConfig::default()).unwrap();
    // No tracer given and none installed globally: spans are no-ops.
    let telemetry = Telemetry::new("orders-svc", "test", Logger::from_writer(logs.clone(), true))
        .with_meter(metrics.meter());
    let router = HttpServer::new(&HttpConfig::default(), telemetry, routes()).router();

    let (_, body) = send(&router, get_request("/whoami")).await;

    assert_eq!(body.len(), 32);
    assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
    let request_line = &logs.lines_with("http.request")[0];
    assert_eq!(field(request_line, "trace_id"), Some(body.as_str()));
    assert!(metric_line(&metrics.render(), "web_request{", &["http_route=\"/whoami\""]).is_some());
}

#[tokio::test]
async fn test_unreadable_body_is_rejected() {
    let h = harness();
    let stream = futures_util::stream::once(async {
        Err::<axum::body::Bytes, std::io::Error>(std::io::Error::other("connection reset"))
    });
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from_stream(stream))
        .unwrap();

    let (status, _) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.logs.contents().contains("[Logger Middleware] error="));
    assert!(h.logs.contents().contains("connection reset"));
    assert!(h.spans.get_finished_spans().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let h = harness_with(HttpConfig {
        max_body_bytes: 16,
        ..HttpConfig::default()
    });
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from("x".repeat(64)))
        .unwrap();

    let (status, _) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h
        .logs
        .contents()
        .contains(r#"[Logger Middleware] error="length limit exceeded""#));
    assert!(h.logs.lines_with("http.request").is_empty());
    assert!(h.spans.get_finished_spans().unwrap().is_empty());
}

#[tokio::test]
async fn test_body_at_limit_is_accepted() {
    let h = harness_with(HttpConfig {
        max_body_bytes: 16,
        ..HttpConfig::default()
    });
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from("x".repeat(16)))
        .unwrap();

    let (status, body) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "16");
}
