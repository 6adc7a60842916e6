//! Demo service wired with web-contrib telemetry.
//!
//! ```text
//! config.toml
//!     → Logger (rotating file or stdout)
//!     → OtlpTracer (OTLP/HTTP or stdout), optional
//!     → PrometheusMetrics (+ /metrics listener), optional
//!     → HttpServer (telemetry middleware around the demo routes)
//! ```

use std::path::PathBuf;
use std::time::Instant;

use axum::{routing::get, Extension, Json, Router};
use clap::Parser;
use opentelemetry::Context;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use web_contrib::config::{load_config, AppConfig};
use web_contrib::http::{HttpServer, Telemetry};
use web_contrib::log::{any, Logger, QueryLogLevel, QueryLogger};
use web_contrib::observability::{metrics::PrometheusMetrics, tracing::OtlpTracer};

#[derive(Parser)]
#[command(name = "web-contrib")]
#[command(about = "Demo HTTP service instrumented with logging, tracing and metrics", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "web_contrib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    tracing::info!(
        bind_address = %config.http.bind_address,
        service_name = %config.http.service_name,
        environment = %config.http.environment,
        log_kind = ?config.log_kind,
        "Configuration loaded"
    );

    let logger = Logger::new(Some(&config.log), config.log_kind);

    let tracer = match &config.trace {
        Some(trace) => {
            let tracer = OtlpTracer::from_config(trace)?;
            tracer.install_global();
            Some(tracer)
        }
        None => None,
    };

    let metrics = match &config.metrics {
        Some(metrics_config) => {
            let metrics = PrometheusMetrics::new(metrics_config)?;
            metrics.install_global()?;
            Some(metrics)
        }
        None => None,
    };

    let mut telemetry = Telemetry::new(
        config.http.service_name.clone(),
        config.http.environment.clone(),
        logger.clone(),
    );
    if let Some(tracer) = &tracer {
        telemetry = telemetry.with_tracer(tracer.boxed());
    }
    if let Some(metrics) = &metrics {
        telemetry = telemetry.with_meter(metrics.meter());
    }

    let queries = QueryLogger::new(logger.with_prefix("[orders]"), QueryLogLevel::Info);
    let routes = Router::new()
        .route("/orders", get(list_orders))
        .route("/health", get(|| async { "ok" }))
        .layer(Extension(queries));

    let listener = TcpListener::bind(&config.http.bind_address).await?;
    HttpServer::new(&config.http, telemetry, routes)
        .run(listener)
        .await?;

    if let Some(tracer) = tracer {
        tracer.shutdown()?;
    }
    if let Some(metrics) = metrics {
        metrics.shutdown()?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn list_orders(
    Extension(cx): Extension<Context>,
    Extension(queries): Extension<QueryLogger>,
) -> Json<Value> {
    let begin = Instant::now();
    queries.trace(
        &cx,
        begin,
        || ("SELECT id, status FROM orders LIMIT 20".to_string(), 0),
        None,
    );
    queries.info(&cx, "orders listed", &[&any("count", 0)]);
    Json(json!({ "ok": true }))
}
