//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap application routes with the telemetry middleware and a timeout
//! - Bind server to listener with peer addresses for client IP fallback
//! - Graceful shutdown on Ctrl+C

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::config::HttpConfig;
use crate::http::middleware::{telemetry_trace, Telemetry};

/// HTTP server serving instrumented application routes.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Instrument `routes` with `telemetry`, the configured body limit and
    /// the configured timeout.
    pub fn new(config: &HttpConfig, telemetry: Telemetry, routes: Router) -> Self {
        let telemetry = telemetry.with_max_body_bytes(config.max_body_bytes);
        let router = Self::build_router(config, Arc::new(telemetry), routes);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The telemetry layer is outermost so timeouts are recorded too.
    #[allow(deprecated)]
    fn build_router(config: &HttpConfig, telemetry: Arc<Telemetry>, routes: Router) -> Router {
        routes
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(middleware::from_fn_with_state(telemetry, telemetry_trace))
    }

    /// The instrumented router, e.g. for `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until Ctrl+C.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.run_with_shutdown(listener, shutdown_signal()).await
    }

    /// Run the server until `signal` completes.
    pub async fn run_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
