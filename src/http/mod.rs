//! HTTP instrumentation.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout, graceful shutdown)
//!     → middleware/telemetry.rs (span, request log, body wrapper)
//!     → application routes
//!     → middleware/telemetry.rs (response log, counter, histogram, span end)
//!     → Send to client
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{telemetry_trace, Telemetry};
pub use server::HttpServer;
