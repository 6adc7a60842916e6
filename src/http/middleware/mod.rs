//! HTTP middleware.

pub mod telemetry;

pub use telemetry::{telemetry_trace, ResponseBody, Telemetry};
