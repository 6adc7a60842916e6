//! Trace id resolution for log correlation.
//!
//! A log line's `trace_id` comes from, in order:
//! 1. the active span on the context, when its span context is valid
//! 2. a [`TraceContext`] value stored on the context
//! 3. the empty string

use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;

/// Trace id carried on a context without a live span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
}

/// Returns a copy of `cx` carrying `trace_id` as a fallback correlation id.
pub fn with_trace_id(cx: &Context, trace_id: impl Into<String>) -> Context {
    cx.with_value(TraceContext {
        trace_id: trace_id.into(),
    })
}

/// Resolves the trace id to attach to a log line.
pub fn trace_id(cx: &Context) -> String {
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        return span_context.trace_id().to_string();
    }

    cx.get::<TraceContext>()
        .map(|t| t.trace_id.clone())
        .unwrap_or_default()
}
