//! Trace context plumbing.
//!
//! Every exchange gets a trace/span identity: honored from the client's
//! `X-Trace-ID` / `X-Span-ID` / `X-Parent-Span-ID` headers when present,
//! generated otherwise so tracing stays transparent to callers that
//! don't participate.

pub mod detector;
pub mod session;

use axum::http::HeaderMap;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::models::TraceContext;

/// Build the trace context for an inbound request. Span type and tool
/// fields are filled in later, once the response body is available.
pub fn extract_trace_context(headers: &HeaderMap) -> TraceContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    let mut trace_id = header("x-trace-id");
    if trace_id.is_empty() {
        trace_id = generate_trace_id();
    }
    let mut span_id = header("x-span-id");
    if span_id.is_empty() {
        span_id = generate_span_id();
    }

    TraceContext {
        trace_id,
        span_id,
        parent_span_id: header("x-parent-span-id"),
        ..Default::default()
    }
}

/// 128-bit lowercase-hex trace identifier (OpenTelemetry shape).
fn generate_trace_id() -> String {
    let mut bytes = [0u8; 16];
    if OsRng.try_fill_bytes(&mut bytes).is_err() {
        tracing::warn!("random trace id generation failed, using timestamp fallback");
        return format!("{:032x}", Utc::now().timestamp_nanos_opt().unwrap_or(0).unsigned_abs());
    }
    hex::encode(bytes)
}

/// 64-bit lowercase-hex span identifier.
fn generate_span_id() -> String {
    let mut bytes = [0u8; 8];
    if OsRng.try_fill_bytes(&mut bytes).is_err() {
        tracing::warn!("random span id generation failed, using timestamp fallback");
        return format!("{:016x}", Utc::now().timestamp_nanos_opt().unwrap_or(0).unsigned_abs());
    }
    hex::encode(bytes)
}
