//! Per-request orchestration.
//!
//! The handler forwards bytes unchanged in both directions and, on the
//! side, assembles one audit entry per exchange. Regular responses are
//! assembled inline; streaming responses hand assembly to a monitor task
//! that fires once the stream terminates, however it terminates.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use chrono::{DateTime, Utc};

use crate::audit::AuditHandle;
use crate::errors::AppError;
use crate::media::{BodyOrigin, MediaExtractor};
use crate::models::{AuditEntry, RequestDetails, ResponseDetails, TraceContext};
use crate::proxy::capture::{
    decompress_body, CaptureBuffer, StreamCapture, StreamOutcome, StreamTee,
};
use crate::proxy::reconstruct::reconstruct_stream;
use crate::proxy::sanitize;
use crate::trace::{detector, session};
use crate::AppState;

/// Everything the entry assembler needs about one exchange, captured
/// before the response body is (fully) available.
struct ExchangeContext {
    timestamp: DateTime<Utc>,
    start: Instant,
    endpoint: String,
    method: String,
    path: String,
    request_headers: HeaderMap,
    request_body: Bytes,
    sequence_id: u64,
    trace: TraceContext,
    is_streaming: bool,
    status: u16,
    response_headers: HeaderMap,
}

/// The main handler for all proxied requests.
#[tracing::instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let timestamp = Utc::now();
    let start = Instant::now();

    // -- 1. Route on the first path segment --
    let (endpoint_name, actual_path) =
        parse_endpoint(uri.path()).ok_or(AppError::MissingEndpoint)?;

    let endpoint = state
        .config
        .endpoint(endpoint_name)
        .ok_or_else(|| AppError::UnknownEndpoint(endpoint_name.to_string()))?;

    let target: reqwest::Url = endpoint
        .target
        .parse()
        .map_err(|_| AppError::InvalidTarget(endpoint_name.to_string()))?;

    // -- 2. Detect streaming mode from the request --
    let is_streaming = wants_event_stream(&headers)
        && state.config.streaming.enable_sequence_tracking;

    // -- 3. Reserve the chain slot at arrival --
    let sequence_id = state.next_sequence_id();
    let trace = crate::trace::extract_trace_context(&headers);

    // -- 4. Forward upstream --
    let mut url = target.clone();
    url.set_path(&single_joining_slash(target.path(), &actual_path));
    url.set_query(uri.query());

    let upstream_resp = match state
        .upstream
        .forward(
            method.clone(),
            url,
            forwardable_headers(&headers),
            body.clone(),
        )
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            // Transport failures are still witnessed exchanges: journal
            // them with the synthetic status the client will see.
            let status = if e.is_timeout() { 504 } else { 502 };
            tracing::error!(endpoint = endpoint_name, seq = sequence_id, "upstream request failed: {e}");
            let ctx = ExchangeContext {
                timestamp,
                start,
                endpoint: endpoint_name.to_string(),
                method: method.to_string(),
                path: actual_path,
                request_headers: headers,
                request_body: body,
                sequence_id,
                trace,
                is_streaming,
                status,
                response_headers: HeaderMap::new(),
            };
            let entry = assemble_entry(
                ctx,
                CaptureBuffer::new(state.config.streaming.max_audit_body_size),
                String::new(),
                true,
                &state.extractor,
            );
            state.audit.log(entry).await;

            return Err(if status == 504 {
                AppError::UpstreamTimeout(e.to_string())
            } else {
                AppError::Upstream(e.to_string())
            });
        }
    };

    let status = upstream_resp.status().as_u16();
    let response_headers = upstream_resp.headers().clone();

    let ctx = ExchangeContext {
        timestamp,
        start,
        endpoint: endpoint_name.to_string(),
        method: method.to_string(),
        path: actual_path,
        request_headers: headers,
        request_body: body,
        sequence_id,
        trace,
        is_streaming,
        status,
        response_headers: response_headers.clone(),
    };

    // -- 5. Capture and respond --
    if is_streaming {
        stream_response(state, ctx, upstream_resp).await
    } else {
        buffered_response(state, ctx, upstream_resp).await
    }
}

/// Regular path: buffer the whole upstream body, assemble inline, then
/// relay the unmodified bytes to the client.
async fn buffered_response(
    state: Arc<AppState>,
    ctx: ExchangeContext,
    upstream_resp: reqwest::Response,
) -> Result<Response, AppError> {
    let max_size = state.config.streaming.max_audit_body_size;
    let status = ctx.status;
    let response_headers = ctx.response_headers.clone();

    let body_bytes = match upstream_resp.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(seq = ctx.sequence_id, "upstream body read failed: {e}");
            let detail = e.to_string();
            let entry = assemble_entry(
                ctx,
                CaptureBuffer::new(max_size),
                format!("WRITE_ERROR: {detail}"),
                false,
                &state.extractor,
            );
            state.audit.log(entry).await;
            return Err(AppError::Upstream(detail));
        }
    };

    let mut buffer = CaptureBuffer::new(max_size);
    buffer.write(&body_bytes);

    let entry = assemble_entry(ctx, buffer, String::new(), true, &state.extractor);
    state.audit.log(entry).await;

    client_response(status, &response_headers, Body::from(body_bytes))
}

/// Streaming path: tee the upstream byte stream to the client while the
/// monitor task waits for termination and finalizes the entry exactly
/// once.
async fn stream_response(
    state: Arc<AppState>,
    ctx: ExchangeContext,
    upstream_resp: reqwest::Response,
) -> Result<Response, AppError> {
    let status = ctx.status;
    let response_headers = ctx.response_headers.clone();

    let (capture, outcome_rx) =
        StreamCapture::new(state.config.streaming.max_audit_body_size);
    let tee = StreamTee::new(Box::pin(upstream_resp.bytes_stream()), capture.clone());

    let stream_timeout = Duration::from_secs(state.config.streaming.stream_timeout);
    let audit = state.audit.clone();
    let extractor = state.extractor.clone();
    tokio::spawn(monitor_stream(
        capture,
        outcome_rx,
        stream_timeout,
        ctx,
        extractor,
        audit,
    ));

    client_response(status, &response_headers, Body::from_stream(tee))
}

/// Waits for the capture to terminate (or the deadline to pass) and
/// assembles the deferred entry. Assembly faults are contained: the
/// journal still receives an entry tagged MONITORING_PANIC.
async fn monitor_stream(
    capture: Arc<StreamCapture>,
    outcome_rx: tokio::sync::oneshot::Receiver<StreamOutcome>,
    stream_timeout: Duration,
    ctx: ExchangeContext,
    extractor: MediaExtractor,
    audit: AuditHandle,
) {
    let outcome = tokio::select! {
        res = outcome_rx => res.unwrap_or_else(|_| {
            StreamOutcome::ContextError("completion signal dropped".into())
        }),
        _ = tokio::time::sleep(stream_timeout) => {
            capture.mark_done();
            StreamOutcome::Timeout
        }
    };

    let buffer = capture.take_buffer();
    let (error, is_complete) = outcome.into_entry_fields();

    let fallback = (
        ctx.timestamp,
        ctx.endpoint.clone(),
        ctx.sequence_id,
        ctx.method.clone(),
        ctx.path.clone(),
        ctx.status,
    );

    let entry = match std::panic::catch_unwind(AssertUnwindSafe(|| {
        assemble_entry(ctx, buffer, error, is_complete, &extractor)
    })) {
        Ok(entry) => entry,
        Err(_) => {
            let (timestamp, endpoint, sequence_id, method, path, status) = fallback;
            tracing::error!(seq = sequence_id, %endpoint, "panic in stream finalization");
            AuditEntry {
                timestamp,
                endpoint,
                sequence_id,
                request: RequestDetails {
                    method,
                    path,
                    ..Default::default()
                },
                response: ResponseDetails {
                    status_code: status,
                    is_streaming: true,
                    is_complete: false,
                    error: "MONITORING_PANIC".into(),
                    ..Default::default()
                },
                trace: None,
                prev_hash: String::new(),
                hash: String::new(),
            }
        }
    };

    audit.log(entry).await;
}

/// Post-process the captured exchange into its journal entry:
/// decompress, reconstruct SSE, extract media, classify the span,
/// sanitize headers.
fn assemble_entry(
    ctx: ExchangeContext,
    buffer: CaptureBuffer,
    error: String,
    is_complete: bool,
    extractor: &MediaExtractor,
) -> AuditEntry {
    let content_encoding = header_str(&ctx.response_headers, "content-encoding");
    let content_type = header_str(&ctx.response_headers, "content-type");

    let decompressed = decompress_body(buffer.raw(), content_encoding.as_deref());
    let body_was_decompressed = decompressed.is_some();
    let mut response_body = match decompressed {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => buffer.body(),
    };

    let mut is_streaming = ctx.is_streaming;
    let mut streaming_metadata = None;
    let response_is_sse = content_type
        .as_deref()
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);
    if is_streaming || response_is_sse {
        if let Some((reconstructed, metadata)) = reconstruct_stream(&response_body, ctx.start) {
            response_body = reconstructed;
            streaming_metadata = Some(metadata);
            is_streaming = true;
        }
    }

    let response_content_length = response_body.len() as u64;
    let request_body = String::from_utf8_lossy(&ctx.request_body).into_owned();

    let (journal_request_body, request_media) =
        extractor.extract(&request_body, ctx.sequence_id, BodyOrigin::Request);
    let (journal_response_body, response_media) =
        extractor.extract(&response_body, ctx.sequence_id, BodyOrigin::Response);

    // Classification sees the original bodies, before placeholder
    // substitution.
    let mut trace = ctx.trace;
    detector::enrich(&mut trace, &request_body, &response_body);
    if let Some(meta) = session::extract_conversation_metadata(&request_body) {
        if !meta.conversation_id.is_empty() {
            trace
                .attributes
                .insert("conversation_id".into(), meta.conversation_id.clone());
        }
        trace
            .attributes
            .insert("message_count".into(), meta.message_count.to_string());
        trace.attributes.insert(
            "multi_turn".into(),
            (meta.has_assistant || meta.has_tool_messages || meta.message_count > 2).to_string(),
        );
    }

    AuditEntry {
        timestamp: ctx.timestamp,
        endpoint: ctx.endpoint,
        sequence_id: ctx.sequence_id,
        request: RequestDetails {
            method: ctx.method,
            path: ctx.path,
            headers: sanitize::sanitize_headers(&ctx.request_headers),
            body: journal_request_body,
            content_length: ctx.request_body.len() as u64,
            media_references: request_media,
        },
        response: ResponseDetails {
            status_code: ctx.status,
            headers: sanitize::sanitize_response_headers(
                &ctx.response_headers,
                body_was_decompressed,
            ),
            body: journal_response_body,
            content_length: response_content_length,
            duration_ms: ctx.start.elapsed().as_millis() as u64,
            is_streaming,
            error,
            is_complete,
            truncated: buffer.truncated(),
            truncated_at_bytes: buffer.truncated().then(|| buffer.total_size()),
            media_references: response_media,
            streaming_metadata,
        },
        trace: Some(trace),
        prev_hash: String::new(),
        hash: String::new(),
    }
}

/// "/openai/v1/chat" -> ("openai", "/v1/chat"); "/openai" -> ("openai", "/").
fn parse_endpoint(path: &str) -> Option<(&str, String)> {
    let path = path.trim_start_matches('/');
    let (name, rest) = match path.split_once('/') {
        Some((name, rest)) => (name, format!("/{rest}")),
        None => (path, "/".to_string()),
    };
    if name.is_empty() {
        return None;
    }
    Some((name, rest))
}

/// Join two URL path segments with exactly one slash between them.
fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    ["accept", "content-type"].iter().any(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false)
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// Headers passed to the upstream: everything except the ones the HTTP
/// client owns.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in ["host", "content-length", "connection", "transfer-encoding"] {
        out.remove(name);
    }
    out
}

/// Relay status and headers from the upstream response, letting the
/// server recompute framing headers.
fn client_response(
    status: u16,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let status =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::builder().status(status);
    for (name, value) in headers {
        if matches!(name.as_str(), "content-length" | "transfer-encoding") {
            continue;
        }
        response = response.header(name, value);
    }
    response
        .body(body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response build failed: {e}")))
}
