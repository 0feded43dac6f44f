//! aitrail — tamper-evident audit proxy for LLM APIs.
//!
//! Sits transparently between clients and configured upstream providers,
//! forwards every exchange unchanged, and journals each one as a line in
//! a SHA-256 hash chain that `aitrail-verify` can replay offline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::routing::any;
use axum::Router;

pub mod audit;
pub mod cli;
pub mod config;
pub mod errors;
pub mod media;
pub mod models;
pub mod proxy;
pub mod trace;

/// Shared application state passed to the proxy handler.
pub struct AppState {
    pub config: config::Config,
    pub audit: audit::AuditHandle,
    pub extractor: media::MediaExtractor,
    pub upstream: proxy::upstream::UpstreamClient,
    next_sequence_id: AtomicU64,
}

impl AppState {
    pub fn new(config: config::Config, audit: audit::AuditHandle) -> Self {
        let extractor = media::MediaExtractor::new(
            config.media.enable_extraction,
            config.media.min_size_kb,
            config.media.storage_path.clone(),
        );
        Self {
            config,
            audit,
            extractor,
            upstream: proxy::upstream::UpstreamClient::new(),
            next_sequence_id: AtomicU64::new(0),
        }
    }

    /// Reserve the next chain slot. Strictly increasing from 0, assigned
    /// at request arrival.
    pub fn next_sequence_id(&self) -> u64 {
        self.next_sequence_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Build the proxy router: every method on every path funnels into the
/// proxy handler; panics inside the dispatch scope become plain 500s.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(any(proxy::handler::proxy_handler))
        .with_state(state)
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Injects a unique X-Request-Id into every response so clients can
/// correlate errors with proxy logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
