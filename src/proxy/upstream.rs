use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use reqwest::Client;

/// Pooled HTTP client for upstream forwarding.
///
/// No overall request timeout: streaming responses may legitimately run
/// for minutes and are bounded by the stream monitor instead. Connection
/// establishment is still capped.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        Self { client }
    }

    /// Forward a request and return the raw response without consuming
    /// the body, so the caller can either buffer it or pipe it to the
    /// client chunk by chunk. Failures are never retried.
    pub async fn forward(
        &self,
        method: Method,
        url: reqwest::Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
