//! Response capture: a write-through tee between the upstream response
//! and the client.
//!
//! Bytes always reach the client in full; the audit side keeps a bounded
//! mirror. For streaming responses the tee also watches for termination
//! (upstream EOF, client disconnect, timeout, write failure) and fires a
//! one-shot completion signal that drives deferred entry assembly.

use std::io::Read;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::oneshot;

/// Marker appended to a truncated mirror at read time, so the in-memory
/// buffer stays a clean prefix of the original bytes.
pub const TRUNCATION_MARKER: &str =
    "\n[TRUNCATED: response exceeded max_audit_body_size limit]";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Bounded mirror of response bytes. Bytes past the budget are counted
/// but discarded; the total original size is always tracked.
#[derive(Debug)]
pub struct CaptureBuffer {
    buf: Vec<u8>,
    max_size: u64,
    total_size: u64,
    truncated: bool,
}

impl CaptureBuffer {
    pub fn new(max_size: u64) -> Self {
        Self {
            buf: Vec::new(),
            max_size,
            total_size: 0,
            truncated: false,
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        let budget = self.max_size.saturating_sub(self.total_size);
        self.total_size += data.len() as u64;
        if budget > 0 {
            let take = (budget as usize).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
        }
        if self.total_size >= self.max_size {
            self.truncated = true;
        }
    }

    /// The mirror as text, with the truncation marker appended when the
    /// original exceeded the budget.
    pub fn body(&self) -> String {
        let mut body = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            body.push_str(TRUNCATION_MARKER);
        }
        body
    }

    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Cumulative size of the original stream, including discarded bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// Gunzip the mirror when the response advertised gzip AND the bytes
/// carry the gzip magic. Any decode failure falls open to the raw bytes:
/// a readable-but-compressed journal body beats a lost one.
pub fn decompress_body(raw: &[u8], content_encoding: Option<&str>) -> Option<Vec<u8>> {
    let encoding = content_encoding?;
    if !encoding.to_ascii_lowercase().contains("gzip") {
        return None;
    }
    if raw.len() < 2 || raw[..2] != GZIP_MAGIC {
        return None;
    }

    let mut decoder = flate2::read::GzDecoder::new(raw);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(_) => None,
    }
}

/// Why a streaming capture finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Upstream ended the stream normally.
    UpstreamEof,
    /// The client went away before the stream finished.
    ClientDisconnect,
    /// The stream outlived `stream_timeout`.
    Timeout,
    /// Forwarding a chunk failed.
    WriteError(String),
    /// The completion signal itself failed.
    ContextError(String),
}

impl StreamOutcome {
    /// (error tag, is_complete) recorded on the audit entry.
    pub fn into_entry_fields(self) -> (String, bool) {
        match self {
            StreamOutcome::UpstreamEof => (String::new(), true),
            StreamOutcome::ClientDisconnect => ("CLIENT_DISCONNECT".into(), false),
            StreamOutcome::Timeout => ("STREAM_TIMEOUT".into(), false),
            StreamOutcome::WriteError(detail) => (format!("WRITE_ERROR: {detail}"), false),
            StreamOutcome::ContextError(detail) => (format!("CONTEXT_ERROR: {detail}"), false),
        }
    }
}

/// State shared between the tee stream and its monitor task.
pub struct StreamCapture {
    buffer: Mutex<CaptureBuffer>,
    done: AtomicBool,
    outcome_tx: Mutex<Option<oneshot::Sender<StreamOutcome>>>,
}

impl StreamCapture {
    /// Returns the shared capture state and the receiver the monitor
    /// task selects on.
    pub fn new(max_size: u64) -> (Arc<Self>, oneshot::Receiver<StreamOutcome>) {
        let (tx, rx) = oneshot::channel();
        let capture = Arc::new(Self {
            buffer: Mutex::new(CaptureBuffer::new(max_size)),
            done: AtomicBool::new(false),
            outcome_tx: Mutex::new(Some(tx)),
        });
        (capture, rx)
    }

    /// Signal completion. Safe to call from every racing finalization
    /// path; only the first call wins the CAS and delivers the outcome.
    pub fn complete(&self, outcome: StreamOutcome) {
        if self
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(tx) = self.outcome_tx.lock().expect("capture mutex poisoned").take() {
                let _ = tx.send(outcome);
            }
        }
    }

    /// Claim finalization without sending an outcome (timeout path: the
    /// monitor already knows why it woke up).
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) {
        self.buffer.lock().expect("capture mutex poisoned").write(data);
    }

    /// Take the mirror out for entry assembly. The tee may keep writing
    /// after a timeout fired; those bytes land in the abandoned buffer.
    pub fn take_buffer(&self) -> CaptureBuffer {
        let mut guard = self.buffer.lock().expect("capture mutex poisoned");
        std::mem::replace(&mut *guard, CaptureBuffer::new(0))
    }
}

/// Forwarding stream handed to the client via `Body::from_stream`.
/// Mirrors every chunk into the shared capture and reports termination.
pub struct StreamTee<S> {
    inner: S,
    capture: Arc<StreamCapture>,
    finished: bool,
}

impl<S> StreamTee<S> {
    pub fn new(inner: S, capture: Arc<StreamCapture>) -> Self {
        Self {
            inner,
            capture,
            finished: false,
        }
    }
}

impl<S, E> Stream for StreamTee<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.capture.write(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                let detail = e.to_string();
                this.capture
                    .complete(StreamOutcome::WriteError(detail.clone()));
                Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    detail,
                ))))
            }
            Poll::Ready(None) => {
                this.finished = true;
                this.capture.complete(StreamOutcome::UpstreamEof);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for StreamTee<S> {
    fn drop(&mut self) {
        // Dropped before EOF means the client stopped reading: hyper
        // discards the body when the connection goes away.
        if !self.finished {
            self.capture.complete(StreamOutcome::ClientDisconnect);
        }
    }
}
