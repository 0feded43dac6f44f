//! Audit worker: the single consumer that turns finished exchanges into
//! chained journal lines.
//!
//! Handlers finish in arbitrary order (streaming responses may outlive
//! requests that arrived later), so the worker reorders entries by their
//! producer-assigned sequence number with a bounded pending buffer before
//! threading them onto the hash chain. One writer is the smallest design
//! that gives the chain a total order without per-entry locking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audit::chain;
use crate::audit::storage::JournalStore;
use crate::models::AuditEntry;

/// How many entries may queue between handlers and the worker before
/// `log` blocks. Blocking here is deliberate backpressure under overload.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Cap on the reorder buffer; beyond it the worker fails open and writes
/// entries out of order rather than stalling the pipeline.
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// Cloneable producer side handed to request handlers.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditHandle {
    /// Queue an entry for chaining. Awaits when the queue is full; the
    /// entry is dropped (with an error log) only if the worker is gone.
    pub async fn log(&self, entry: AuditEntry) {
        let seq = entry.sequence_id;
        if self.tx.send(entry).await.is_err() {
            tracing::error!(seq, "audit worker unavailable, entry dropped");
        }
    }
}

/// Owner of the worker task. Dropping every [`AuditHandle`] closes the
/// intake; [`AuditWorker::join`] then waits for the drain to finish.
pub struct AuditWorker {
    handle: JoinHandle<()>,
}

impl AuditWorker {
    pub fn spawn(
        storage: Arc<dyn JournalStore>,
        genesis_seed: &str,
        queue_size: usize,
        max_pending: usize,
    ) -> (Self, AuditHandle) {
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(queue_size);
        let mut state = ChainState::new(storage, genesis_seed, max_pending);

        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                state.accept(entry);
            }
            state.drain_pending();
            if let Err(e) = state.storage.close() {
                tracing::error!("failed to close journal store: {e}");
            }
        });

        (Self { handle }, AuditHandle { tx })
    }

    /// Wait for the worker to drain and close the store. Call after the
    /// last handle clone has been dropped.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Sequencing and chaining state, private to the worker task.
struct ChainState {
    storage: Arc<dyn JournalStore>,
    /// Hash of the last entry written; the genesis hash before any.
    prev_hash: String,
    /// Next sequence number the chain will accept.
    expected_seq: u64,
    /// Entries that arrived ahead of their slot.
    pending: HashMap<u64, AuditEntry>,
    max_pending: usize,
}

impl ChainState {
    fn new(storage: Arc<dyn JournalStore>, genesis_seed: &str, max_pending: usize) -> Self {
        Self {
            storage,
            prev_hash: chain::genesis_hash(genesis_seed),
            expected_seq: 0,
            pending: HashMap::new(),
            max_pending,
        }
    }

    fn accept(&mut self, entry: AuditEntry) {
        let seq = entry.sequence_id;

        if seq == self.expected_seq {
            self.process(entry);
            self.expected_seq += 1;

            // Drain successors that were waiting on this slot.
            while let Some(next) = self.pending.remove(&self.expected_seq) {
                self.process(next);
                self.expected_seq += 1;
            }

            if !self.pending.is_empty() && self.pending.len() % 100 == 0 {
                tracing::warn!(pending = self.pending.len(), "audit reorder buffer growing");
            }
        } else if seq > self.expected_seq {
            if self.pending.len() >= self.max_pending {
                // Fail open: write out of order and abandon the gap
                // rather than stalling every handler behind a full
                // buffer. The verifier will surface the break.
                tracing::error!(
                    seq,
                    expected = self.expected_seq,
                    max = self.max_pending,
                    "reorder buffer full, writing entry out of order"
                );
                self.process(entry);
                self.expected_seq = seq + 1;
            } else {
                self.pending.insert(seq, entry);
            }
        } else {
            // Behind the chain head (duplicate or abandoned gap): write
            // it, never rewind.
            tracing::warn!(
                seq,
                expected = self.expected_seq,
                "entry behind chain head, writing out of order"
            );
            self.process(entry);
        }
    }

    fn process(&mut self, mut entry: AuditEntry) {
        entry.prev_hash = self.prev_hash.clone();
        entry.hash = chain::entry_hash(&entry);

        if let Err(e) = self.storage.write(&entry) {
            // Fail open: keep serving. prev_hash is not advanced, which
            // the verifier reports as a chain break at the next healthy
            // write.
            tracing::error!(seq = entry.sequence_id, "journal write failed: {e}");
            return;
        }
        self.prev_hash = entry.hash;
    }

    fn drain_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::warn!(
            count = self.pending.len(),
            "draining pending audit entries on shutdown, out of sequence order"
        );
        for (seq, entry) in std::mem::take(&mut self.pending) {
            tracing::warn!(seq, expected = self.expected_seq, "out-of-sequence entry");
            self.process(entry);
        }
    }
}
