//! The audit pipeline: hash chain kernel, append-only journal store,
//! the single-writer worker that threads entries onto the chain, and the
//! offline verifier used by `aitrail-verify`.

pub mod chain;
pub mod storage;
pub mod verify;
pub mod worker;

pub use storage::{FileStorage, JournalStore};
pub use worker::{AuditHandle, AuditWorker};
