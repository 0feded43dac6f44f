//! The proxy data path: per-request orchestration, response capture with
//! streaming support, SSE reconstruction, and header sanitization.

pub mod capture;
pub mod handler;
pub mod reconstruct;
pub mod sanitize;
pub mod upstream;
