pub mod audit;
pub mod trace;

pub use audit::{
    AuditEntry, MediaReference, RequestDetails, ResponseDetails, StreamingMetadata,
};
pub use trace::{FunctionCall, SpanType, ToolCallInfo, ToolResultInfo, TraceContext};
