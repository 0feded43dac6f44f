use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::trace::TraceContext;

/// An extracted media file that was offloaded from the journal body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    /// Media type, e.g. "image/png".
    pub r#type: String,
    /// Relative path of the extracted file under the media store.
    pub file_path: String,
    /// SHA-256 of the original Base64 string (not the decoded bytes).
    pub sha256: String,
    /// Size of the decoded bytes on disk.
    pub size_bytes: u64,
    /// The marker that replaced the Base64 payload in the body,
    /// e.g. "[IMAGE_EXTRACTED:0]".
    pub placeholder: String,
}

/// Timing metadata recorded when an SSE response was consolidated
/// back into a single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingMetadata {
    pub chunks_received: u64,
    pub reconstructed_from_stream: bool,
    /// Milliseconds from request start to the first chunk.
    pub first_chunk_time: u64,
    /// Milliseconds from request start to the last chunk.
    pub last_chunk_time: u64,
}

/// One journal record. Entries are chained: `prev_hash` is the `hash` of
/// the on-disk predecessor, and `hash` covers every audited field, so any
/// mutation invalidates the chain from that point forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Request-arrival instant. Serialized in the same canonical
    /// RFC 3339 form that the hash covers (see [`rfc3339_nano`]).
    #[serde(with = "rfc3339_nano")]
    pub timestamp: DateTime<Utc>,

    /// Named endpoint the request was routed through.
    pub endpoint: String,

    /// Monotonic counter reserved at request arrival. Keeps the chain
    /// ordered even when streaming responses finish out of order.
    pub sequence_id: u64,

    pub request: RequestDetails,
    pub response: ResponseDetails,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,

    /// Hash of the previous entry; the genesis hash for the first one.
    #[serde(default)]
    pub prev_hash: String,

    /// SHA-256 over the canonical field concatenation, lowercase hex.
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDetails {
    pub method: String,
    /// Path after stripping the endpoint prefix.
    pub path: String,
    pub headers: HashMap<String, Vec<String>>,
    /// Raw request body, with media placeholders substituted when
    /// extraction ran.
    pub body: String,
    pub content_length: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_references: Vec<MediaReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDetails {
    pub status_code: u16,
    pub headers: HashMap<String, Vec<String>>,
    /// Post-processed body: decompressed, reconstructed from SSE deltas
    /// where applicable, media placeholders substituted.
    pub body: String,
    pub content_length: u64,
    pub duration_ms: u64,
    pub is_streaming: bool,
    /// Failure tag such as "CLIENT_DISCONNECT" or "STREAM_TIMEOUT".
    /// Empty means the exchange succeeded.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
    /// Original body size when the audit mirror was truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated_at_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_references: Vec<MediaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_metadata: Option<StreamingMetadata>,
}

impl Default for ResponseDetails {
    fn default() -> Self {
        Self {
            status_code: 200,
            headers: HashMap::new(),
            body: String::new(),
            content_length: 0,
            duration_ms: 0,
            is_streaming: false,
            error: String::new(),
            is_complete: true,
            truncated: false,
            truncated_at_bytes: None,
            media_references: Vec::new(),
            streaming_metadata: None,
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Canonical timestamp codec: RFC 3339 with nanosecond fraction, trailing
/// zeros trimmed, `Z` offset. The serialized string is byte-identical to
/// the string hashed into the chain, so the verifier can hash the raw
/// JSON field without reformatting.
pub mod rfc3339_nano {
    use chrono::{DateTime, Timelike, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        let base = ts.format("%Y-%m-%dT%H:%M:%S");
        let nanos = ts.nanosecond() % 1_000_000_000;
        if nanos == 0 {
            return format!("{base}Z");
        }
        let mut frac = format!("{nanos:09}");
        while frac.ends_with('0') {
            frac.pop();
        }
        format!("{base}.{frac}Z")
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}
