//! Hash chain kernel.
//!
//! A pure function from (previous hash, canonical entry fields) to the
//! next hash. The worker uses it when writing; the verifier must
//! reproduce it byte for byte when reading, so both sides build an
//! [`EntryDigest`] and hash through the same code path.

use sha2::{Digest, Sha256};

use crate::models::audit::rfc3339_nano;
use crate::models::AuditEntry;

/// Seed hash for the first entry: `SHA-256("genesis:" || seed)`.
///
/// The seed itself is opaque and never logged; the derived hash is the
/// only public artifact.
pub fn genesis_hash(seed: &str) -> String {
    let mut h = Sha256::new();
    h.update(b"genesis:");
    h.update(seed.as_bytes());
    hex::encode(h.finalize())
}

/// Borrowed canonical view of one entry, in hashing order.
///
/// Values are concatenated as UTF-8 bytes with no separators: timestamp,
/// endpoint, request body, response body, status code (decimal), error
/// tag, is_complete ("true"/"false"), the optional trace fields, and
/// finally the previous hash.
#[derive(Debug)]
pub struct EntryDigest<'a> {
    pub timestamp: &'a str,
    pub endpoint: &'a str,
    pub request_body: &'a str,
    pub response_body: &'a str,
    pub status_code: u16,
    pub error: &'a str,
    pub is_complete: bool,
    pub trace: Option<TraceDigest<'a>>,
    pub prev_hash: &'a str,
}

#[derive(Debug)]
pub struct TraceDigest<'a> {
    pub trace_id: &'a str,
    pub span_id: &'a str,
    pub parent_span_id: &'a str,
    pub span_type: &'a str,
    pub span_name: &'a str,
    pub tool_call: Option<ToolCallDigest<'a>>,
    pub tool_result: Option<ToolResultDigest<'a>>,
}

#[derive(Debug)]
pub struct ToolCallDigest<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub function_name: &'a str,
    pub arguments_hash: &'a str,
}

#[derive(Debug)]
pub struct ToolResultDigest<'a> {
    pub tool_call_id: &'a str,
    pub content_hash: &'a str,
    pub is_error: bool,
}

impl EntryDigest<'_> {
    /// Lowercase hex SHA-256 over the canonical concatenation.
    pub fn hash(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.timestamp.as_bytes());
        h.update(self.endpoint.as_bytes());
        h.update(self.request_body.as_bytes());
        h.update(self.response_body.as_bytes());
        h.update(self.status_code.to_string().as_bytes());
        h.update(self.error.as_bytes());
        h.update(bool_str(self.is_complete).as_bytes());

        if let Some(trace) = &self.trace {
            h.update(trace.trace_id.as_bytes());
            h.update(trace.span_id.as_bytes());
            h.update(trace.parent_span_id.as_bytes());
            h.update(trace.span_type.as_bytes());
            h.update(trace.span_name.as_bytes());

            if let Some(call) = &trace.tool_call {
                h.update(call.id.as_bytes());
                h.update(call.kind.as_bytes());
                h.update(call.function_name.as_bytes());
                h.update(call.arguments_hash.as_bytes());
            }

            if let Some(result) = &trace.tool_result {
                h.update(result.tool_call_id.as_bytes());
                h.update(result.content_hash.as_bytes());
                h.update(bool_str(result.is_error).as_bytes());
            }
        }

        h.update(self.prev_hash.as_bytes());
        hex::encode(h.finalize())
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Hash a fully-populated entry (prev_hash already assigned).
pub fn entry_hash(entry: &AuditEntry) -> String {
    let timestamp = rfc3339_nano::format(&entry.timestamp);
    let trace = entry.trace.as_ref().map(|t| TraceDigest {
        trace_id: &t.trace_id,
        span_id: &t.span_id,
        parent_span_id: &t.parent_span_id,
        span_type: t.span_type.map(|s| s.as_str()).unwrap_or(""),
        span_name: &t.span_name,
        tool_call: t.tool_call.as_ref().map(|c| ToolCallDigest {
            id: &c.id,
            kind: &c.r#type,
            function_name: &c.function.name,
            arguments_hash: &c.function.arguments_hash,
        }),
        tool_result: t.tool_result.as_ref().map(|r| ToolResultDigest {
            tool_call_id: &r.tool_call_id,
            content_hash: &r.content_hash,
            is_error: r.is_error,
        }),
    });

    EntryDigest {
        timestamp: &timestamp,
        endpoint: &entry.endpoint,
        request_body: &entry.request.body,
        response_body: &entry.response.body,
        status_code: entry.response.status_code,
        error: &entry.response.error,
        is_complete: entry.response.is_complete,
        trace,
        prev_hash: &entry.prev_hash,
    }
    .hash()
}

/// Hex SHA-256 of an arbitrary string; used for tool-call argument and
/// tool-result content hashes.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FunctionCall, RequestDetails, ResponseDetails, SpanType, ToolCallInfo, TraceContext,
    };
    use chrono::{TimeZone, Utc};

    fn sample_entry() -> AuditEntry {
        AuditEntry {
            timestamp: Utc
                .timestamp_opt(1_750_000_000, 123_000_000)
                .single()
                .unwrap(),
            endpoint: "openai".into(),
            sequence_id: 0,
            request: RequestDetails {
                method: "POST".into(),
                path: "/v1/chat/completions".into(),
                body: "{\"model\":\"gpt-4o\"}".into(),
                ..Default::default()
            },
            response: ResponseDetails {
                status_code: 200,
                body: "{\"ok\":true}".into(),
                ..Default::default()
            },
            trace: None,
            prev_hash: genesis_hash("test-seed"),
            hash: String::new(),
        }
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        assert_eq!(genesis_hash("test-seed"), genesis_hash("test-seed"));
        assert_ne!(genesis_hash("test-seed"), genesis_hash("other-seed"));
        assert_eq!(genesis_hash("test-seed").len(), 64);
    }

    #[test]
    fn genesis_hash_matches_manual_computation() {
        let expected = sha256_hex("genesis:abc");
        assert_eq!(genesis_hash("abc"), expected);
    }

    #[test]
    fn hash_is_stable_for_identical_entries() {
        let entry = sample_entry();
        assert_eq!(entry_hash(&entry), entry_hash(&entry.clone()));
    }

    #[test]
    fn hash_changes_when_any_audited_field_changes() {
        let base = sample_entry();
        let base_hash = entry_hash(&base);

        let mut e = base.clone();
        e.endpoint.push('x');
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.request.body.push('x');
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.response.body.push('x');
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.response.status_code = 500;
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.response.error = "STREAM_TIMEOUT".into();
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.response.is_complete = false;
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.prev_hash.push('0');
        assert_ne!(entry_hash(&e), base_hash);

        let mut e = base.clone();
        e.timestamp += chrono::Duration::nanoseconds(1);
        assert_ne!(entry_hash(&e), base_hash);
    }

    #[test]
    fn trace_fields_are_part_of_the_hash() {
        let mut entry = sample_entry();
        let without_trace = entry_hash(&entry);

        entry.trace = Some(TraceContext {
            trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
            span_id: "b7ad6b7169203331".into(),
            span_type: Some(SpanType::ToolCall),
            span_name: "get_weather".into(),
            tool_call: Some(ToolCallInfo {
                id: "call_abc".into(),
                r#type: "function".into(),
                function: FunctionCall {
                    name: "get_weather".into(),
                    arguments: "{\"city\":\"London\"}".into(),
                    arguments_hash: sha256_hex("{\"city\":\"London\"}"),
                },
                index: 0,
            }),
            ..Default::default()
        });
        let with_trace = entry_hash(&entry);
        assert_ne!(without_trace, with_trace);

        // Mutating a tool-call field breaks the hash too.
        entry
            .trace
            .as_mut()
            .unwrap()
            .tool_call
            .as_mut()
            .unwrap()
            .function
            .arguments_hash = sha256_hex("{}");
        assert_ne!(entry_hash(&entry), with_trace);
    }

    #[test]
    fn status_code_hashes_as_decimal_digits() {
        // 200 must hash as the bytes "200": build the same digest by hand.
        let entry = sample_entry();
        let ts = crate::models::audit::rfc3339_nano::format(&entry.timestamp);
        let mut h = sha2::Sha256::new();
        h.update(ts.as_bytes());
        h.update(b"openai");
        h.update(entry.request.body.as_bytes());
        h.update(entry.response.body.as_bytes());
        h.update(b"200");
        h.update(b"");
        h.update(b"true");
        h.update(entry.prev_hash.as_bytes());
        assert_eq!(entry_hash(&entry), hex::encode(h.finalize()));
    }
}
