//! Offline journal verification.
//!
//! Replays the chain from disk: every entry's `prev_hash` must equal the
//! on-disk predecessor's `hash`, and every `hash` must recompute from the
//! entry's own fields. The genesis seed is not needed; the first entry
//! already carries its derived `prev_hash`.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::audit::chain::{
    EntryDigest, ToolCallDigest, ToolResultDigest, TraceDigest,
};

/// Journal lines can be large (reconstructed bodies); read with a wide
/// buffer instead of the default 8 KiB.
const LINE_BUFFER: usize = 1024 * 1024;

/// Parse failures tolerated before verification aborts.
const MAX_PARSE_ERRORS: usize = 10;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("cannot open journal: {0}")]
    File(io::Error),

    #[error("chain broken at line {line}: expected prev_hash {expected}, found {found}")]
    ChainBroken {
        line: u64,
        expected: String,
        found: String,
    },

    #[error("data tampered at line {line}: computed hash {computed}, stored {stored}")]
    Tampered {
        line: u64,
        computed: String,
        stored: String,
    },

    #[error("too many parse errors ({count}), aborting")]
    ParseLimit { count: usize },

    #[error("error reading journal: {0}")]
    Scan(io::Error),
}

impl VerifyError {
    /// Stable process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            VerifyError::File(_) => 1,
            VerifyError::ChainBroken { .. } => 2,
            VerifyError::Tampered { .. } => 3,
            VerifyError::ParseLimit { .. } => 4,
            VerifyError::Scan(_) => 5,
        }
    }
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Total lines read, including unparseable ones.
    pub lines: u64,
    /// Lines that failed to parse and were skipped.
    pub parse_errors: Vec<(u64, String)>,
}

// Minimal view of a journal line: only the audited fields. Everything
// else on the line (headers, durations, media references) is
// intentionally outside the integrity envelope.
#[derive(Deserialize)]
struct Record {
    // Hashed as the raw serialized string, never reparsed into a time
    // type: reformatting would change the bytes.
    timestamp: String,
    endpoint: String,
    request: RecordRequest,
    response: RecordResponse,
    #[serde(default)]
    trace: Option<RecordTrace>,
    prev_hash: String,
    hash: String,
}

#[derive(Deserialize)]
struct RecordRequest {
    body: String,
}

#[derive(Deserialize)]
struct RecordResponse {
    body: String,
    status_code: u16,
    #[serde(default)]
    error: String,
    is_complete: bool,
}

#[derive(Deserialize, Default)]
struct RecordTrace {
    #[serde(default)]
    trace_id: String,
    #[serde(default)]
    span_id: String,
    #[serde(default)]
    parent_span_id: String,
    #[serde(default)]
    span_type: String,
    #[serde(default)]
    span_name: String,
    #[serde(default)]
    tool_call: Option<RecordToolCall>,
    #[serde(default)]
    tool_result: Option<RecordToolResult>,
}

#[derive(Deserialize)]
struct RecordToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: RecordFunction,
}

#[derive(Deserialize)]
struct RecordFunction {
    name: String,
    arguments_hash: String,
}

#[derive(Deserialize)]
struct RecordToolResult {
    tool_call_id: String,
    content_hash: String,
    #[serde(default)]
    is_error: bool,
}

impl Record {
    fn compute_hash(&self) -> String {
        let trace = self.trace.as_ref().map(|t| TraceDigest {
            trace_id: &t.trace_id,
            span_id: &t.span_id,
            parent_span_id: &t.parent_span_id,
            span_type: &t.span_type,
            span_name: &t.span_name,
            tool_call: t.tool_call.as_ref().map(|c| ToolCallDigest {
                id: &c.id,
                kind: &c.kind,
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
            timestamp: &self.timestamp,
            endpoint: &self.endpoint,
            request_body: &self.request.body,
            response_body: &self.response.body,
            status_code: self.response.status_code,
            error: &self.response.error,
            is_complete: self.response.is_complete,
            trace,
            prev_hash: &self.prev_hash,
        }
        .hash()
    }
}

/// Verify the journal at `path`. `on_verified` is invoked with
/// (line number, entry hash) for each entry that passes, so the CLI can
/// report progress in verbose mode.
pub fn verify_file(
    path: impl AsRef<Path>,
    on_verified: impl FnMut(u64, &str),
) -> Result<VerifyReport, VerifyError> {
    let file = File::open(path).map_err(VerifyError::File)?;
    verify_reader(BufReader::with_capacity(LINE_BUFFER, file), on_verified)
}

pub fn verify_reader(
    mut reader: impl BufRead,
    mut on_verified: impl FnMut(u64, &str),
) -> Result<VerifyReport, VerifyError> {
    let mut report = VerifyReport::default();
    let mut expected_prev: Option<String> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(VerifyError::Scan)?;
        if read == 0 {
            break;
        }
        report.lines += 1;
        let line_no = report.lines;

        let trimmed = line.trim_end_matches('\n');
        if trimmed.is_empty() {
            continue;
        }

        let record: Record = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                report.parse_errors.push((line_no, e.to_string()));
                if report.parse_errors.len() > MAX_PARSE_ERRORS {
                    return Err(VerifyError::ParseLimit {
                        count: report.parse_errors.len(),
                    });
                }
                continue;
            }
        };

        if let Some(expected) = &expected_prev {
            if &record.prev_hash != expected {
                return Err(VerifyError::ChainBroken {
                    line: line_no,
                    expected: expected.clone(),
                    found: record.prev_hash,
                });
            }
        }

        let computed = record.compute_hash();
        if computed != record.hash {
            return Err(VerifyError::Tampered {
                line: line_no,
                computed,
                stored: record.hash,
            });
        }

        on_verified(line_no, &record.hash);
        expected_prev = Some(record.hash);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::chain;
    use crate::models::{AuditEntry, RequestDetails, ResponseDetails};
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    fn journal_lines(count: u64, seed: &str) -> String {
        let mut prev = chain::genesis_hash(seed);
        let mut out = String::new();
        for seq in 0..count {
            let mut entry = AuditEntry {
                timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
                    + chrono::Duration::milliseconds(seq as i64 * 7),
                endpoint: "mock".into(),
                sequence_id: seq,
                request: RequestDetails {
                    method: "POST".into(),
                    body: format!("req-{seq}"),
                    ..Default::default()
                },
                response: ResponseDetails {
                    body: "ok".into(),
                    ..Default::default()
                },
                trace: None,
                prev_hash: prev.clone(),
                hash: String::new(),
            };
            entry.hash = chain::entry_hash(&entry);
            prev = entry.hash.clone();
            out.push_str(&serde_json::to_string(&entry).unwrap());
            out.push('\n');
        }
        out
    }

    #[test]
    fn valid_journal_verifies() {
        let journal = journal_lines(5, "seed");
        let mut seen = 0;
        let report = verify_reader(Cursor::new(journal), |_, _| seen += 1).unwrap();
        assert_eq!(report.lines, 5);
        assert_eq!(seen, 5);
        assert!(report.parse_errors.is_empty());
    }

    #[test]
    fn empty_journal_verifies_with_zero_lines() {
        let report = verify_reader(Cursor::new(""), |_, _| {}).unwrap();
        assert_eq!(report.lines, 0);
    }

    #[test]
    fn tampered_body_is_detected() {
        let journal = journal_lines(3, "seed").replace("req-1", "req-X");
        let err = verify_reader(Cursor::new(journal), |_, _| {}).unwrap_err();
        match err {
            VerifyError::Tampered { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Tampered, got {other:?}"),
        }
        assert_eq!(
            VerifyError::Tampered {
                line: 2,
                computed: String::new(),
                stored: String::new()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn removed_line_breaks_the_chain() {
        let journal = journal_lines(3, "seed");
        let mut lines: Vec<&str> = journal.lines().collect();
        lines.remove(1);
        let patched = lines.join("\n");
        let err = verify_reader(Cursor::new(patched), |_, _| {}).unwrap_err();
        match err {
            VerifyError::ChainBroken { line, .. } => assert_eq!(line, 2),
            other => panic!("expected ChainBroken, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_lines_are_tolerated_up_to_the_limit() {
        let mut journal = String::from("not json\n");
        journal.push_str(&journal_lines(2, "seed"));
        let report = verify_reader(Cursor::new(journal), |_, _| {}).unwrap();
        assert_eq!(report.parse_errors.len(), 1);
        assert_eq!(report.lines, 3);
    }

    #[test]
    fn too_many_parse_errors_aborts() {
        let journal = "garbage\n".repeat(12);
        let err = verify_reader(Cursor::new(journal), |_, _| {}).unwrap_err();
        assert!(matches!(err, VerifyError::ParseLimit { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn trace_fields_participate_in_verification() {
        use crate::models::{FunctionCall, SpanType, ToolCallInfo, TraceContext};

        let mut entry = AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap(),
            endpoint: "mock".into(),
            sequence_id: 0,
            request: RequestDetails::default(),
            response: ResponseDetails::default(),
            trace: Some(TraceContext {
                trace_id: "abc0".into(),
                span_id: "def0".into(),
                span_type: Some(SpanType::ToolCall),
                span_name: "lookup".into(),
                tool_call: Some(ToolCallInfo {
                    id: "call_1".into(),
                    r#type: "function".into(),
                    function: FunctionCall {
                        name: "lookup".into(),
                        arguments: "{}".into(),
                        arguments_hash: chain::sha256_hex("{}"),
                    },
                    index: 0,
                }),
                ..Default::default()
            }),
            prev_hash: chain::genesis_hash("seed"),
            hash: String::new(),
        };
        entry.hash = chain::entry_hash(&entry);
        let good = format!("{}\n", serde_json::to_string(&entry).unwrap());
        verify_reader(Cursor::new(good.clone()), |_, _| {}).unwrap();

        // Tampering with the span name must be detected.
        let bad = good.replace("\"span_name\":\"lookup\"", "\"span_name\":\"other\"");
        assert!(matches!(
            verify_reader(Cursor::new(bad), |_, _| {}),
            Err(VerifyError::Tampered { .. })
        ));
    }

    #[test]
    fn file_error_maps_to_exit_code_1() {
        let err = verify_file("/nonexistent/audit.jsonl", |_, _| {}).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
