//! SSE stream reconstruction.
//!
//! Streaming chat completions arrive as dozens of `data:` delta chunks.
//! The journal stores a single consolidated message instead, rebuilt the
//! same way a non-streaming response would have looked.

use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::models::StreamingMetadata;

/// Convert a captured SSE body into a consolidated chat-completion JSON
/// object plus streaming metadata.
///
/// Returns `None` when the body contains no parseable SSE events; the
/// caller then journals the body unchanged and treats it as non-SSE.
pub fn reconstruct_stream(body: &str, start: Instant) -> Option<(String, StreamingMetadata)> {
    let chunks = parse_sse_chunks(body);
    if chunks.is_empty() {
        return None;
    }

    let reconstructed = consolidate(&chunks)?;

    let metadata = StreamingMetadata {
        chunks_received: chunks.len() as u64,
        reconstructed_from_stream: true,
        first_chunk_time: 0,
        last_chunk_time: start.elapsed().as_millis() as u64,
    };

    Some((reconstructed, metadata))
}

/// Split the body on line boundaries, keep `data:` payloads, stop at the
/// `[DONE]` terminator, and JSON-parse each payload into an object.
fn parse_sse_chunks(body: &str) -> Vec<Map<String, Value>> {
    let mut chunks = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            break;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(obj)) => chunks.push(obj),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("unparseable SSE chunk skipped: {e}");
            }
        }
    }

    chunks
}

/// Rebuild the OpenAI chat-completion shape from delta chunks.
fn consolidate(chunks: &[Map<String, Value>]) -> Option<String> {
    let first = chunks.first()?;
    let mut out = Map::new();

    for key in ["id", "model", "service_tier", "system_fingerprint"] {
        if let Some(v) = first.get(key).and_then(Value::as_str) {
            out.insert(key.to_string(), Value::String(v.to_string()));
        }
    }
    if let Some(obj) = first.get("object").and_then(Value::as_str) {
        let rewritten = obj.strip_suffix(".chunk").unwrap_or(obj);
        out.insert("object".into(), Value::String(rewritten.to_string()));
    }
    if let Some(created) = first.get("created").and_then(Value::as_i64) {
        out.insert("created".into(), Value::from(created));
    }

    let mut content = String::new();
    let mut role = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut finish_reason = String::new();
    let mut usage: Option<Value> = None;

    for chunk in chunks {
        if let Some(u) = chunk.get("usage").filter(|u| u.is_object()) {
            usage = Some(u.clone());
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            continue;
        };

        if let Some(fr) = choice.get("finish_reason").and_then(Value::as_str) {
            if !fr.is_empty() {
                finish_reason = fr.to_string();
            }
        }

        let Some(delta) = choice.get("delta").and_then(Value::as_object) else {
            continue;
        };

        if let Some(r) = delta.get("role").and_then(Value::as_str) {
            if !r.is_empty() {
                role = r.to_string();
            }
        }
        if let Some(c) = delta.get("content").and_then(Value::as_str) {
            content.push_str(c);
        }
        if let Some(tc) = delta.get("tool_calls").and_then(Value::as_array) {
            tool_calls.extend(tc.iter().cloned());
        }
    }

    let mut message = Map::new();
    if !role.is_empty() {
        message.insert("role".into(), Value::String(role));
    }
    if !tool_calls.is_empty() {
        // Tool-call responses carry no text content.
        message.insert("content".into(), Value::Null);
        message.insert("tool_calls".into(), Value::Array(tool_calls));
    } else if !content.is_empty() {
        message.insert("content".into(), Value::String(content));
    }

    let mut choice = Map::new();
    choice.insert("index".into(), json!(0));
    choice.insert("message".into(), Value::Object(message));
    if !finish_reason.is_empty() {
        choice.insert("finish_reason".into(), Value::String(finish_reason));
    }

    out.insert("choices".into(), Value::Array(vec![Value::Object(choice)]));
    if let Some(u) = usage {
        out.insert("usage".into(), u);
    }

    serde_json::to_string_pretty(&Value::Object(out)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(lines: &[&str]) -> String {
        let mut body = String::new();
        for line in lines {
            body.push_str(line);
            body.push_str("\n\n");
        }
        body
    }

    #[test]
    fn content_deltas_concatenate_in_arrival_order() {
        let body = sse(&[
            r#"data: {"id":"chatcmpl-1","object":"chat.completion.chunk","created":1735000000,"model":"gpt-4o","choices":[{"delta":{"role":"assistant","content":""},"index":0}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hello"},"index":0}]}"#,
            r#"data: {"choices":[{"delta":{"content":" world"},"index":0}]}"#,
            r#"data: {"choices":[{"delta":{"content":"!"},"index":0}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop","index":0}],"usage":{"prompt_tokens":8,"completion_tokens":5,"total_tokens":13}}"#,
            "data: [DONE]",
        ]);

        let (out, meta) = reconstruct_stream(&body, Instant::now()).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();

        assert_eq!(v["choices"][0]["message"]["content"], "Hello world!");
        assert_eq!(v["choices"][0]["message"]["role"], "assistant");
        assert_eq!(v["choices"][0]["finish_reason"], "stop");
        assert_eq!(v["object"], "chat.completion");
        assert_eq!(v["id"], "chatcmpl-1");
        assert_eq!(v["model"], "gpt-4o");
        assert_eq!(v["created"], 1735000000);
        assert_eq!(v["usage"]["total_tokens"], 13);
        assert_eq!(meta.chunks_received, 5);
        assert!(meta.reconstructed_from_stream);
        assert_eq!(meta.first_chunk_time, 0);
    }

    #[test]
    fn tool_calls_null_out_content() {
        let body = sse(&[
            r#"data: {"object":"chat.completion.chunk","choices":[{"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":"{}"}}]},"index":0}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls","index":0}]}"#,
            "data: [DONE]",
        ]);

        let (out, _) = reconstruct_stream(&body, Instant::now()).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v["choices"][0]["message"]["content"].is_null());
        assert_eq!(
            v["choices"][0]["message"]["tool_calls"][0]["function"]["name"],
            "get_weather"
        );
        assert_eq!(v["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn non_sse_body_passes_through_untouched() {
        assert!(reconstruct_stream("{\"plain\":\"json\"}", Instant::now()).is_none());
        assert!(reconstruct_stream("", Instant::now()).is_none());
    }

    #[test]
    fn done_only_stream_has_no_chunks() {
        assert!(reconstruct_stream("data: [DONE]\n\n", Instant::now()).is_none());
    }

    #[test]
    fn stream_without_data_lines_passes_through() {
        let body = "event: ping\nretry: 500\n: keep-alive\n";
        assert!(reconstruct_stream(body, Instant::now()).is_none());
    }

    #[test]
    fn events_after_done_are_ignored() {
        let body = sse(&[
            r#"data: {"object":"chat.completion.chunk","choices":[{"delta":{"content":"kept"},"index":0}]}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":" dropped"},"index":0}]}"#,
        ]);
        let (out, meta) = reconstruct_stream(&body, Instant::now()).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["choices"][0]["message"]["content"], "kept");
        assert_eq!(meta.chunks_received, 1);
    }

    #[test]
    fn malformed_chunks_are_skipped() {
        let body = sse(&[
            "data: {broken",
            r#"data: {"object":"chat.completion.chunk","choices":[{"delta":{"content":"ok"},"index":0}]}"#,
            "data: [DONE]",
        ]);
        let (out, meta) = reconstruct_stream(&body, Instant::now()).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["choices"][0]["message"]["content"], "ok");
        assert_eq!(meta.chunks_received, 1);
    }

    #[test]
    fn last_usage_wins() {
        let body = sse(&[
            r#"data: {"object":"chat.completion.chunk","choices":[{"delta":{"content":"x"},"index":0}],"usage":{"total_tokens":1}}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop","index":0}],"usage":{"total_tokens":9}}"#,
            "data: [DONE]",
        ]);
        let (out, _) = reconstruct_stream(&body, Instant::now()).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["usage"]["total_tokens"], 9);
    }

    #[test]
    fn empty_content_and_no_tool_calls_omits_content() {
        let body = sse(&[
            r#"data: {"object":"chat.completion.chunk","choices":[{"delta":{"role":"assistant"},"index":0}]}"#,
            "data: [DONE]",
        ]);
        let (out, _) = reconstruct_stream(&body, Instant::now()).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v["choices"][0]["message"].get("content").is_none());
        assert_eq!(v["choices"][0]["message"]["role"], "assistant");
    }
}
