//! Tool-call and tool-result detection, and span classification.
//!
//! Detection targets the OpenAI chat-completion message shape; bodies in
//! any other shape simply classify as AGENT_THINKING.

use serde::Deserialize;

use crate::audit::chain::sha256_hex;
use crate::models::{FunctionCall, SpanType, ToolCallInfo, ToolResultInfo, TraceContext};

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize, Default)]
struct ResponseChoice {
    #[serde(default)]
    message: ResponseMessage,
}

#[derive(Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    function: RawFunction,
}

#[derive(Deserialize, Default)]
struct RawFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<RequestMessage>,
}

#[derive(Deserialize)]
struct RequestMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    tool_call_id: String,
    #[serde(default)]
    content: String,
}

/// First tool call in the response body, if any.
pub fn detect_tool_call(response_body: &str) -> Option<ToolCallInfo> {
    if response_body.is_empty() {
        return None;
    }
    let resp: ChatResponse = serde_json::from_str(response_body).ok()?;
    let call = resp.choices.first()?.message.tool_calls.first()?;

    Some(ToolCallInfo {
        id: call.id.clone(),
        r#type: call.kind.clone(),
        function: FunctionCall {
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
            arguments_hash: sha256_hex(&call.function.arguments),
        },
        index: 0,
    })
}

/// First tool result in the request body: a message with role "tool" and
/// a non-empty tool_call_id.
pub fn detect_tool_result(request_body: &str) -> Option<ToolResultInfo> {
    if request_body.is_empty() {
        return None;
    }
    let req: ChatRequest = serde_json::from_str(request_body).ok()?;
    let msg = req
        .messages
        .iter()
        .find(|m| m.role == "tool" && !m.tool_call_id.is_empty())?;

    let (is_error, error_message) = extract_error(&msg.content);

    Some(ToolResultInfo {
        tool_call_id: msg.tool_call_id.clone(),
        content: msg.content.clone(),
        content_hash: sha256_hex(&msg.content),
        is_error,
        error_message,
    })
}

/// An `error` field in the tool-result content marks the result failed.
fn extract_error(content: &str) -> (bool, String) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
        return (false, String::new());
    };
    let Some(err) = value.get("error") else {
        return (false, String::new());
    };
    let message = match err {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    (true, message)
}

fn has_choices(response_body: &str) -> bool {
    serde_json::from_str::<ChatResponse>(response_body)
        .map(|r| !r.choices.is_empty())
        .unwrap_or(false)
}

/// Classify the exchange; first match wins.
pub fn classify(request_body: &str, response_body: &str) -> SpanType {
    if detect_tool_call(response_body).is_some() {
        return SpanType::ToolCall;
    }
    if detect_tool_result(request_body).is_some() {
        return SpanType::ToolResult;
    }
    if has_choices(response_body) {
        return SpanType::FinalResponse;
    }
    SpanType::AgentThinking
}

fn span_name(
    span_type: SpanType,
    tool_call: Option<&ToolCallInfo>,
    tool_result: Option<&ToolResultInfo>,
) -> String {
    match span_type {
        SpanType::UserPrompt => "user_prompt".into(),
        SpanType::AgentThinking => "agent_thinking".into(),
        SpanType::ToolCall => tool_call
            .map(|c| c.function.name.clone())
            .unwrap_or_else(|| "tool_call".into()),
        SpanType::ToolResult => match tool_result {
            Some(r) if r.is_error => "tool_error".into(),
            _ => "tool_result".into(),
        },
        SpanType::FinalResponse => "final_response".into(),
        SpanType::Error => "error".into(),
    }
}

/// Populate span type, span name, and tool fields on the trace context
/// once both bodies are available.
pub fn enrich(trace: &mut TraceContext, request_body: &str, response_body: &str) {
    if let Some(call) = detect_tool_call(response_body) {
        trace.span_type = Some(SpanType::ToolCall);
        trace.span_name = span_name(SpanType::ToolCall, Some(&call), None);
        tracing::debug!(
            trace_id = %trace.trace_id,
            tool = %call.function.name,
            call_id = %call.id,
            "detected tool call"
        );
        trace.tool_call = Some(call);
        return;
    }

    if let Some(result) = detect_tool_result(request_body) {
        trace.span_type = Some(SpanType::ToolResult);
        trace.span_name = span_name(SpanType::ToolResult, None, Some(&result));
        tracing::debug!(
            trace_id = %trace.trace_id,
            call_id = %result.tool_call_id,
            is_error = result.is_error,
            "detected tool result"
        );
        trace.tool_result = Some(result);
        return;
    }

    let span_type = classify(request_body, response_body);
    trace.span_type = Some(span_type);
    trace.span_name = span_name(span_type, None, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOL_CALL_RESPONSE: &str = r#"{
        "choices": [{
            "message": {
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}
                }]
            }
        }]
    }"#;

    const TOOL_RESULT_REQUEST: &str = r#"{
        "messages": [
            {"role": "user", "content": "what's the weather"},
            {"role": "tool", "tool_call_id": "call_abc", "content": "{\"temp\": 12}"}
        ]
    }"#;

    const PLAIN_RESPONSE: &str =
        r#"{"choices":[{"message":{"role":"assistant","content":"sunny"}}]}"#;

    #[test]
    fn tool_call_is_detected_with_arguments_hash() {
        let call = detect_tool_call(TOOL_CALL_RESPONSE).unwrap();
        assert_eq!(call.id, "call_abc");
        assert_eq!(call.r#type, "function");
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(
            call.function.arguments_hash,
            sha256_hex("{\"city\":\"London\"}")
        );
    }

    #[test]
    fn tool_result_is_detected_with_content_hash() {
        let result = detect_tool_result(TOOL_RESULT_REQUEST).unwrap();
        assert_eq!(result.tool_call_id, "call_abc");
        assert_eq!(result.content, "{\"temp\": 12}");
        assert_eq!(result.content_hash, sha256_hex("{\"temp\": 12}"));
        assert!(!result.is_error);
    }

    #[test]
    fn tool_result_error_field_marks_error() {
        let body = r#"{"messages":[{"role":"tool","tool_call_id":"c1","content":"{\"error\":\"boom\"}"}]}"#;
        let result = detect_tool_result(body).unwrap();
        assert!(result.is_error);
        assert_eq!(result.error_message, "boom");
    }

    #[test]
    fn non_string_error_is_rendered_as_json() {
        let body = r#"{"messages":[{"role":"tool","tool_call_id":"c1","content":"{\"error\":{\"code\":500}}"}]}"#;
        let result = detect_tool_result(body).unwrap();
        assert!(result.is_error);
        assert_eq!(result.error_message, "{\"code\":500}");
    }

    #[test]
    fn tool_message_without_call_id_is_not_a_result() {
        let body = r#"{"messages":[{"role":"tool","content":"orphan"}]}"#;
        assert!(detect_tool_result(body).is_none());
    }

    #[test]
    fn classification_table_first_match_wins() {
        // Tool call in the response beats everything else.
        assert_eq!(
            classify(TOOL_RESULT_REQUEST, TOOL_CALL_RESPONSE),
            SpanType::ToolCall
        );
        // Tool result in the request beats choices in the response.
        assert_eq!(
            classify(TOOL_RESULT_REQUEST, PLAIN_RESPONSE),
            SpanType::ToolResult
        );
        // Choices without tool calls: final response.
        assert_eq!(classify("{}", PLAIN_RESPONSE), SpanType::FinalResponse);
        // Anything else: agent thinking.
        assert_eq!(classify("{}", "{}"), SpanType::AgentThinking);
        assert_eq!(classify("not json", "not json"), SpanType::AgentThinking);
    }

    #[test]
    fn enrich_names_tool_call_span_after_the_function() {
        let mut trace = TraceContext::default();
        enrich(&mut trace, "{}", TOOL_CALL_RESPONSE);
        assert_eq!(trace.span_type, Some(SpanType::ToolCall));
        assert_eq!(trace.span_name, "get_weather");
        assert!(trace.tool_call.is_some());
        assert!(trace.tool_result.is_none());
    }

    #[test]
    fn enrich_names_failed_tool_result_tool_error() {
        let body = r#"{"messages":[{"role":"tool","tool_call_id":"c1","content":"{\"error\":\"nope\"}"}]}"#;
        let mut trace = TraceContext::default();
        enrich(&mut trace, body, "{}");
        assert_eq!(trace.span_type, Some(SpanType::ToolResult));
        assert_eq!(trace.span_name, "tool_error");
    }

    #[test]
    fn enrich_defaults_to_agent_thinking() {
        let mut trace = TraceContext::default();
        enrich(&mut trace, "", "");
        assert_eq!(trace.span_type, Some(SpanType::AgentThinking));
        assert_eq!(trace.span_name, "agent_thinking");
    }
}
