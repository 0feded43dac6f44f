use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Role a request/response pair plays inside an agent workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanType {
    UserPrompt,
    AgentThinking,
    ToolCall,
    ToolResult,
    FinalResponse,
    Error,
}

impl SpanType {
    /// Canonical string form, shared with the hash chain.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::UserPrompt => "USER_PROMPT",
            SpanType::AgentThinking => "AGENT_THINKING",
            SpanType::ToolCall => "TOOL_CALL",
            SpanType::ToolResult => "TOOL_RESULT",
            SpanType::FinalResponse => "FINAL_RESPONSE",
            SpanType::Error => "ERROR",
        }
    }
}

/// Distributed tracing metadata attached to an audit entry.
///
/// Identifiers follow the OpenTelemetry shape: 128-bit trace ids and
/// 64-bit span ids, rendered as lowercase hex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceContext {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub span_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_type: Option<SpanType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub span_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// A tool invocation detected in a response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCall,
    /// Position within the response's tool_calls array; only the first
    /// call is tracked today.
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
    /// Hex SHA-256 of `arguments`, included in the chain hash.
    pub arguments_hash: String,
}

/// A tool execution result detected in a request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultInfo {
    pub tool_call_id: String,
    pub content: String,
    /// Hex SHA-256 of `content`, included in the chain hash.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}
