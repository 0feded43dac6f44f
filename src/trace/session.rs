//! Conversation-level metadata derived from chat request bodies.
//!
//! Chat requests replay the full message history on every turn, which is
//! enough to thread exchanges into conversations without any session
//! state: the first user message hashes into a stable conversation id.

use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMetadata {
    pub message_count: usize,
    pub has_assistant: bool,
    pub has_tool_messages: bool,
    /// First 16 hex chars of SHA-256 of the first user message; groups
    /// all turns of one conversation. Empty when no user message exists.
    pub conversation_id: String,
}

/// Analyze a chat request body. Returns `None` for non-chat bodies.
pub fn extract_conversation_metadata(request_body: &str) -> Option<ConversationMetadata> {
    if request_body.is_empty() {
        return None;
    }
    let req: ChatRequest = serde_json::from_str(request_body).ok()?;
    if req.messages.is_empty() {
        return None;
    }

    let mut meta = ConversationMetadata {
        message_count: req.messages.len(),
        has_assistant: false,
        has_tool_messages: false,
        conversation_id: String::new(),
    };

    let mut first_user_content = "";
    for msg in &req.messages {
        match msg.role.as_str() {
            "assistant" => meta.has_assistant = true,
            "tool" => meta.has_tool_messages = true,
            "user" => {
                if first_user_content.is_empty() && !msg.content.is_empty() {
                    first_user_content = &msg.content;
                }
            }
            _ => {}
        }
    }

    if !first_user_content.is_empty() {
        let digest = Sha256::digest(first_user_content.as_bytes());
        meta.conversation_id = hex::encode(&digest[..8]);
    }

    Some(meta)
}

/// A conversation is multi-turn once it carries prior assistant or tool
/// messages, or more than a system + user pair.
pub fn is_multi_turn(request_body: &str) -> bool {
    match extract_conversation_metadata(request_body) {
        Some(meta) => meta.has_assistant || meta.has_tool_messages || meta.message_count > 2,
        None => false,
    }
}
