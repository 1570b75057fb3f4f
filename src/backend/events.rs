//! Backend-agnostic messages yielded to callers.
//!
//! Every backend normalizes its own JSONL protocol into [`ProviderMessage`].
//! Backend-specific fields never appear here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One block of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        tool_use_id: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(name: impl Into<String>, tool_use_id: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            name: name.into(),
            tool_use_id: tool_use_id.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

/// Canonical message. This is the only shape callers depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderMessage {
    Assistant {
        #[serde(default)]
        session_id: Option<String>,
        message: AssistantMessage,
    },
    Error {
        #[serde(default)]
        session_id: Option<String>,
        error: String,
    },
    Result {
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

impl ProviderMessage {
    /// Assistant message with the given blocks. Session id is filled in later.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        ProviderMessage::Assistant {
            session_id: None,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content,
            },
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![ContentBlock::text(text)])
    }

    pub fn error(error: impl Into<String>) -> Self {
        ProviderMessage::Error {
            session_id: None,
            error: error.into(),
        }
    }

    pub fn success(result: Option<String>) -> Self {
        ProviderMessage::Result {
            subtype: "success".to_string(),
            session_id: None,
            result,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        let id = match self {
            ProviderMessage::Assistant { session_id, .. }
            | ProviderMessage::Error { session_id, .. }
            | ProviderMessage::Result { session_id, .. } => session_id,
        };
        id.as_deref().filter(|s| !s.is_empty())
    }

    /// Set the session id if the message does not carry one yet.
    pub fn backfill_session_id(&mut self, id: &str) {
        let slot = match self {
            ProviderMessage::Assistant { session_id, .. }
            | ProviderMessage::Error { session_id, .. }
            | ProviderMessage::Result { session_id, .. } => session_id,
        };
        if slot.as_deref().map_or(true, str::is_empty) {
            *slot = Some(id.to_string());
        }
    }

    pub fn with_session_id(mut self, id: Option<&str>) -> Self {
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if let ProviderMessage::Assistant { session_id, .. }
            | ProviderMessage::Error { session_id, .. }
            | ProviderMessage::Result { session_id, .. } = &mut self
            {
                *session_id = Some(id.to_string());
            }
        }
        self
    }

    pub fn content(&self) -> Option<&[ContentBlock]> {
        match self {
            ProviderMessage::Assistant { message, .. } => Some(&message.content),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_text_serializes_to_canonical_shape() {
        let msg = ProviderMessage::assistant_text("Hi").with_session_id(Some("s1"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "assistant",
                "session_id": "s1",
                "message": {"role": "assistant", "content": [{"type": "text", "text": "Hi"}]}
            })
        );
    }

    #[test]
    fn result_omits_missing_result_text() {
        let msg = ProviderMessage::success(None).with_session_id(Some("s1"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "result", "subtype": "success", "session_id": "s1"})
        );
    }

    #[test]
    fn backfill_does_not_overwrite_existing_id() {
        let mut msg = ProviderMessage::error("boom").with_session_id(Some("first"));
        msg.backfill_session_id("second");
        assert_eq!(msg.session_id(), Some("first"));

        let mut empty = ProviderMessage::error("boom");
        empty.backfill_session_id("second");
        assert_eq!(empty.session_id(), Some("second"));
    }

    #[test]
    fn tool_blocks_use_snake_case_tags() {
        let block = ContentBlock::tool_use("Read", "call-1", json!({"file_path": "a.rs"}));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["tool_use_id"], "call-1");
    }
}
