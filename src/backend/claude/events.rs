//! Claude Code `stream-json` protocol and its normalizer.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::context::ExecutionContext;
use crate::backend::events::{ContentBlock, ProviderMessage};
use crate::backend::{parse_event, EventNormalizer};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeEvent {
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: RawMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    User {
        message: RawMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    Result(ResultEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub content: Vec<RawBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    /// Thinking and redacted thinking are not forwarded.
    #[serde(other)]
    Other,
}

/// Tool output is either plain text or a list of content parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(Vec<Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    /// Text parts joined by newlines; images become `[image]`.
    pub fn to_string_lossy(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Structured(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|item| {
                        if item.get("type").and_then(Value::as_str) == Some("image") {
                            Some("[image]".to_string())
                        } else {
                            item.get("text").and_then(Value::as_str).map(str::to_string)
                        }
                    })
                    .collect();
                if parts.is_empty() {
                    Value::Array(items.clone()).to_string()
                } else {
                    parts.join("\n")
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
}

impl ResultEvent {
    fn is_failure(&self) -> bool {
        let text = self.result.as_deref().unwrap_or("");
        let looks_like_api_error = text.starts_with("API Error:")
            || text.contains("\"type\":\"error\"")
            || text.contains("\"type\":\"overloaded_error\"")
            || text.contains("\"type\":\"api_error\"");
        self.is_error || self.subtype == "error" || looks_like_api_error
    }

    /// Best available error text; embedded API error JSON is unwrapped.
    pub fn error_message(&self) -> String {
        let raw = [self.result.as_deref(), self.error.as_deref()]
            .into_iter()
            .flatten()
            .chain(self.errors.iter().map(String::as_str))
            .find(|s| !s.is_empty())
            .unwrap_or("Claude run failed");
        parse_error_json(raw).unwrap_or_else(|| raw.to_string())
    }
}

/// `402 {"error":{"message":"..."}}` -> the inner message.
fn parse_error_json(raw: &str) -> Option<String> {
    let json = raw.find('{').map(|idx| &raw[idx..])?;
    let parsed: Value = serde_json::from_str(json).ok()?;
    parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| parsed.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Default)]
pub struct ClaudeNormalizer {
    /// tool_use id -> (name, input), for correlating results.
    pending_tools: HashMap<String, (String, Value)>,
}

impl ClaudeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventNormalizer for ClaudeNormalizer {
    fn normalize(&mut self, event: Value, ctx: &mut ExecutionContext) -> Option<ProviderMessage> {
        match parse_event::<ClaudeEvent>("claude", event)? {
            ClaudeEvent::System {
                subtype,
                session_id,
                model,
            } => {
                if let Some(id) = session_id.as_deref() {
                    ctx.capture_session(id);
                }
                debug!(subtype = %subtype, model = ?model, "Claude system event");
                None
            }

            ClaudeEvent::Assistant {
                message,
                session_id,
            } => {
                let mut content = Vec::new();
                for block in message.content {
                    match block {
                        RawBlock::Text { text } if !text.is_empty() => {
                            content.push(ContentBlock::text(text))
                        }
                        RawBlock::ToolUse { id, name, input } => {
                            self.pending_tools
                                .insert(id.clone(), (name.clone(), input.clone()));
                            content.push(ContentBlock::tool_use(name, id, input));
                        }
                        _ => {}
                    }
                }
                if content.is_empty() {
                    return None;
                }
                Some(ProviderMessage::assistant(content).with_session_id(session_id.as_deref()))
            }

            ClaudeEvent::User {
                message,
                session_id,
            } => {
                let mut content = Vec::new();
                for block in message.content {
                    if let RawBlock::ToolResult {
                        tool_use_id,
                        content: result,
                        is_error,
                    } = block
                    {
                        let (name, input) = self
                            .pending_tools
                            .remove(&tool_use_id)
                            .unwrap_or_else(|| ("unknown".to_string(), Value::Null));
                        let mut text = result.to_string_lossy();
                        if is_error && !text.starts_with("Error") {
                            text = format!("Error: {}", text);
                        }
                        content.push(ContentBlock::tool_use(name, tool_use_id.clone(), input));
                        content.push(ContentBlock::tool_result(tool_use_id, text));
                    }
                }
                if content.is_empty() {
                    return None;
                }
                Some(ProviderMessage::assistant(content).with_session_id(session_id.as_deref()))
            }

            ClaudeEvent::Result(res) => {
                let session_id = res.session_id.clone();
                if res.is_failure() {
                    Some(ProviderMessage::error(res.error_message()).with_session_id(session_id.as_deref()))
                } else {
                    debug!(
                        subtype = %res.subtype,
                        cost_usd = ?res.total_cost_usd,
                        turns = ?res.num_turns,
                        "Claude run finished"
                    );
                    Some(ProviderMessage::success(res.result).with_session_id(session_id.as_deref()))
                }
            }

            ClaudeEvent::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MessagePipeline;
    use serde_json::json;

    fn run(events: Vec<Value>) -> Vec<ProviderMessage> {
        let mut pipeline = MessagePipeline::new(Box::new(ClaudeNormalizer::new()), false);
        let mut out: Vec<ProviderMessage> = events.into_iter().flat_map(|e| pipeline.push(e)).collect();
        out.extend(pipeline.finish());
        out
    }

    #[test]
    fn test_tool_round_trip_correlates_name_and_input() {
        let out = run(vec![
            json!({"type": "system", "subtype": "init", "session_id": "s1", "tools": ["Read"]}),
            json!({"type": "assistant", "session_id": "s1", "message": {"content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Reading."},
                {"type": "tool_use", "id": "tu_1", "name": "Read", "input": {"file_path": "a.rs"}}
            ]}}),
            json!({"type": "user", "session_id": "s1", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "tu_1", "content": [{"type": "text", "text": "fn main() {}"}]}
            ]}}),
            json!({"type": "result", "subtype": "success", "session_id": "s1", "is_error": false, "result": "Done"}),
        ]);

        assert_eq!(out.len(), 3);
        let first = out[0].content().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].as_text(), Some("Reading."));

        let second = out[1].content().unwrap();
        assert_eq!(
            second[0],
            ContentBlock::tool_use("Read", "tu_1", json!({"file_path": "a.rs"}))
        );
        assert_eq!(second[1], ContentBlock::tool_result("tu_1", "fn main() {}"));

        assert_eq!(
            out[2],
            ProviderMessage::success(Some("Done".to_string())).with_session_id(Some("s1"))
        );
    }

    #[test]
    fn test_api_error_in_result_text_is_error() {
        let out = run(vec![json!({
            "type": "result", "subtype": "success", "session_id": "s1", "is_error": false,
            "result": "API Error: 529 {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}"
        })]);
        assert_eq!(out, vec![ProviderMessage::error("Overloaded").with_session_id(Some("s1"))]);
    }

    #[test]
    fn test_error_falls_back_to_errors_array() {
        let out = run(vec![json!({
            "type": "result", "subtype": "error_during_execution", "session_id": "s1",
            "is_error": true, "errors": ["session expired"]
        })]);
        assert_eq!(out, vec![ProviderMessage::error("session expired").with_session_id(Some("s1"))]);
    }

    #[test]
    fn test_unknown_and_thinking_only_events_produce_nothing() {
        let out = run(vec![
            json!({"type": "system", "subtype": "init", "session_id": "s1"}),
            json!({"type": "stream_event", "session_id": "s1", "event": {"type": "message_stop"}}),
            json!({"type": "assistant", "session_id": "s1", "message": {"content": [{"type": "thinking", "thinking": "x"}]}}),
        ]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_structured_tool_result_renders_images() {
        let content = ToolResultContent::Structured(vec![
            json!({"type": "text", "text": "before"}),
            json!({"type": "image", "source": {"data": "abc"}}),
        ]);
        assert_eq!(content.to_string_lossy(), "before\n[image]");
    }
}
