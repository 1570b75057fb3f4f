//! cursor-agent `stream-json` protocol and its normalizer.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::tools::normalize_call;
use crate::backend::context::ExecutionContext;
use crate::backend::events::{ContentBlock, ProviderMessage};
use crate::backend::{parse_event, EventNormalizer};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    /// Echo of the prompt.
    User,
    Assistant {
        message: CursorMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    Thinking,
    ToolCall {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        tool_call: Map<String, Value>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorMessage {
    #[serde(default)]
    pub content: Vec<CursorBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Default)]
pub struct CursorNormalizer {
    /// Id of the last `started` call, reused by a `completed` that omits its own.
    last_call_id: Option<String>,
}

impl CursorNormalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventNormalizer for CursorNormalizer {
    fn normalize(&mut self, event: Value, ctx: &mut ExecutionContext) -> Option<ProviderMessage> {
        match parse_event::<CursorEvent>("cursor", event)? {
            CursorEvent::System {
                subtype,
                session_id,
                model,
            } => {
                if let Some(id) = session_id.as_deref() {
                    ctx.capture_session(id);
                }
                debug!(subtype = ?subtype, model = ?model, "Cursor system event");
                None
            }

            CursorEvent::User | CursorEvent::Thinking | CursorEvent::Unknown => None,

            CursorEvent::Assistant {
                message,
                session_id,
            } => {
                let content: Vec<ContentBlock> = message
                    .content
                    .into_iter()
                    .filter_map(|block| match block {
                        CursorBlock::Text { text } if !text.is_empty() => {
                            Some(ContentBlock::text(text))
                        }
                        _ => None,
                    })
                    .collect();
                if content.is_empty() {
                    return None;
                }
                Some(ProviderMessage::assistant(content).with_session_id(session_id.as_deref()))
            }

            CursorEvent::ToolCall {
                subtype,
                call_id,
                tool_call,
                session_id,
            } => {
                let call = normalize_call(&tool_call)?;
                let call_id = call_id.filter(|id| !id.is_empty());
                let id = match subtype.as_str() {
                    "started" => {
                        let id = call_id.unwrap_or_else(|| ctx.next_tool_use_id("cursor"));
                        self.last_call_id = Some(id.clone());
                        id
                    }
                    "completed" => {
                        let last = self.last_call_id.take();
                        call_id
                            .or(last)
                            .unwrap_or_else(|| ctx.next_tool_use_id("cursor"))
                    }
                    other => {
                        debug!(subtype = %other, "Ignoring Cursor tool_call subtype");
                        return None;
                    }
                };
                let mut content = vec![ContentBlock::tool_use(call.name, id.clone(), call.input)];
                if subtype == "completed" {
                    content.push(ContentBlock::tool_result(id, call.result.unwrap_or_default()));
                }
                Some(ProviderMessage::assistant(content).with_session_id(session_id.as_deref()))
            }

            CursorEvent::Result {
                subtype,
                is_error,
                result,
                session_id,
                duration_ms,
            } => {
                if is_error || subtype.as_deref() == Some("error") {
                    let error = result
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Cursor run failed".to_string());
                    return Some(ProviderMessage::error(error).with_session_id(session_id.as_deref()));
                }
                debug!(duration_ms = ?duration_ms, "Cursor run finished");
                Some(ProviderMessage::success(result).with_session_id(session_id.as_deref()))
            }
        }
    }
}
