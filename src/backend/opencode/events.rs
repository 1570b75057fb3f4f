//! `opencode run --format json` protocol and its normalizer.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::context::ExecutionContext;
use crate::backend::events::{ContentBlock, ProviderMessage};
use crate::backend::{parse_event, EventNormalizer};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OpenCodeEvent {
    Init(SessionInfo),
    Session(SessionInfo),
    TextDelta {
        #[serde(default)]
        text: String,
        #[serde(default, alias = "sessionID")]
        session_id: Option<String>,
    },
    TextEnd,
    ToolCall {
        #[serde(default, alias = "callID")]
        call_id: Option<String>,
        #[serde(alias = "tool")]
        name: String,
        #[serde(default, alias = "input")]
        args: Value,
    },
    ToolResult {
        #[serde(default, alias = "callID")]
        call_id: Option<String>,
        #[serde(default, alias = "tool")]
        name: Option<String>,
        #[serde(default, alias = "result")]
        output: Value,
    },
    ToolError {
        #[serde(default, alias = "callID")]
        call_id: Option<String>,
        #[serde(default, alias = "tool")]
        name: Option<String>,
        #[serde(default)]
        error: Value,
    },
    StartStep,
    StepStart,
    FinishStep {
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        error: Option<Value>,
    },
    Finish {
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<Value>,
        #[serde(default, alias = "sessionID")]
        session_id: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    #[serde(default, alias = "sessionID")]
    pub session_id: Option<String>,
}

/// Error payloads are either a string or an object with `message`.
fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

fn output_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other
            .get("output")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[derive(Default)]
pub struct OpenCodeNormalizer {
    /// call id -> (tool name, input), for correlating results.
    pending: HashMap<String, (String, Value)>,
    last_call_id: Option<String>,
}

impl OpenCodeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results without a call id belong to the most recent call.
    fn resolve_call_id(&self, call_id: Option<String>, ctx: &mut ExecutionContext) -> String {
        call_id
            .filter(|id| !id.is_empty())
            .or_else(|| self.last_call_id.clone())
            .unwrap_or_else(|| ctx.next_tool_use_id("opencode"))
    }

    fn completed(&mut self, id: String, name: Option<String>, result: String) -> ProviderMessage {
        let (pending_name, input) = self
            .pending
            .remove(&id)
            .unwrap_or_else(|| ("unknown".to_string(), Value::Null));
        let name = name.filter(|n| !n.is_empty()).unwrap_or(pending_name);
        ProviderMessage::assistant(vec![
            ContentBlock::tool_use(name, id.clone(), input),
            ContentBlock::tool_result(id, result),
        ])
    }
}

impl EventNormalizer for OpenCodeNormalizer {
    fn normalize(&mut self, event: Value, ctx: &mut ExecutionContext) -> Option<ProviderMessage> {
        match parse_event::<OpenCodeEvent>("opencode", event)? {
            OpenCodeEvent::Init(info) | OpenCodeEvent::Session(info) => {
                if let Some(id) = info.session_id.as_deref() {
                    ctx.capture_session(id);
                }
                None
            }

            OpenCodeEvent::TextDelta { text, session_id } => {
                if text.is_empty() {
                    return None;
                }
                Some(ProviderMessage::assistant_text(text).with_session_id(session_id.as_deref()))
            }

            OpenCodeEvent::ToolCall {
                call_id,
                name,
                args,
            } => {
                let id = call_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| ctx.next_tool_use_id("opencode"));
                self.pending.insert(id.clone(), (name.clone(), args.clone()));
                self.last_call_id = Some(id.clone());
                Some(ProviderMessage::assistant(vec![ContentBlock::tool_use(name, id, args)]))
            }

            OpenCodeEvent::ToolResult {
                call_id,
                name,
                output,
            } => {
                let id = self.resolve_call_id(call_id, ctx);
                Some(self.completed(id, name, output_text(&output)))
            }

            OpenCodeEvent::ToolError {
                call_id,
                name,
                error,
            } => {
                let id = self.resolve_call_id(call_id, ctx);
                let message = error_text(&error).unwrap_or_else(|| "Tool failed".to_string());
                Some(self.completed(id, name, format!("Error: {}", message)))
            }

            OpenCodeEvent::TextEnd | OpenCodeEvent::StartStep | OpenCodeEvent::StepStart => None,

            OpenCodeEvent::FinishStep { success, error } => {
                let error = error.as_ref().and_then(error_text);
                if success == Some(false) || error.is_some() {
                    return Some(ProviderMessage::error(
                        error.unwrap_or_else(|| "OpenCode step failed".to_string()),
                    ));
                }
                debug!("OpenCode step finished");
                None
            }

            OpenCodeEvent::Finish {
                success,
                result,
                error,
                session_id,
            } => {
                let error = error.as_ref().and_then(error_text);
                let message = if success.unwrap_or(error.is_none()) {
                    ProviderMessage::success(result.filter(|r| !r.is_empty()))
                } else {
                    ProviderMessage::error(error.unwrap_or_else(|| "OpenCode run failed".to_string()))
                };
                Some(message.with_session_id(session_id.as_deref()))
            }

            OpenCodeEvent::Error { message, error } => {
                let text = message
                    .filter(|m| !m.is_empty())
                    .or_else(|| error.as_ref().and_then(error_text))
                    .unwrap_or_else(|| "OpenCode reported an error".to_string());
                Some(ProviderMessage::error(text))
            }

            OpenCodeEvent::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MessagePipeline;
    use serde_json::json;

    fn run(events: Vec<Value>) -> Vec<ProviderMessage> {
        let mut pipeline = MessagePipeline::new(Box::new(OpenCodeNormalizer::new()), false);
        let mut out: Vec<ProviderMessage> = events.into_iter().flat_map(|e| pipeline.push(e)).collect();
        out.extend(pipeline.finish());
        out
    }

    #[test]
    fn test_clean_run() {
        let out = run(vec![
            json!({"type": "init", "session_id": "s1"}),
            json!({"type": "text-delta", "text": "Hi"}),
            json!({"type": "finish", "success": true}),
        ]);
        assert_eq!(
            out,
            vec![
                ProviderMessage::assistant_text("Hi").with_session_id(Some("s1")),
                ProviderMessage::success(None).with_session_id(Some("s1")),
            ]
        );
        let result = serde_json::to_value(&out[1]).unwrap();
        assert_eq!(result, json!({"type": "result", "subtype": "success", "session_id": "s1"}));
    }

    #[test]
    fn test_text_before_session_is_backfilled() {
        let out = run(vec![
            json!({"type": "text-delta", "text": "early"}),
            json!({"type": "session", "sessionID": "ses_42"}),
            json!({"type": "text-delta", "text": ""}),
            json!({"type": "text-end"}),
        ]);
        assert_eq!(out, vec![ProviderMessage::assistant_text("early").with_session_id(Some("ses_42"))]);
    }

    #[test]
    fn test_tool_calls_without_ids_use_execution_counter() {
        let out = run(vec![
            json!({"type": "init", "session_id": "s1"}),
            json!({"type": "start-step"}),
            json!({"type": "tool-call", "name": "bash", "args": {"command": "ls"}}),
            json!({"type": "tool-result", "output": "Cargo.toml"}),
            json!({"type": "tool-call", "name": "read", "args": {"filePath": "x"}}),
            json!({"type": "tool-error", "error": {"message": "ENOENT"}}),
            json!({"type": "finish-step", "success": true}),
        ]);
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[1].content().unwrap(),
            &[
                ContentBlock::tool_use("bash", "opencode-tool-1", json!({"command": "ls"})),
                ContentBlock::tool_result("opencode-tool-1", "Cargo.toml"),
            ]
        );
        assert_eq!(
            out[3].content().unwrap()[1],
            ContentBlock::tool_result("opencode-tool-2", "Error: ENOENT")
        );
    }

    #[test]
    fn test_failures() {
        let out = run(vec![
            json!({"type": "init", "session_id": "s1"}),
            json!({"type": "finish-step", "success": false, "error": "model overloaded"}),
            json!({"type": "error", "error": {"message": "ProviderModelNotFoundError"}}),
            json!({"type": "finish", "success": false}),
        ]);
        assert_eq!(
            out,
            vec![
                ProviderMessage::error("model overloaded").with_session_id(Some("s1")),
                ProviderMessage::error("ProviderModelNotFoundError").with_session_id(Some("s1")),
                ProviderMessage::error("OpenCode run failed").with_session_id(Some("s1")),
            ]
        );
    }
}
