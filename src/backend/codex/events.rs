//! `codex exec --json` protocol and its normalizer.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::context::ExecutionContext;
use crate::backend::events::{ContentBlock, ProviderMessage};
use crate::backend::{parse_event, EventNormalizer};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CodexEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },

    #[serde(rename = "turn.started")]
    TurnStarted,

    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<Usage>,
    },

    #[serde(rename = "turn.failed")]
    TurnFailed { error: ErrorInfo },

    #[serde(rename = "item.started", alias = "item.created")]
    ItemStarted { item: Item },

    #[serde(rename = "item.updated")]
    ItemUpdated { item: Item },

    #[serde(rename = "item.completed")]
    ItemCompleted { item: Item },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    Reasoning,
    CommandExecution {
        command: String,
        #[serde(default)]
        aggregated_output: String,
        #[serde(default)]
        exit_code: Option<i64>,
    },
    FileChange {
        #[serde(default)]
        changes: Vec<FileChange>,
    },
    McpToolCall {
        server: String,
        tool: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    WebSearch {
        #[serde(default)]
        query: String,
    },
    TodoList,
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Default)]
pub struct CodexNormalizer {
    /// Final answer of the turn, reported as the result text.
    last_agent_message: Option<String>,
}

impl CodexNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn item_started(&self, item: Item) -> Option<ProviderMessage> {
        let (name, input) = tool_call(&item.kind)?;
        Some(ProviderMessage::assistant(vec![ContentBlock::tool_use(
            name, item.id, input,
        )]))
    }

    fn item_completed(&mut self, item: Item) -> Option<ProviderMessage> {
        let id = item.id.clone();
        let result = match &item.kind {
            ItemKind::AgentMessage { text } => {
                if text.is_empty() {
                    return None;
                }
                self.last_agent_message = Some(text.clone());
                return Some(ProviderMessage::assistant_text(text.clone()));
            }
            ItemKind::Reasoning | ItemKind::TodoList | ItemKind::Unknown => return None,
            ItemKind::Error { message } => return Some(ProviderMessage::error(message.clone())),
            ItemKind::CommandExecution {
                aggregated_output,
                exit_code,
                ..
            } => {
                let mut out = aggregated_output.trim_end().to_string();
                if let Some(code) = exit_code.filter(|c| *c != 0) {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(&format!("Exit code: {}", code));
                }
                out
            }
            ItemKind::FileChange { changes } => format!("Updated {} files", changes.len()),
            ItemKind::McpToolCall { result, error, .. } => mcp_result_text(result.as_ref(), error.as_ref()),
            ItemKind::WebSearch { query } => format!("Searched the web for: {}", query),
        };
        let (name, input) = tool_call(&item.kind)?;
        Some(ProviderMessage::assistant(vec![
            ContentBlock::tool_use(name, id.clone(), input),
            ContentBlock::tool_result(id, result),
        ]))
    }
}

/// Tool name and input for items that represent tool calls.
fn tool_call(kind: &ItemKind) -> Option<(String, Value)> {
    match kind {
        ItemKind::CommandExecution { command, .. } => {
            Some(("Bash".to_string(), json!({ "command": command })))
        }
        ItemKind::FileChange { changes } => Some(("Edit".to_string(), json!({ "changes": changes }))),
        ItemKind::McpToolCall {
            server,
            tool,
            arguments,
            ..
        } => Some((format!("mcp__{}__{}", server, tool), arguments.clone())),
        ItemKind::WebSearch { query } => Some(("WebSearch".to_string(), json!({ "query": query }))),
        _ => None,
    }
}

fn mcp_result_text(result: Option<&Value>, error: Option<&Value>) -> String {
    if let Some(error) = error.filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string))
            .unwrap_or_else(|| error.to_string());
        return format!("Error: {}", message);
    }
    let Some(result) = result.filter(|r| !r.is_null()) else {
        return String::new();
    };
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

impl EventNormalizer for CodexNormalizer {
    fn normalize(&mut self, event: Value, ctx: &mut ExecutionContext) -> Option<ProviderMessage> {
        match parse_event::<CodexEvent>("codex", event)? {
            CodexEvent::ThreadStarted { thread_id } => {
                ctx.capture_session(&thread_id);
                None
            }
            CodexEvent::TurnStarted => {
                debug!("Codex turn started");
                None
            }
            CodexEvent::TurnCompleted { usage } => {
                if let Some(usage) = usage {
                    debug!(
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "Codex turn completed"
                    );
                }
                Some(ProviderMessage::success(self.last_agent_message.take()))
            }
            CodexEvent::TurnFailed { error } => Some(ProviderMessage::error(error.message)),
            CodexEvent::ItemStarted { item } => self.item_started(item),
            CodexEvent::ItemUpdated { item } => {
                debug!(item_id = %item.id, "Codex item updated");
                None
            }
            CodexEvent::ItemCompleted { item } => self.item_completed(item),
            CodexEvent::Error { message } => Some(ProviderMessage::error(message)),
            CodexEvent::Unknown => None,
        }
    }
}
