//! Cursor tool-call handler table.
//!
//! Cursor reports tool calls as `{"<variant>ToolCall": {"args": .., "result": ..}}`.
//! Each handler renames the variant's arguments into the common tool
//! vocabulary and formats its success payload as text.

use serde_json::{Map, Value};
use tracing::warn;

pub struct ToolHandler {
    pub variant: &'static str,
    pub name: &'static str,
    /// `(cursor key, normalized key)` pairs; other keys pass through unchanged.
    pub renames: &'static [(&'static str, &'static str)],
    pub format_success: fn(&Value) -> String,
}

pub const HANDLERS: &[ToolHandler] = &[
    ToolHandler {
        variant: "readToolCall",
        name: "Read",
        renames: &[("path", "file_path")],
        format_success: format_read,
    },
    ToolHandler {
        variant: "writeToolCall",
        name: "Write",
        renames: &[("path", "file_path"), ("fileText", "content")],
        format_success: format_write,
    },
    ToolHandler {
        variant: "editToolCall",
        name: "Edit",
        renames: &[("path", "file_path")],
        format_success: format_edit,
    },
    ToolHandler {
        variant: "deleteToolCall",
        name: "Delete",
        renames: &[("path", "file_path")],
        format_success: format_delete,
    },
    ToolHandler {
        variant: "shellToolCall",
        name: "Bash",
        renames: &[("workingDirectory", "cwd")],
        format_success: format_shell,
    },
    ToolHandler {
        variant: "grepToolCall",
        name: "Grep",
        renames: &[],
        format_success: format_generic,
    },
    ToolHandler {
        variant: "globToolCall",
        name: "Glob",
        renames: &[("globPattern", "pattern"), ("targetDirectory", "path")],
        format_success: format_glob,
    },
    ToolHandler {
        variant: "lsToolCall",
        name: "Ls",
        renames: &[],
        format_success: format_generic,
    },
    ToolHandler {
        variant: "updateTodosToolCall",
        name: "TodoWrite",
        renames: &[],
        format_success: format_todos,
    },
];

pub fn lookup(variant: &str) -> Option<&'static ToolHandler> {
    HANDLERS.iter().find(|h| h.variant == variant)
}

/// A tool call in the common vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCall {
    pub name: String,
    pub input: Value,
    /// Formatted result, present once the call completed.
    pub result: Option<String>,
}

/// Normalize one `tool_call` payload. `None` only when it is empty.
pub fn normalize_call(tool_call: &Map<String, Value>) -> Option<NormalizedCall> {
    let (variant, body) = tool_call.iter().next()?;

    if let Some(handler) = lookup(variant) {
        let input = rename_keys(body.get("args"), handler.renames);
        let result = body
            .get("result")
            .map(|r| format_result(r, handler.format_success));
        return Some(NormalizedCall {
            name: handler.name.to_string(),
            input,
            result,
        });
    }

    if variant == "function" {
        if let Some(name) = body.get("name").and_then(Value::as_str) {
            let input = match body.get("arguments") {
                Some(Value::String(raw)) => serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.clone())),
                Some(other) => other.clone(),
                None => Value::Object(Map::new()),
            };
            let result = body
                .get("result")
                .map(|r| format_result(r, format_generic));
            return Some(NormalizedCall {
                name: name.to_string(),
                input,
                result,
            });
        }
    }

    let keys: Vec<&str> = body
        .as_object()
        .map(|o| o.keys().map(String::as_str).collect())
        .unwrap_or_default();
    warn!(variant = %variant, keys = ?keys, "Unrecognized Cursor tool call shape");
    Some(NormalizedCall {
        name: variant.trim_end_matches("ToolCall").to_string(),
        input: body.get("args").cloned().unwrap_or(Value::Null),
        result: body.get("result").map(|r| format_result(r, format_generic)),
    })
}

fn rename_keys(args: Option<&Value>, renames: &[(&str, &str)]) -> Value {
    let Some(Value::Object(args)) = args else {
        return args.cloned().unwrap_or_else(|| Value::Object(Map::new()));
    };
    let mut out = Map::new();
    for (key, value) in args {
        let key = renames
            .iter()
            .find(|(from, _)| from == key)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| key.clone());
        out.insert(key, value.clone());
    }
    Value::Object(out)
}

/// Dispatch on the result shape: `success`, `error`, or `rejected`.
fn format_result(result: &Value, format_success: fn(&Value) -> String) -> String {
    if let Some(rejected) = result.get("rejected") {
        let reason = rejected
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return format!("Tool call rejected: {}", reason);
    }
    if let Some(error) = result.get("error") {
        let message = error
            .get("errorMessage")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return format!("Error: {}", message);
    }
    match result.get("success").or_else(|| result.get("failure")) {
        Some(payload) => format_success(payload),
        None => format_generic(result),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn format_read(success: &Value) -> String {
    str_field(success, "content")
        .map(str::to_string)
        .unwrap_or_else(|| format_generic(success))
}

fn format_write(success: &Value) -> String {
    let path = str_field(success, "path").unwrap_or("file");
    match success.get("linesCreated").and_then(Value::as_u64) {
        Some(lines) => format!("Wrote {} lines to {}", lines, path),
        None => format!("Wrote {}", path),
    }
}

fn format_edit(success: &Value) -> String {
    if let Some(diff) = str_field(success, "diffString").filter(|d| !d.is_empty()) {
        return diff.to_string();
    }
    format!("Edited {}", str_field(success, "path").unwrap_or("file"))
}

fn format_delete(success: &Value) -> String {
    format!("Deleted {}", str_field(success, "path").unwrap_or("file"))
}

fn format_shell(success: &Value) -> String {
    let mut out = String::new();
    if let Some(stdout) = str_field(success, "stdout") {
        out.push_str(stdout.trim_end());
    }
    if let Some(stderr) = str_field(success, "stderr").filter(|s| !s.trim().is_empty()) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(stderr.trim_end());
    }
    if let Some(code) = success.get("exitCode").and_then(Value::as_i64).filter(|c| *c != 0) {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("Exit code: {}", code));
    }
    out
}

fn format_glob(success: &Value) -> String {
    match success.get("files").and_then(Value::as_array) {
        Some(files) => files
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        None => format_generic(success),
    }
}

fn format_todos(success: &Value) -> String {
    let count = success
        .get("todos")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    format!("Updated {} todos", count)
}

fn format_generic(value: &Value) -> String {
    ["content", "output", "stdout", "text"]
        .iter()
        .find_map(|key| str_field(value, key))
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(v: Value) -> NormalizedCall {
        normalize_call(v.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_read_maps_path_and_formats_content() {
        let c = call(json!({"readToolCall": {
            "args": {"path": "src/main.rs"},
            "result": {"success": {"content": "fn main() {}", "totalLines": 1}}
        }}));
        assert_eq!(c.name, "Read");
        assert_eq!(c.input, json!({"file_path": "src/main.rs"}));
        assert_eq!(c.result.as_deref(), Some("fn main() {}"));
    }

    #[test]
    fn test_write_renames_file_text() {
        let c = call(json!({"writeToolCall": {"args": {"path": "a.txt", "fileText": "hi"}}}));
        assert_eq!(c.name, "Write");
        assert_eq!(c.input, json!({"file_path": "a.txt", "content": "hi"}));
        assert_eq!(c.result, None);
    }

    #[test]
    fn test_glob_renames_pattern_and_directory() {
        let c = call(json!({"globToolCall": {
            "args": {"globPattern": "**/*.rs", "targetDirectory": "src"},
            "result": {"success": {"files": ["src/a.rs", "src/b.rs"]}}
        }}));
        assert_eq!(c.input, json!({"pattern": "**/*.rs", "path": "src"}));
        assert_eq!(c.result.as_deref(), Some("src/a.rs\nsrc/b.rs"));
    }

    #[test]
    fn test_shell_output_includes_failure_exit_code() {
        let c = call(json!({"shellToolCall": {
            "args": {"command": "cargo fmt --check"},
            "result": {"failure": {"stdout": "Diff in a.rs", "stderr": "", "exitCode": 1}}
        }}));
        assert_eq!(c.name, "Bash");
        assert_eq!(c.input, json!({"command": "cargo fmt --check"}));
        assert_eq!(c.result.as_deref(), Some("Diff in a.rs\n\nExit code: 1"));
    }

    #[test]
    fn test_rejected_and_error_results() {
        let rejected = call(json!({"deleteToolCall": {
            "args": {"path": "important.db"},
            "result": {"rejected": {"reason": "user denied"}}
        }}));
        assert_eq!(rejected.result.as_deref(), Some("Tool call rejected: user denied"));

        let failed = call(json!({"editToolCall": {
            "args": {"path": "x"},
            "result": {"error": {"errorMessage": "file not found"}}
        }}));
        assert_eq!(failed.result.as_deref(), Some("Error: file not found"));
    }

    #[test]
    fn test_function_fallback_decodes_arguments() {
        let c = call(json!({"function": {"name": "web_fetch", "arguments": "{\"url\":\"https://example.com\"}"}}));
        assert_eq!(c.name, "web_fetch");
        assert_eq!(c.input, json!({"url": "https://example.com"}));

        let raw = call(json!({"function": {"name": "odd", "arguments": "not json"}}));
        assert_eq!(raw.input, json!("not json"));
    }

    #[test]
    fn test_unknown_variant_still_produces_a_call() {
        let c = call(json!({"mysteryToolCall": {"args": {"x": 1}}}));
        assert_eq!(c.name, "mystery");
        assert_eq!(c.input, json!({"x": 1}));
        assert!(normalize_call(&Map::new()).is_none());
    }
}
