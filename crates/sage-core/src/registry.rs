//! Tool name/argument normalization and dispatch (C5).
//!
//! Models are inconsistent about casing when they call tools, so the
//! registry normalizes both the tool name and its argument keys before
//! looking anything up, rather than requiring callers to get it exactly
//! right.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// A tool's declared shape, sent to the model as part of the chat-completions
/// request so it knows what's callable.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Successful output of a tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerOutput {
    pub content: String,
    pub is_error: bool,
}

impl HandlerOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolHandlerError {
    #[error("missing required argument: {0}")]
    MissingArgument(String),
    #[error("invalid argument {0}: {1}")]
    InvalidArgument(String, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A tool implementation. Registered under a canonical snake_case name;
/// the registry handles translating whatever casing the model used.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn call(&self, args: HashMap<String, Value>) -> Result<HandlerOutput, ToolHandlerError>;
}

/// Converts a PascalCase/camelCase/SCREAMING_SNAKE_CASE name to snake_case
/// by splitting at uppercase-letter boundaries and lowercasing. Done with a
/// manual scan rather than a lookaround regex, since `regex` doesn't
/// support lookaround.
fn to_snake_case(name: &str) -> String {
    manual_snake_boundaries(name)
        .replace(['-', ' '], "_")
        .to_lowercase()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Uppercase-boundary split: a lowercase-to-uppercase transition, or an
/// uppercase run followed by a lowercase letter (`HTTPServer` -> `http_server`).
fn manual_snake_boundaries(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::new();
    for (i, &c) in chars.iter().enumerate() {
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        let next = chars.get(i + 1).copied();

        let boundary = match prev {
            Some(p) if p.is_lowercase() || p.is_ascii_digit() => c.is_uppercase(),
            Some(p) if p.is_uppercase() => c.is_uppercase() && next.map(|n| n.is_lowercase()).unwrap_or(false),
            _ => false,
        };

        if boundary && i > 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}

/// camelCase -> snake_case for argument keys not covered by the alias table.
fn camel_to_snake(key: &str) -> String {
    to_snake_case(key)
}

/// Known argument aliases the registry rewrites to the canonical name
/// before dispatch, keyed by the canonical tool name. `*` entries apply to
/// every tool.
fn parameter_aliases() -> &'static HashMap<&'static str, HashMap<&'static str, &'static str>> {
    static ALIASES: OnceLock<HashMap<&'static str, HashMap<&'static str, &'static str>>> = OnceLock::new();
    ALIASES.get_or_init(|| {
        let mut m: HashMap<&'static str, HashMap<&'static str, &'static str>> = HashMap::new();

        let mut global = HashMap::new();
        global.insert("filepath", "file_path");
        global.insert("filename", "file_path");
        global.insert("path", "file_path");
        m.insert("*", global);

        let mut edit_file = HashMap::new();
        edit_file.insert("old", "old_string");
        edit_file.insert("new", "new_string");
        edit_file.insert("oldstring", "old_string");
        edit_file.insert("newstring", "new_string");
        m.insert("edit_file", edit_file);

        let mut run_command = HashMap::new();
        run_command.insert("cmd", "command");
        run_command.insert("workingdirectory", "working_dir");
        run_command.insert("cwd", "working_dir");
        m.insert("run_command", run_command);

        let mut search_files = HashMap::new();
        search_files.insert("query", "pattern");
        search_files.insert("regex", "pattern");
        m.insert("search_files", search_files);

        m
    })
}

fn normalize_arguments(tool_name: &str, args: HashMap<String, Value>) -> HashMap<String, Value> {
    let aliases = parameter_aliases();
    let global = aliases.get("*");
    let specific = aliases.get(tool_name);

    args.into_iter()
        .map(|(key, value)| {
            let snake = camel_to_snake(&key);
            let canonical = specific
                .and_then(|m| m.get(snake.as_str()))
                .or_else(|| global.and_then(|m| m.get(snake.as_str())))
                .map(|s| s.to_string())
                .unwrap_or(snake);
            (canonical, value)
        })
        .collect()
}

/// Structured JSON error payload returned to the model when dispatch fails
/// before the handler itself runs (unknown tool, bad arguments).
fn structured_error(kind: &str, message: String, hint: Option<&str>) -> String {
    let mut obj = serde_json::json!({
        "error": kind,
        "message": message,
    });
    if let Some(hint) = hint {
        obj["hint"] = Value::String(hint.to_string());
    }
    obj.to_string()
}

/// Registers tool handlers and dispatches calls by (normalized) name.
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = to_snake_case(&handler.definition().name);
        self.handlers.insert(name, handler);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    /// Executes the named tool call, normalizing both the name and its
    /// argument keys. Never propagates a Rust error for dispatch-level
    /// failures (unknown tool, handler error) — those become an
    /// `is_error: true` `HandlerOutput` carrying a structured JSON payload,
    /// so the model sees a normal tool-result message it can react to.
    pub async fn execute(&self, name: &str, args: HashMap<String, Value>) -> HandlerOutput {
        let canonical = to_snake_case(name);

        // Fall back to the raw, un-normalized name before giving up: a model
        // can call a tool by a name that normalizes to something other than
        // what it was registered under.
        let handler = match self.handlers.get(&canonical).or_else(|| self.handlers.get(name)) {
            Some(handler) => handler,
            None => {
                let known: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
                return HandlerOutput::error(structured_error(
                    "unknown_tool",
                    format!("no tool registered as '{canonical}'"),
                    Some(&format!("known tools: {}", known.join(", "))),
                ));
            }
        };

        let normalized_args = normalize_arguments(&canonical, args);

        match handler.call(normalized_args).await {
            Ok(output) => output,
            Err(ToolHandlerError::MissingArgument(arg)) => HandlerOutput::error(structured_error(
                "argument_mismatch",
                format!("missing required argument '{arg}'"),
                Some("check the tool's parameter schema and retry with all required fields"),
            )),
            Err(ToolHandlerError::InvalidArgument(arg, reason)) => HandlerOutput::error(structured_error(
                "argument_mismatch",
                format!("invalid argument '{arg}': {reason}"),
                Some("check the tool's parameter schema and retry with all required fields"),
            )),
            Err(ToolHandlerError::Other(e)) => {
                HandlerOutput::error(structured_error("tool_error", e.to_string(), None))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo_tool".to_string(),
                description: "echoes file_path".to_string(),
                parameters: serde_json::json!({}),
            }
        }

        async fn call(&self, args: HashMap<String, Value>) -> Result<HandlerOutput, ToolHandlerError> {
            let path = args
                .get("file_path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolHandlerError::MissingArgument("file_path".to_string()))?;
            Ok(HandlerOutput::ok(path.to_string()))
        }
    }

    #[test]
    fn snake_cases_pascal_camel_and_screaming_names() {
        assert_eq!(to_snake_case("ReadFile"), "read_file");
        assert_eq!(to_snake_case("readFile"), "read_file");
        assert_eq!(to_snake_case("READ_FILE"), "read_file");
        assert_eq!(to_snake_case("read_file"), "read_file");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
    }

    #[tokio::test]
    async fn dispatches_on_normalized_name_regardless_of_model_casing() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let mut args = HashMap::new();
        args.insert("filePath".to_string(), Value::String("/x".to_string()));

        let output = registry.execute("EchoTool", args).await;
        assert!(!output.is_error);
        assert_eq!(output.content, "/x");
    }

    #[tokio::test]
    async fn unknown_tool_returns_structured_error_not_a_panic() {
        let registry = ToolRegistry::new();
        let output = registry.execute("nonexistent", HashMap::new()).await;
        assert!(output.is_error);
        assert!(output.content.contains("unknown_tool"));
    }

    #[tokio::test]
    async fn missing_argument_surfaces_as_argument_mismatch() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let output = registry.execute("echo_tool", HashMap::new()).await;
        assert!(output.is_error);
        assert!(output.content.contains("argument_mismatch"));
    }

    #[test]
    fn aliases_filepath_variants_to_file_path() {
        let mut args = HashMap::new();
        args.insert("filePath".to_string(), Value::String("/a".to_string()));
        let normalized = normalize_arguments("echo_tool", args);
        assert!(normalized.contains_key("file_path"));
    }
}
