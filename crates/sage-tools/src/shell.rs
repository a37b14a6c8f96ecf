//! Shell command execution (C3), gated by `sage_core::safety::CommandSafety`
//! and a confirmation callback for anything flagged as dangerous or
//! out-of-sandbox.

use async_trait::async_trait;
use sage_core::registry::{HandlerOutput, ToolDefinition, ToolHandler, ToolHandlerError};
use sage_core::safety::{confirmation_banner, CommandSafety, ConfirmationCallback, PathSafety};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_OUTPUT_BYTES: usize = 50_000;

fn truncate_output(mut output: String) -> String {
    if output.len() > MAX_OUTPUT_BYTES {
        let total = output.len();
        output.truncate(MAX_OUTPUT_BYTES);
        output.push_str(&format!("\n... (truncated, {total} total bytes)"));
    }
    output
}

pub struct RunCommandTool {
    path_safety: Arc<PathSafety>,
    command_safety: CommandSafety,
    confirmation: Arc<dyn ConfirmationCallback>,
}

impl RunCommandTool {
    pub fn new(
        path_safety: Arc<PathSafety>,
        confirmation: Arc<dyn ConfirmationCallback>,
    ) -> Self {
        let command_safety = CommandSafety::new(path_safety.clone());
        Self {
            path_safety,
            command_safety,
            confirmation,
        }
    }
}

#[async_trait]
impl ToolHandler for RunCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_command".to_string(),
            description: "Run a shell command in the workspace. Commands matching known-destructive \
                patterns or touching paths outside the workspace require operator confirmation."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "working_dir": { "type": "string", "description": "Defaults to the workspace root." },
                    "timeout_secs": { "type": "integer" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(&self, args: HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ToolHandlerError::MissingArgument("command".to_string()))?;

        let working_dir = args
            .get("working_dir")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| ".".to_string());

        if !self.path_safety.is_safe(&working_dir) {
            return Ok(HandlerOutput::error(
                serde_json::json!({
                    "status": "DENIED",
                    "error": format!("working_dir '{working_dir}' resolves outside the workspace sandbox"),
                })
                .to_string(),
            ));
        }

        let timeout_secs = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let dangers = self.command_safety.dangerous_matches(&command);
        let out_of_sandbox = self.command_safety.out_of_sandbox_paths(&command);

        if !dangers.is_empty() || !out_of_sandbox.is_empty() {
            let banner = confirmation_banner(&command, &dangers, &out_of_sandbox);
            if !self.confirmation.confirm(&banner).await {
                let reason = dangers
                    .first()
                    .map(|d| format!("Command blocked: {}.", d.reason))
                    .unwrap_or_else(|| "Command blocked: touches paths outside the sandbox.".to_string());
                return Ok(HandlerOutput::error(
                    serde_json::json!({
                        "status": "DENIED",
                        "error": format!("{reason} No confirmation callback available"),
                        "banner": banner,
                    })
                    .to_string(),
                ));
            }
        }

        let resolved_dir = self.path_safety.resolve(&working_dir);

        #[cfg(windows)]
        let mut child_cmd = {
            let mut c = Command::new("cmd");
            c.arg("/c").arg(&command);
            c
        };
        #[cfg(not(windows))]
        let mut child_cmd = {
            let mut c = Command::new("bash");
            c.arg("-c").arg(&command);
            c
        };
        child_cmd.current_dir(&resolved_dir).kill_on_drop(true);

        let result = tokio::time::timeout(Duration::from_secs(timeout_secs), child_cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let stdout = truncate_output(String::from_utf8_lossy(&output.stdout).to_string());
                let stderr = truncate_output(String::from_utf8_lossy(&output.stderr).to_string());
                let exit_code = output.status.code().unwrap_or(-1);

                Ok(HandlerOutput {
                    content: serde_json::json!({
                        "status": if exit_code == 0 { "SUCCESS" } else { "FAILED" },
                        "exit_code": exit_code,
                        "stdout": stdout,
                        "stderr": stderr,
                    })
                    .to_string(),
                    is_error: exit_code != 0,
                })
            }
            Ok(Err(e)) => Ok(HandlerOutput::error(
                serde_json::json!({"status": "FAILED", "error": format!("failed to spawn command: {e}")}).to_string(),
            )),
            Err(_) => Ok(HandlerOutput::error(
                serde_json::json!({
                    "status": "FAILED",
                    "error": format!("command timed out after {timeout_secs}s"),
                })
                .to_string(),
            )),
        }
    }
}
