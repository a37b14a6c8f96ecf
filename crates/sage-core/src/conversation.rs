//! In-memory conversation log and system-prompt templating (C7).
//!
//! Deliberately not restartable across processes — there's no storage
//! backend here, just an append-only `Vec<Message>` behind a manager that
//! owns the system prompt and a correlation id for the session.

use crate::message::{Message, MessageDto, ToolCall, ToolResult};
use uuid::Uuid;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant operating in {cwd} on {date}. \
You have access to filesystem and shell tools. Use them to accomplish the user's request, \
verify your changes, and explain what you did.";

/// Append-only message log for a single session.
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_tool_result(&mut self, result: &ToolResult) {
        self.messages.push(Message::tool_result(result));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn last_tool_calls(&self) -> Option<&[ToolCall]> {
        self.messages.last().and_then(|m| m.tool_calls())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the conversation plus the session's system prompt and correlation id.
///
/// The correlation id is handed to the provider on every request (see
/// `provider::stream_chat`) and rotates whenever the conversation is
/// cleared, so a fresh session can't be confused with stale log lines from
/// the one before it.
pub struct ConversationManager {
    conversation: Conversation,
    system_prompt_template: String,
    correlation_id: String,
    workspace: std::path::PathBuf,
    project_context: Option<String>,
}

const PROJECT_CONTEXT_BANNER_START: &str = "\n\n--- PROJECT CONTEXT ---\n";
const PROJECT_CONTEXT_BANNER_END: &str = "\n--- END PROJECT CONTEXT ---";

impl ConversationManager {
    pub fn new(workspace: impl Into<std::path::PathBuf>) -> Self {
        Self::with_template(workspace, DEFAULT_SYSTEM_PROMPT)
    }

    pub fn with_template(workspace: impl Into<std::path::PathBuf>, template: impl Into<String>) -> Self {
        Self {
            conversation: Conversation::new(),
            system_prompt_template: template.into(),
            correlation_id: Uuid::new_v4().to_string(),
            workspace: workspace.into(),
            project_context: None,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Sets (or clears, with `None`) the project-context blob produced by
    /// the (out-of-scope) PROJECT.md investigator. Never becomes a separate
    /// conversation turn — it's folded into the system message banner on
    /// the next `render_system_prompt`/`messages_with_system_prompt` call.
    pub fn set_project_context(&mut self, context: Option<String>) {
        self.project_context = context;
    }

    /// Renders the system prompt template, substituting `{cwd}` with the
    /// workspace path and `{date}` with the current date (the caller
    /// supplies `today` so this stays pure and testable rather than
    /// reaching for the clock itself), then appends the project-context
    /// blob (if any) inside delimited banners.
    pub fn render_system_prompt(&self, today: &str) -> String {
        let base = self
            .system_prompt_template
            .replace("{cwd}", &self.workspace.display().to_string())
            .replace("{date}", today);

        match &self.project_context {
            Some(context) => format!("{base}{PROJECT_CONTEXT_BANNER_START}{context}{PROJECT_CONTEXT_BANNER_END}"),
            None => base,
        }
    }

    /// Builds the full message list to send to the provider: the rendered
    /// system prompt followed by the conversation log.
    pub fn messages_with_system_prompt(&self, today: &str) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.conversation.messages().len() + 1);
        out.push(Message::system(self.render_system_prompt(today)));
        out.extend(self.conversation.messages().iter().cloned());
        out
    }

    pub fn push(&mut self, message: Message) {
        self.conversation.push(message);
    }

    pub fn push_tool_result(&mut self, result: &ToolResult) {
        self.conversation.push_tool_result(result);
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Clears the conversation log and rotates the correlation id, so
    /// anything logged or sent after this point can't be attributed to the
    /// session that came before it.
    pub fn clear(&mut self) {
        self.conversation.clear();
        self.correlation_id = Uuid::new_v4().to_string();
    }

    /// Serializes the conversation log to its canonical DTO form.
    pub fn to_dict(&self) -> Vec<MessageDto> {
        self.conversation.messages().iter().map(MessageDto::from).collect()
    }

    /// Restores the conversation log from its canonical DTO form, leaving
    /// the system prompt template, workspace, and correlation id untouched.
    pub fn from_dict(&mut self, dtos: Vec<MessageDto>) -> Result<(), String> {
        let restored: Result<Vec<Message>, String> = dtos.into_iter().map(Message::try_from).collect();
        self.conversation.messages = restored?;
        Ok(())
    }
}
