//! The agentic execution loop (C8): stream a turn from the provider, dispatch
//! any tool calls it asks for, feed results back, and repeat until the model
//! stops calling tools or the iteration cap is hit.
//!
//! Streamed assistant text is forwarded to the host live, chunk by chunk, as
//! it arrives — but only committed to the conversation log when the turn
//! ends with no tool calls. A turn that ends in tool calls commits an
//! assistant message with `content: None`, matching the original's
//! discard-on-tool-call policy, even though the text was already shown to
//! the operator. The two concerns — "what did the model say" and "what's in
//! the log" — are allowed to diverge on purpose.

use crate::conversation::ConversationManager;
use crate::message::{Message, StreamChunk, ToolResult};
use crate::provider::{OpenAICompatibleProvider, ProviderError};
use crate::registry::ToolRegistry;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use thiserror::Error;

/// Emitted to the host as a turn progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A fragment of streamed assistant text. Not yet committed to the log.
    TextDelta(String),
    /// The model asked to run this tool; about to dispatch it.
    ToolCallStarted { id: String, name: String },
    /// The tool finished (successfully or not).
    ToolResult(ToolResult),
    /// The turn ended with a final assistant message (no further tool calls).
    Done,
    /// The iteration cap was hit before the model produced a final answer.
    IterationLimitReached,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Bounds the agent loop's iteration count, one of this crate's few
/// process-wide invariants: without it a model stuck calling tools forever
/// would run indefinitely.
#[derive(Clone, Copy, Debug)]
pub struct AgentConfig {
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

pub struct Agent {
    provider: OpenAICompatibleProvider,
    registry: ToolRegistry,
    config: AgentConfig,
}

impl Agent {
    pub fn new(provider: OpenAICompatibleProvider, registry: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            provider,
            registry,
            config,
        }
    }

    /// Runs one user turn to completion: commits `user_input` to the
    /// conversation, then loops provider calls and tool dispatches until a
    /// tool-call-free assistant response lands or the iteration cap is hit.
    ///
    /// Cancellation-safe in the sense that dropping the returned stream
    /// mid-turn leaves `conversation` in a consistent state: only fully
    /// completed steps (an assistant message plus all of its tool results)
    /// are ever committed, so a cancelled turn never leaves a dangling
    /// tool_calls entry with no matching tool message.
    pub fn run_turn<'a>(
        &'a self,
        conversation: &'a mut ConversationManager,
        user_input: String,
        today: &'a str,
    ) -> impl Stream<Item = Result<AgentEvent, AgentError>> + 'a {
        try_stream! {
            conversation.push(Message::user(user_input));

            for _ in 0..self.config.max_iterations {
                let messages = conversation.messages_with_system_prompt(today);
                let tools = self.registry.definitions();
                let correlation_id = conversation.correlation_id().to_string();

                let mut stream = Box::pin(self.provider.stream_chat(&messages, &tools, &correlation_id));

                let mut text_so_far = String::new();
                let mut final_chunk: Option<StreamChunk> = None;

                while let Some(item) = stream.next().await {
                    let chunk = item?;
                    if let Some(ref text) = chunk.content {
                        text_so_far.push_str(text);
                        yield AgentEvent::TextDelta(text.clone());
                    }
                    if chunk.finish_reason.is_some() {
                        final_chunk = Some(chunk);
                        break;
                    }
                }

                let Some(final_chunk) = final_chunk else {
                    // Stream ended without a finish_reason (connection closed
                    // early). Commit whatever text arrived and stop the turn.
                    if !text_so_far.is_empty() {
                        conversation.push(Message::assistant(Some(text_so_far), None));
                    }
                    yield AgentEvent::Done;
                    return;
                };

                match final_chunk.tool_calls {
                    None => {
                        let content = final_chunk.content.or(if text_so_far.is_empty() {
                            None
                        } else {
                            Some(text_so_far)
                        });
                        conversation.push(Message::assistant(content, None));
                        yield AgentEvent::Done;
                        return;
                    }
                    Some(tool_calls) => {
                        conversation.push(Message::assistant(None, Some(tool_calls.clone())));

                        for call in &tool_calls {
                            yield AgentEvent::ToolCallStarted {
                                id: call.id.clone(),
                                name: call.name.clone(),
                            };

                            let output = self.registry.execute(&call.name, call.arguments.clone()).await;

                            let result = ToolResult {
                                tool_call_id: call.id.clone(),
                                name: call.name.clone(),
                                content: output.content,
                                is_error: output.is_error,
                            };
                            conversation.push_tool_result(&result);
                            yield AgentEvent::ToolResult(result);
                        }
                    }
                }
            }

            yield AgentEvent::TextDelta("\n\n[Reached maximum tool iterations]".to_string());
            yield AgentEvent::IterationLimitReached;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HandlerOutput, ToolDefinition, ToolHandler, ToolHandlerError, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[test]
    fn default_iteration_cap_is_nonzero() {
        assert!(AgentConfig::default().max_iterations > 0);
    }

    struct AlwaysLoopTool;

    #[async_trait]
    impl ToolHandler for AlwaysLoopTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "loop_tool".to_string(),
                description: "always succeeds, never stops the agent from calling it again".to_string(),
                parameters: serde_json::json!({}),
            }
        }

        async fn call(&self, _args: std::collections::HashMap<String, serde_json::Value>) -> Result<HandlerOutput, ToolHandlerError> {
            Ok(HandlerOutput::ok("looped"))
        }
    }

    async fn mock_tool_call_server() -> wiremock::MockServer {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let frame = serde_json::json!({
            "choices": [{
                "delta": {"tool_calls": [{"index": 0, "id": "a", "function": {"name": "loop_tool", "arguments": "{}"}}]},
                "finish_reason": "tool_calls",
            }]
        });
        let body = format!("data: {}\n\ndata: [DONE]\n\n", frame);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn iteration_cap_yields_the_literal_sentinel_text() {
        let server = mock_tool_call_server().await;
        let provider = OpenAICompatibleProvider::new(&server.uri(), "key", "model");

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AlwaysLoopTool));

        let agent = Agent::new(provider, registry, AgentConfig { max_iterations: 2 });
        let mut conversation = ConversationManager::new("/workspace");

        let mut turn = Box::pin(agent.run_turn(&mut conversation, "go".to_string(), "2026-07-30"));
        let mut texts = Vec::new();
        while let Some(event) = turn.next().await {
            if let Ok(AgentEvent::TextDelta(text)) = event {
                texts.push(text);
            }
        }

        let joined = texts.concat();
        assert!(joined.contains("[Reached maximum tool iterations]"));
    }
}
