//! OpenAI-compatible chat-completions streaming provider (C6).
//!
//! Translates between this crate's `Message`/`ToolCall` types and the wire
//! format, and reconstructs tool calls from a streamed SSE response: the
//! model sends `function.arguments` in small string fragments across many
//! chunks, keyed by an index rather than the call's id, and only the
//! `finish_reason` chunk signals the call is complete.

use crate::message::{Message, MessageDto, StreamChunk, ToolCall};
use crate::registry::ToolDefinition;
use async_stream::try_stream;
use eventsource_stream::Eventsource;
use futures::Stream;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("event stream error: {0}")]
    Stream(String),
}

/// Everything needed to reach an OpenAI-compatible chat-completions endpoint.
#[derive(Clone, Debug)]
pub struct OpenAICompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client with static config must build");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Translates conversation messages plus tool definitions into the
    /// chat-completions request body, and streams back a `StreamChunk` per
    /// server-sent event, surfacing reconstructed tool calls only once a
    /// turn's `finish_reason` arrives.
    pub fn stream_chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        correlation_id: &'a str,
    ) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + 'a {
        try_stream! {
            let wire_messages: Vec<MessageDto> = messages.iter().map(MessageDto::from).collect();

            let wire_tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();

            let mut body = serde_json::json!({
                "model": self.model,
                "messages": wire_messages,
                "stream": true,
            });
            if !wire_tools.is_empty() {
                body["tools"] = serde_json::Value::Array(wire_tools);
                body["tool_choice"] = serde_json::Value::String("auto".to_string());
            }

            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
                .bearer_auth(&self.api_key)
                .header("x-correlation-id", correlation_id)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Upstream { status: status.as_u16(), body })?;
            }

            let mut sse = response.bytes_stream().eventsource();
            let mut call_buffers: HashMap<u64, PartialToolCall> = HashMap::new();

            use futures::StreamExt;
            while let Some(event) = sse.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => Err(ProviderError::Stream(e.to_string()))?,
                };

                let data = event.data;
                if data == "[DONE]" {
                    return;
                }
                if data.is_empty() {
                    continue;
                }

                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
                    // Malformed SSE payload: skip this line, the stream continues.
                    continue;
                };

                let Some(delta) = parsed
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("delta"))
                else {
                    continue;
                };

                let finish_reason = parsed
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("finish_reason"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                let content = delta.get("content").and_then(|v| v.as_str()).map(|s| s.to_string());

                if let Some(tool_call_deltas) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                    for tc in tool_call_deltas {
                        let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                        let entry = call_buffers.entry(index).or_default();

                        if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                            entry.id = id.to_string();
                        }
                        if let Some(func) = tc.get("function") {
                            if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                                entry.name.push_str(name);
                            }
                            if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                                entry.arguments.push_str(args);
                            }
                        }
                    }
                }

                if finish_reason.is_none() && content.is_none() {
                    continue;
                }

                if finish_reason.is_some() {
                    let tool_calls = if call_buffers.is_empty() {
                        None
                    } else {
                        let mut indices: Vec<&u64> = call_buffers.keys().collect();
                        indices.sort();
                        let mut calls = Vec::with_capacity(indices.len());
                        for idx in indices {
                            let buf = &call_buffers[idx];
                            let arguments = if buf.arguments.trim().is_empty() {
                                HashMap::new()
                            } else {
                                // On parse error, substitute an empty object rather than
                                // failing the whole turn over one malformed fragment.
                                serde_json::from_str(&buf.arguments).unwrap_or_default()
                            };
                            calls.push(ToolCall {
                                id: buf.id.clone(),
                                name: buf.name.clone(),
                                arguments,
                            });
                        }
                        Some(calls)
                    };

                    yield StreamChunk {
                        content,
                        tool_calls,
                        finish_reason,
                    };
                    return;
                }

                yield StreamChunk {
                    content,
                    tool_calls: None,
                    finish_reason: None,
                };
            }
        }
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn provider() -> OpenAICompatibleProvider {
        OpenAICompatibleProvider::new("https://example.invalid/v1", "test-key", "test-model")
    }

    #[test]
    fn constructs_with_trailing_slash_trimmed() {
        let p = OpenAICompatibleProvider::new("https://example.invalid/v1/", "k", "m");
        assert_eq!(p.base_url, "https://example.invalid/v1/");
    }

    #[tokio::test]
    async fn stream_against_unreachable_host_yields_a_request_error() {
        let p = provider();
        let messages = vec![Message::user("hi")];
        let tools = vec![];
        let mut stream = Box::pin(p.stream_chat(&messages, &tools, "corr-id"));
        let first = stream.next().await;
        assert!(matches!(first, Some(Err(ProviderError::Request(_)))));
    }

    async fn mock_sse_server(body: &str) -> wiremock::MockServer {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
            )
            .mount(&server)
            .await;
        server
    }

    /// Builds one SSE `data: <json>` frame from a `choices[0].delta`/`finish_reason`
    /// pair, serializing through `serde_json` rather than hand-escaped string
    /// literals so the nested-JSON-inside-JSON shape can't be typo'd.
    fn sse_frame(delta: serde_json::Value, finish_reason: Option<&str>) -> String {
        let event = serde_json::json!({
            "choices": [{ "delta": delta, "finish_reason": finish_reason }]
        });
        format!("data: {}\n\n", event)
    }

    #[tokio::test]
    async fn reconstructs_a_tool_call_fragmented_across_many_chunks() {
        let body = format!(
            "{}{}{}{}",
            sse_frame(
                serde_json::json!({"tool_calls": [{"index": 0, "id": "a", "function": {"name": "read_file"}}]}),
                None,
            ),
            sse_frame(
                serde_json::json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"fi"}}]}),
                None,
            ),
            sse_frame(
                serde_json::json!({"tool_calls": [{"index": 0, "function": {"arguments": "le_path\":\"x\"}"}}]}),
                Some("tool_calls"),
            ),
            "data: [DONE]\n\n",
        );
        let server = mock_sse_server(&body).await;

        let p = OpenAICompatibleProvider::new(&server.uri(), "key", "model");
        let messages = vec![Message::user("hi")];
        let tools = vec![];
        let mut stream = Box::pin(p.stream_chat(&messages, &tools, "corr-id"));

        let mut last = None;
        while let Some(chunk) = stream.next().await {
            last = Some(chunk.unwrap());
        }

        let final_chunk = last.expect("stream produced no chunks");
        assert_eq!(final_chunk.finish_reason.as_deref(), Some("tool_calls"));
        let calls = final_chunk.tool_calls.expect("expected reconstructed tool calls");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments.get("file_path").and_then(|v| v.as_str()), Some("x"));
    }

    #[tokio::test]
    async fn malformed_json_line_is_skipped_not_fatal() {
        let body = concat!(
            "data: this is not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"hello\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = mock_sse_server(body).await;

        let p = OpenAICompatibleProvider::new(&server.uri(), "key", "model");
        let messages = vec![Message::user("hi")];
        let tools = vec![];
        let mut stream = Box::pin(p.stream_chat(&messages, &tools, "corr-id"));

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }

        assert!(chunks.iter().any(|c| c.content.as_deref() == Some("hello")));
        assert_eq!(chunks.last().unwrap().finish_reason.as_deref(), Some("stop"));
    }
}
