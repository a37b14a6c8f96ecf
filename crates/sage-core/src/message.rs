//! Conversation message types shared by the provider, registry, and agent loop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tool call requested by the model.
///
/// Ids are opaque strings supplied by the model; the core treats them only
/// as correlation keys between an `assistant.tool_calls` entry and the
/// `tool` message that answers it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, serde_json::Value>,
}

/// The result of executing a single tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// A role-tagged message in the conversation log.
///
/// Modeled as a tagged variant rather than a single struct with optional
/// fields scattered across roles, so invalid combinations (a `user` message
/// carrying `tool_calls`, say) aren't representable.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Message::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Message::Tool {
            tool_call_id: result.tool_call_id.clone(),
            name: result.name.clone(),
            content: result.content.clone(),
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } => Some(content),
            Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }

    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls.as_deref(),
            _ => None,
        }
    }
}

/// A chunk of a streamed chat-completions response.
///
/// `tool_calls`, when present, is always the *complete* reconstructed set
/// for the turn (emitted once, when `finish_reason` arrives) — never a
/// partial fragment. See `provider::stream_chat`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
}

/// Canonical, JSON-serializable form of a `Message`, used for `to_dict`/`from_dict`
/// round-tripping (§4.7) and for translating onto the wire (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageDto {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&Message> for MessageDto {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::System { content } => MessageDto {
                role: "system".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::User { content } => MessageDto {
                role: "user".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::Assistant {
                content,
                tool_calls,
            } => MessageDto {
                role: "assistant".to_string(),
                content: content.clone(),
                tool_calls: tool_calls.clone(),
                tool_call_id: None,
                name: None,
            },
            Message::Tool {
                tool_call_id,
                name,
                content,
            } => MessageDto {
                role: "tool".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                name: Some(name.clone()),
            },
        }
    }
}

impl TryFrom<MessageDto> for Message {
    type Error = String;

    fn try_from(dto: MessageDto) -> Result<Self, Self::Error> {
        match dto.role.as_str() {
            "system" => Ok(Message::System {
                content: dto.content.unwrap_or_default(),
            }),
            "user" => Ok(Message::User {
                content: dto.content.unwrap_or_default(),
            }),
            "assistant" => Ok(Message::Assistant {
                content: dto.content,
                tool_calls: dto.tool_calls,
            }),
            "tool" => Ok(Message::Tool {
                tool_call_id: dto
                    .tool_call_id
                    .ok_or_else(|| "tool message missing tool_call_id".to_string())?,
                name: dto.name.unwrap_or_default(),
                content: dto.content.unwrap_or_default(),
            }),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_dto() {
        let original = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant(
                None,
                Some(vec![ToolCall {
                    id: "a".into(),
                    name: "read_file".into(),
                    arguments: HashMap::new(),
                }]),
            ),
            Message::Tool {
                tool_call_id: "a".into(),
                name: "read_file".into(),
                content: "contents".into(),
            },
            Message::assistant(Some("done".into()), None),
        ];

        let dtos: Vec<MessageDto> = original.iter().map(MessageDto::from).collect();
        let json = serde_json::to_string(&dtos).unwrap();
        let back: Vec<MessageDto> = serde_json::from_str(&json).unwrap();
        let restored: Vec<Message> = back.into_iter().map(|d| d.try_into().unwrap()).collect();

        assert_eq!(original, restored);
    }
}
