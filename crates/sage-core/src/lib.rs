//! Sage Core Library
//!
//! The agentic execution loop, provider adapter, conversation store, tool
//! registry, edit-matching engine, and safety gate shared by every tool
//! crate and the CLI host.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod edit;
pub mod message;
pub mod provider;
pub mod registry;
pub mod safety;

pub use agent::{Agent, AgentConfig, AgentError, AgentEvent};
pub use config::Config;
pub use conversation::{Conversation, ConversationManager};
pub use message::{Message, MessageDto, StreamChunk, ToolCall, ToolResult};
pub use provider::{OpenAICompatibleProvider, ProviderError};
pub use registry::{HandlerOutput, ToolDefinition, ToolHandler, ToolHandlerError, ToolRegistry};
pub use safety::{CommandSafety, ConfirmationCallback, PathSafety};
