//! Provider-agnostic chat message/request/response types and the
//! [`LlmProvider`] seam the orchestrator (C10/C11) dispatches upstream calls
//! through.

pub mod message;
pub mod provider;
pub mod providers;
pub mod tool;

pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use provider::LlmProvider;
pub use tool::{ToolCall, ToolDefinition, ToolResult};
