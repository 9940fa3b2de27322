//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. This keeps all agent logic decoupled
//! from any particular LLM vendor.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::{ChatRequest, ChatResponse};
use crate::error::OrchestratorError;
use crate::model::StreamDelta;

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls, retries)
/// for a specific provider while presenting a uniform interface to the
/// orchestrator (C10/C11).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"anthropic"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Upstream`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, OrchestratorError>;

    /// Executes a streaming chat completion request.
    ///
    /// Returns a stream of per-choice deltas — text fragments, tool-call
    /// fragments (keyed by `(choice_index, tool_call_index)` for the
    /// orchestrator to reassemble, §4.10), and finish reasons — as they
    /// arrive from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Upstream`] on connection or streaming failures.
    async fn chat_stream_deltas(
        &self,
        request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamDelta, OrchestratorError>> + Send>>, OrchestratorError>;
}
