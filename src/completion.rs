//! Blocking completion orchestrator (C10, §4.9).
//!
//! Single-turn create → detect tool calls → dispatch → recurse, bounded by
//! `Config.max_tool_calls`. This is the synchronous counterpart to the SSE
//! orchestrator (C11); both share [`crate::tool_executor::dispatch`] and the
//! same termination semantics, differing only in how they observe each
//! upstream turn (one blocking call here, a consumed stream there).

use std::sync::Arc;

use crate::agent::message::{ChatMessage, ChatRequest, Role};
use crate::agent::provider::LlmProvider;
use crate::agent::tool::ToolDefinition;
use crate::error::OrchestratorError;
use crate::model::{Choice, FinishReason, ModelCompletion, Usage};
use crate::tool_executor::{self, Outcome};
use crate::tool_registry::ToolRegistry;

/// Runs the blocking tool-call loop to a terminal completion (§4.9).
///
/// `messages` is the full replay-rewritten history (C12's output); `tools`
/// are the caller's declared tool definitions, unioned with the registry's
/// native tools when advertised upstream.
///
/// # Errors
///
/// Returns [`OrchestratorError::MaxToolCallsExceeded`] if the loop exceeds
/// `max_tool_calls` iterations without reaching a terminal state, or
/// propagates [`OrchestratorError::Upstream`] from the provider.
pub async fn run(
    provider: &Arc<dyn LlmProvider>,
    registry: &ToolRegistry,
    model: &str,
    mut messages: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
    max_tool_calls: usize,
) -> Result<ModelCompletion, OrchestratorError> {
    let advertised = registry.advertised_definitions(&tools);
    let mut iterations = 0usize;

    loop {
        let request = ChatRequest {
            model: model.to_string(),
            messages: messages.clone(),
            temperature: None,
            max_tokens: None,
            json_mode: false,
            stream: false,
            tools: advertised.clone(),
        };
        let response = provider.chat(&request).await?;

        let finish_reason = if response.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        let assistant_message = ChatMessage {
            role: Role::Assistant,
            content: response.content.clone(),
            tool_calls: response.tool_calls.clone(),
            tool_call_id: None,
        };
        let completion = to_completion(&response, finish_reason);

        if response.tool_calls.is_empty() {
            return Ok(completion);
        }

        if iterations >= max_tool_calls {
            return Err(OrchestratorError::MaxToolCallsExceeded { limit: max_tool_calls });
        }
        iterations += 1;

        messages.push(assistant_message);

        match tool_executor::dispatch(registry, &completion, &tools, None).await? {
            Outcome::Continue { tool_messages } => {
                messages.extend(tool_messages);
            }
            Outcome::UnresolvedClientTools { .. } => {
                // The model asked for a tool this orchestrator cannot execute;
                // hand the completion back as-is so the caller can resolve it
                // and re-submit via `previous_response_id` (§4.8, §4.11).
                return Ok(completion);
            }
            Outcome::Terminate { completion } => return Ok(completion),
        }
    }
}

fn to_completion(response: &crate::agent::message::ChatResponse, finish_reason: FinishReason) -> ModelCompletion {
    ModelCompletion {
        id: crate::ids::new_uuid(),
        created: 0,
        model: String::new(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: Role::Assistant,
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(Usage {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            cached_tokens: 0,
            total_tokens: response.usage.total_tokens,
        }),
    }
}
