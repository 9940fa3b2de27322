//! Tool-call execution and outcome classification (C9, §4.8).
//!
//! Dispatches one model turn's tool calls against the [`ToolRegistry`] and
//! classifies what happened into an [`Outcome`] the orchestrator (C10/C11)
//! drives its loop on. Native tools execute and their results fold back into
//! the message history so the loop can continue; remote/client tools cannot
//! be executed here and stop the loop short so the caller can resolve them;
//! a terminal tool ends the loop with its own output as the answer.

use tokio::sync::mpsc::UnboundedSender;

use crate::agent::message::{tool_message, ChatMessage};
use crate::agent::tool::ToolCall;
use crate::agentic_search::AgenticSearchEvent;
use crate::error::OrchestratorError;
use crate::model::ModelCompletion;
use crate::tool_registry::{ToolKind, ToolRegistry};

/// Maximum size, in bytes, of a tool call's JSON-encoded arguments.
///
/// Rejects pathological payloads before they reach `serde_json::from_str`.
pub const MAX_TOOL_ARGUMENTS_BYTES: usize = 64 * 1024;

/// What the orchestrator should do after dispatching one turn's tool calls (§4.8).
pub enum Outcome {
    /// Every tool call this turn was native and executed; append `tool_messages`
    /// to history and ask the model again.
    Continue {
        /// One `ChatMessage::Tool` reply per dispatched call, in call order.
        tool_messages: Vec<ChatMessage>,
    },
    /// At least one tool call this turn could not be executed natively; the
    /// loop must stop and hand the unresolved calls back to the caller.
    UnresolvedClientTools {
        /// The tool calls the orchestrator could not resolve.
        calls: Vec<ToolCall>,
    },
    /// A terminal tool was invoked; its completion is the final answer.
    Terminate {
        /// The completion to return as-is.
        completion: ModelCompletion,
    },
}

/// Dispatches a completion's tool calls per the registry (§4.8 steps 1-4).
///
/// # Errors
///
/// Returns [`OrchestratorError`] if a native tool's arguments fail to parse
/// or the tool itself fails; per §4.8, a native tool error becomes a
/// `ToolResult{is_error: true}` folded into `Continue`, not a propagated
/// error — propagation here is reserved for malformed arguments this crate
/// itself cannot recover from.
pub async fn dispatch(
    registry: &ToolRegistry,
    completion: &ModelCompletion,
    declared_tools: &[crate::agent::tool::ToolDefinition],
    events: Option<&UnboundedSender<AgenticSearchEvent>>,
) -> Result<Outcome, OrchestratorError> {
    let Some(choice) = completion.choices.first() else {
        return Ok(Outcome::Continue {
            tool_messages: Vec::new(),
        });
    };
    let calls = &choice.message.tool_calls;
    if calls.is_empty() {
        return Ok(Outcome::Continue {
            tool_messages: Vec::new(),
        });
    }

    let mut unresolved = Vec::new();
    for call in calls {
        match registry.resolve(&call.name, declared_tools) {
            ToolKind::Terminal => {
                return Ok(Outcome::Terminate {
                    completion: completion.clone(),
                });
            }
            ToolKind::Remote => unresolved.push(call.clone()),
            ToolKind::Native => {}
        }
    }
    if !unresolved.is_empty() {
        return Ok(Outcome::UnresolvedClientTools { calls: unresolved });
    }

    let mut tool_messages = Vec::with_capacity(calls.len());
    for call in calls {
        let result = execute_native(registry, call, declared_tools, events).await;
        let message = match result {
            Ok(content) => tool_message(&call.id, &content),
            Err(e) => tool_message(&call.id, &format!("error: {e}")),
        };
        tool_messages.push(message);
    }
    Ok(Outcome::Continue { tool_messages })
}

async fn execute_native(
    registry: &ToolRegistry,
    call: &ToolCall,
    declared_tools: &[crate::agent::tool::ToolDefinition],
    events: Option<&UnboundedSender<AgenticSearchEvent>>,
) -> Result<String, OrchestratorError> {
    if call.arguments.len() > MAX_TOOL_ARGUMENTS_BYTES {
        return Err(OrchestratorError::InvalidArgument(format!(
            "tool call {} arguments exceed {MAX_TOOL_ARGUMENTS_BYTES} bytes",
            call.id
        )));
    }
    let handler = registry.native_handler(&call.name, declared_tools).ok_or_else(|| {
        OrchestratorError::InvalidArgument(format!("no native handler registered for {}", call.name))
    })?;
    let value = handler.call(&call.arguments, events).await?;
    Ok(serde_json::to_string(&value)?)
}
