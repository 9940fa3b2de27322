//! Conversion between the wire-format data model (§3, `crate::model`) and the
//! provider-agnostic chat format (`crate::agent::message`) the upstream LLM
//! call actually speaks.
//!
//! This seam exists because the two layers serve different purposes: the
//! request/response/store shapes need to survive round-tripping through
//! sqlite and JSON; the chat shape is what every [`LlmProvider`] adapter
//! understands. Nothing upstream of here (C9-C11) needs to know input items
//! exist; nothing downstream of here (the store, the HTTP handlers) needs to
//! know chat messages exist.
//!
//! [`LlmProvider`]: crate::agent::provider::LlmProvider

use crate::agent::message::{assistant_tool_calls_message, tool_message, ChatMessage, Role};
use crate::agent::tool::ToolCall;
use crate::model::{ContentPart, InputItem, ItemRole, ModelCompletion};

fn map_role(role: ItemRole) -> Role {
    match role {
        ItemRole::System => Role::System,
        ItemRole::User => Role::User,
        ItemRole::Assistant => Role::Assistant,
    }
}

/// Flattens a replay-rewritten input-item list into the ordered chat
/// messages an [`LlmProvider`](crate::agent::provider::LlmProvider) expects.
///
/// Consecutive `FunctionCall` items (the tool calls one assistant turn
/// requested) coalesce into a single assistant message, matching how the
/// provider itself emitted them in the first place.
#[must_use]
pub fn input_items_to_chat_messages(items: &[InputItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(items.len());
    let mut pending_calls: Vec<ToolCall> = Vec::new();

    for item in items {
        match item {
            InputItem::FunctionCall { call_id, name, arguments } => {
                pending_calls.push(ToolCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            InputItem::FunctionCallOutput { call_id, output } => {
                flush_pending_calls(&mut pending_calls, &mut messages);
                messages.push(tool_message(call_id, output));
            }
            InputItem::Message { role, content } => {
                flush_pending_calls(&mut pending_calls, &mut messages);
                messages.push(ChatMessage {
                    role: map_role(*role),
                    content: join_content(content),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                });
            }
            InputItem::Reasoning { .. } => {
                flush_pending_calls(&mut pending_calls, &mut messages);
            }
        }
    }
    flush_pending_calls(&mut pending_calls, &mut messages);
    messages
}

fn flush_pending_calls(pending: &mut Vec<ToolCall>, messages: &mut Vec<ChatMessage>) {
    if !pending.is_empty() {
        messages.push(assistant_tool_calls_message(std::mem::take(pending)));
    }
}

fn join_content(parts: &[ContentPart]) -> String {
    parts.iter().map(ContentPart::payload).collect::<Vec<_>>().join("\n")
}

/// Renders a terminal [`ModelCompletion`]'s first choice into the input
/// items to append to that response's output log (§4.12 `store`).
///
/// A turn that ended on tool calls the caller must resolve (`UnresolvedClientTools`)
/// is recorded as one `FunctionCall` item per pending call, preserving the
/// chain so a later `previous_response_id` replay can pick it back up.
#[must_use]
pub fn completion_to_output_items(completion: &ModelCompletion) -> Vec<InputItem> {
    let Some(choice) = completion.choices.first() else {
        return Vec::new();
    };
    if choice.message.tool_calls.is_empty() {
        vec![InputItem::Message {
            role: ItemRole::Assistant,
            content: vec![ContentPart::OutputText {
                text: choice.message.content.clone(),
            }],
        }]
    } else {
        choice
            .message
            .tool_calls
            .iter()
            .map(|call| InputItem::FunctionCall {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .collect()
    }
}
