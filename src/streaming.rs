//! Streaming (SSE) completion orchestrator (C11, §4.10).
//!
//! Drives the same tool-call loop as [`crate::completion`], but observes each
//! upstream turn as a sequence of deltas rather than one blocking call: every
//! delta is forwarded to the downstream sink as a `chunk` event as it
//! arrives, and the turn is only reassembled into a logical [`ModelCompletion`]
//! once the upstream stream closes. Reassembly is a plain sequential fold
//! over the buffered deltas (§4.10 design note) — no reactive operators.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::message::{ChatMessage, ChatRequest, Role};
use crate::agent::provider::LlmProvider;
use crate::agent::tool::ToolDefinition;
use crate::agentic_search::AgenticSearchEvent;
use crate::error::OrchestratorError;
use crate::model::{Choice, FinishReason, ModelCompletion, StreamDelta, ToolCallDelta};
use crate::tool_executor::{self, Outcome};
use crate::tool_registry::ToolRegistry;

/// One frame written to the SSE transport (§6 "SSE framing").
pub enum SseEvent {
    /// A named `event: <kind>` / `data: <json>` pair.
    Named {
        /// The SSE event type (`chunk`, a `response.*` progress phase, or `error`).
        event: &'static str,
        /// The JSON-encoded payload.
        data: String,
    },
    /// The terminal `data: [DONE]` line, carrying no `event:` line.
    Done,
}

impl SseEvent {
    /// Renders this event as the literal bytes written to the transport.
    #[must_use]
    pub fn into_frame(self) -> String {
        match self {
            Self::Named { event, data } => format!("event: {event}\ndata: {data}\n\n"),
            Self::Done => "data: [DONE]\n\n".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChunkPayload {
    id: String,
    choice_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_call_deltas: Vec<ToolCallDeltaPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<FinishReason>,
}

#[derive(Serialize)]
struct ToolCallDeltaPayload {
    tool_call_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments_fragment: Option<String>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    message: &'a str,
}

/// Drives the SSE tool-call loop to a terminal state, writing every frame to
/// `sink` (§4.10 steps 1-6).
///
/// `messages` is the full replay-rewritten history (C12's output); `tools`
/// are the caller's declared tool definitions. Progress events from a native
/// `deep_research` tool call (C8) are forwarded to `sink` as `response.*`
/// frames alongside the `chunk` events.
pub async fn run(
    provider: &Arc<dyn LlmProvider>,
    registry: &ToolRegistry,
    model: &str,
    mut messages: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
    max_tool_calls: usize,
    sink: &UnboundedSender<SseEvent>,
) {
    let advertised = registry.advertised_definitions(&tools);
    let response_id = crate::ids::new_uuid();
    let mut iterations = 0usize;

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<AgenticSearchEvent>();
    let progress_sink = sink.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let Ok(data) = serde_json::to_string(&event) {
                let _ = progress_sink.send(SseEvent::Named {
                    event: "response.search",
                    data,
                });
            }
        }
    });

    loop {
        let request = ChatRequest {
            model: model.to_string(),
            messages: messages.clone(),
            temperature: None,
            max_tokens: None,
            json_mode: false,
            stream: true,
            tools: advertised.clone(),
        };

        let upstream = match provider.chat_stream_deltas(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                emit_error(sink, &e);
                break;
            }
        };
        tokio::pin!(upstream);

        let mut deltas: Vec<StreamDelta> = Vec::new();
        let mut stream_failed = false;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(delta) => {
                    emit_chunk(sink, &response_id, &delta);
                    deltas.push(delta);
                }
                Err(e) => {
                    emit_error(sink, &e);
                    stream_failed = true;
                    break;
                }
            }
        }
        if stream_failed {
            break;
        }

        let completion = reassemble(&deltas, &response_id, model);

        if !completion.has_tool_calls() {
            sink.send(SseEvent::Done).ok();
            break;
        }

        if iterations >= max_tool_calls {
            emit_error(sink, &OrchestratorError::MaxToolCallsExceeded { limit: max_tool_calls });
            break;
        }
        iterations += 1;

        let assistant_message = completion.choices[0].message.clone();
        messages.push(assistant_message);

        match tool_executor::dispatch(registry, &completion, &tools, Some(&progress_tx)).await {
            Ok(Outcome::Continue { tool_messages }) => {
                messages.extend(tool_messages);
            }
            Ok(Outcome::UnresolvedClientTools { .. }) => {
                sink.send(SseEvent::Done).ok();
                break;
            }
            Ok(Outcome::Terminate { completion }) => {
                emit_terminal_chunk(sink, &response_id, &completion);
                sink.send(SseEvent::Done).ok();
                break;
            }
            Err(e) => {
                emit_error(sink, &e);
                break;
            }
        }
    }

    drop(progress_tx);
    let _ = forwarder.await;
}

/// Folds a turn's buffered deltas into a logical completion (§4.10 step 3).
///
/// Content deltas are concatenated *per choice*, and tool-call fragments are
/// coalesced by the `(choice_index, tool_call_index)` tuple, never by
/// `tool_call_index` alone — some providers number tool calls independently
/// per choice, so collapsing across choices would merge unrelated calls.
/// One [`Choice`] is emitted per distinct `choice_index` observed, ordered by
/// index ascending.
///
/// An empty delta list reassembles into a synthetic minimal completion
/// (single choice, empty content, no tool calls, `finish_reason = stop`) so
/// the caller's "no tool calls" branch stops the loop cleanly rather than
/// special-casing an unusable turn.
fn reassemble(deltas: &[StreamDelta], response_id: &str, model: &str) -> ModelCompletion {
    let mut choices: Vec<(u32, ChoiceAccumulator)> = Vec::new();

    for delta in deltas {
        let acc = choice_slot(&mut choices, delta.choice_index);
        if let Some(fragment) = &delta.content {
            acc.content.push_str(fragment);
        }
        for tool_delta in &delta.tool_call_deltas {
            accumulate_tool_call(&mut acc.tool_calls, tool_delta);
        }
        if let Some(reason) = delta.finish_reason {
            acc.finish_reason = Some(reason);
        }
    }

    if choices.is_empty() {
        choices.push((0, ChoiceAccumulator::default()));
    }
    choices.sort_by_key(|(index, _)| *index);

    let choices: Vec<Choice> = choices
        .into_iter()
        .map(|(index, acc)| {
            let resolved_calls: Vec<crate::agent::tool::ToolCall> =
                acc.tool_calls.into_iter().filter_map(|(_, tc)| tc.finish()).collect();
            let mut finish_reason = acc.finish_reason.unwrap_or(FinishReason::Stop);
            if !resolved_calls.is_empty() && finish_reason == FinishReason::Stop {
                finish_reason = FinishReason::ToolCalls;
            }
            Choice {
                index,
                message: ChatMessage {
                    role: Role::Assistant,
                    content: acc.content,
                    tool_calls: resolved_calls,
                    tool_call_id: None,
                },
                finish_reason: Some(finish_reason),
            }
        })
        .collect();

    ModelCompletion {
        id: response_id.to_string(),
        created: 0,
        model: model.to_string(),
        choices,
        usage: None,
    }
}

#[derive(Default)]
struct ChoiceAccumulator {
    content: String,
    tool_calls: Vec<(u32, ToolCallAccumulator)>,
    finish_reason: Option<FinishReason>,
}

fn choice_slot(choices: &mut Vec<(u32, ChoiceAccumulator)>, choice_index: u32) -> &mut ChoiceAccumulator {
    let position = choices.iter().position(|(index, _)| *index == choice_index);
    let position = position.unwrap_or_else(|| {
        choices.push((choice_index, ChoiceAccumulator::default()));
        choices.len() - 1
    });
    &mut choices[position].1
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn finish(self) -> Option<crate::agent::tool::ToolCall> {
        Some(crate::agent::tool::ToolCall {
            id: self.id?,
            name: self.name.unwrap_or_default(),
            arguments: self.arguments,
        })
    }
}

/// Coalesces one choice's tool-call fragments by `tool_call_index`. Called
/// once per choice accumulator, so the effective key is already
/// `(choice_index, tool_call_index)` — each choice owns a disjoint index space.
fn accumulate_tool_call(tool_calls: &mut Vec<(u32, ToolCallAccumulator)>, delta: &ToolCallDelta) {
    let slot = tool_calls
        .iter_mut()
        .find(|(index, _)| *index == delta.tool_call_index);
    let accumulator = match slot {
        Some((_, acc)) => acc,
        None => {
            tool_calls.push((delta.tool_call_index, ToolCallAccumulator::default()));
            &mut tool_calls.last_mut().unwrap_or_else(|| unreachable!("just pushed")).1
        }
    };
    if let Some(id) = &delta.id {
        accumulator.id = Some(id.clone());
    }
    if let Some(name) = &delta.name {
        accumulator.name = Some(name.clone());
    }
    if let Some(fragment) = &delta.arguments_fragment {
        accumulator.arguments.push_str(fragment);
    }
}

fn emit_chunk(sink: &UnboundedSender<SseEvent>, response_id: &str, delta: &StreamDelta) {
    let payload = ChunkPayload {
        id: response_id.to_string(),
        choice_index: delta.choice_index,
        content: delta.content.clone(),
        tool_call_deltas: delta
            .tool_call_deltas
            .iter()
            .map(|d| ToolCallDeltaPayload {
                tool_call_index: d.tool_call_index,
                id: d.id.clone(),
                name: d.name.clone(),
                arguments_fragment: d.arguments_fragment.clone(),
            })
            .collect(),
        finish_reason: delta.finish_reason,
    };
    if let Ok(data) = serde_json::to_string(&payload) {
        let _ = sink.send(SseEvent::Named { event: "chunk", data });
    }
}

fn emit_terminal_chunk(sink: &UnboundedSender<SseEvent>, response_id: &str, completion: &ModelCompletion) {
    let text = completion
        .choices
        .first()
        .map(|c| c.message.content.clone())
        .unwrap_or_default();
    let payload = ChunkPayload {
        id: response_id.to_string(),
        choice_index: 0,
        content: Some(text),
        tool_call_deltas: Vec::new(),
        finish_reason: Some(FinishReason::Stop),
    };
    if let Ok(data) = serde_json::to_string(&payload) {
        let _ = sink.send(SseEvent::Named { event: "chunk", data });
    }
}

fn emit_error(sink: &UnboundedSender<SseEvent>, error: &OrchestratorError) {
    let message = error.to_string();
    let payload = ErrorPayload { message: &message };
    if let Ok(data) = serde_json::to_string(&payload) {
        let _ = sink.send(SseEvent::Named { event: "error", data });
    }
    let _ = sink.send(SseEvent::Done);
}
