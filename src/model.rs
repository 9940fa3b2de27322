//! Request/response/storage data model (§3).
//!
//! These types are the wire format for the HTTP surface (§6) and the
//! persisted shape for the input-item store (§4.12). They are distinct from
//! [`crate::agent::message::ChatMessage`], which is the provider-wire format
//! consumed by [`crate::agent::provider::LlmProvider`] implementations;
//! [`crate::completion`] and [`crate::replay`] convert between the two.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::tool::ToolDefinition;

/// Role of a message-shaped input/output item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant output.
    Assistant,
}

/// One typed content part within a message item (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text supplied by the caller.
    InputText {
        /// The text itself.
        text: String,
    },
    /// An image supplied by the caller (raw bytes or data URL, opaque to us).
    InputImage {
        /// Image payload or URL, opaque to this crate except for image-strip detection (§4.11).
        image_url: String,
    },
    /// Plain text produced by the model.
    OutputText {
        /// The text itself.
        text: String,
    },
    /// An image produced by the model (e.g. via the `image_generation` tool).
    OutputImage {
        /// Image payload, opaque to this crate except for image-strip detection (§4.11).
        data: String,
    },
}

impl ContentPart {
    /// Returns the part's text/data payload regardless of variant, for size checks.
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            Self::InputText { text } | Self::OutputText { text } => text,
            Self::InputImage { image_url } => image_url,
            Self::OutputImage { data } => data,
        }
    }
}

/// A single input/output item in a response's conversation history (§3).
///
/// Invariant: a `FunctionCallOutput`'s `call_id` must match a prior
/// `FunctionCall`'s `call_id` within the same response chain (enforced by
/// [`crate::replay`] when merging chains, not by this type itself).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum InputItem {
    /// A user/assistant/system message with ordered content parts.
    Message {
        /// Who is speaking.
        role: ItemRole,
        /// Ordered content parts.
        content: Vec<ContentPart>,
    },
    /// A tool call the model requested.
    FunctionCall {
        /// Correlates with the matching `FunctionCallOutput`.
        call_id: String,
        /// Tool name.
        name: String,
        /// JSON-encoded arguments.
        arguments: String,
    },
    /// The result of executing a tool call.
    FunctionCallOutput {
        /// Matches the originating `FunctionCall`'s `call_id`.
        call_id: String,
        /// The handler's return value (becomes a sentinel after image-strip, §4.11).
        output: String,
    },
    /// A model reasoning block (opaque, carried through unmodified).
    Reasoning {
        /// Reasoning text, not shown to the end user in most clients.
        content: String,
    },
}

impl InputItem {
    /// Convenience constructor for a plain-text message item.
    #[must_use]
    pub fn text_message(role: ItemRole, text: impl Into<String>) -> Self {
        Self::Message {
            role,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }
}

/// The `input` field of a request: either a plain string or a full item list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    /// Shorthand for a single user message.
    Text(String),
    /// A fully-specified ordered list of input items.
    Items(Vec<InputItem>),
}

impl ResponseInput {
    /// Normalizes either form into an ordered item list.
    #[must_use]
    pub fn into_items(self) -> Vec<InputItem> {
        match self {
            Self::Text(text) => vec![InputItem::text_message(ItemRole::User, text)],
            Self::Items(items) => items,
        }
    }
}

/// Reasoning sampling options (model-specific, passed through opaquely).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningOptions {
    /// Reasoning effort hint (e.g. `"low"`, `"medium"`, `"high"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// `POST /v1/responses` request body (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCreateRequest {
    /// Ordered input, plain text or typed items.
    pub input: ResponseInput,
    /// Model identifier, optionally `provider@model`.
    pub model: String,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens the model may generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Reasoning sampling options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
    /// Truncation policy identifier, passed through to the upstream provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<String>,
    /// Opaque caller metadata, stored alongside the response if `store` is set.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Whether to persist this response's input/output items (§4.12).
    #[serde(default)]
    pub store: bool,
    /// Replay chain anchor: merge a prior response's history before this request's input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    /// Tool definitions available to the model this turn.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Tool choice directive, passed through to the upstream provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Additional response fields the caller wants included.
    #[serde(default)]
    pub include: Vec<String>,
    /// Request this response be streamed as SSE (§6).
    #[serde(default)]
    pub stream: bool,
}

/// Token usage for one completion (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Tokens served from a provider-side cache, if reported.
    #[serde(default)]
    pub cached_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// Why the model stopped generating (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced a complete, terminal answer.
    Stop,
    /// The model requested one or more tool calls.
    ToolCalls,
    /// Generation was cut off by the max-token budget.
    Length,
    /// The provider's content filter intervened.
    ContentFilter,
}

/// One choice within a [`ModelCompletion`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// 0-based choice index (also used to coalesce streamed deltas, §4.10).
    pub index: u32,
    /// The message this choice produced.
    pub message: crate::agent::message::ChatMessage,
    /// Why generation stopped for this choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// A single upstream completion (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCompletion {
    /// Completion id. Assigned by the upstream provider, or generated (§4.9) if missing.
    pub id: String,
    /// Unix timestamp the completion was created.
    pub created: i64,
    /// Model that produced this completion.
    pub model: String,
    /// Ordered choices (almost always exactly one in this orchestrator's usage).
    pub choices: Vec<Choice>,
    /// Token usage, if the provider reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelCompletion {
    /// Returns `true` if the last choice's message carries any tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.choices
            .first()
            .is_some_and(|c| !c.message.tool_calls.is_empty())
    }
}

/// Status of a [`VectorStore`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreStatus {
    /// Still ingesting one or more files.
    InProgress,
    /// All files finished ingesting (successfully or not).
    Completed,
}

/// Per-status file counts for a [`VectorStore`] (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FileCounts {
    /// Total files ever associated with this store.
    pub total: u32,
    /// Files still being processed.
    pub in_progress: u32,
    /// Files successfully indexed.
    pub completed: u32,
    /// Files that failed to index.
    pub failed: u32,
}

/// A named collection of indexed files (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStore {
    /// Store id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Aggregate ingest status.
    pub status: VectorStoreStatus,
    /// Per-status file counts.
    pub file_counts: FileCounts,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Status of one file within a [`VectorStore`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreFileStatus {
    /// Queued, not yet started.
    Pending,
    /// Currently being chunked/embedded.
    InProgress,
    /// Indexed successfully.
    Completed,
    /// Failed to index.
    Error,
}

/// A file associated with a [`VectorStore`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreFile {
    /// File id.
    pub id: String,
    /// Owning vector store id.
    pub vector_store_id: String,
    /// Ingest status.
    pub status: VectorStoreFileStatus,
    /// Caller-supplied attributes, merged onto every chunk's metadata on ingest.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// One vector-indexed chunk of a source file (§3).
///
/// Invariant: `(file_id, chunk_index)` is unique; `chunk_index ∈ [0, total_chunks)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Short, content-addressed id (§C1 `ids::chunk_fingerprint`).
    pub chunk_id: String,
    /// Owning file id.
    pub file_id: String,
    /// Owning vector store id.
    pub vector_store_id: String,
    /// 0-based position within the file's chunk sequence.
    pub chunk_index: usize,
    /// Total number of chunks the file was split into.
    pub total_chunks: usize,
    /// Chunk text.
    pub content: String,
    /// Dense embedding vector, present once indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Merged file attributes plus `filename`.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// A single retrieval hit, returned by C4/C5/C6 (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source file id.
    pub file_id: String,
    /// Source filename.
    pub filename: String,
    /// Normalized relevance score in `[0, 1]`.
    pub score: f32,
    /// The chunk's content, wrapped as a content part for direct reuse in messages.
    pub content: Vec<ContentPart>,
    /// Attributes, always carrying `chunk_id`, `chunk_index`, `vector_store_id`.
    pub attributes: HashMap<String, Value>,
}

impl SearchResult {
    /// Reads the `chunk_id` attribute, if present.
    #[must_use]
    pub fn chunk_id(&self) -> Option<&str> {
        self.attributes.get("chunk_id").and_then(Value::as_str)
    }

    /// Reads the `chunk_index` attribute, if present.
    #[must_use]
    pub fn chunk_index(&self) -> Option<usize> {
        self.attributes
            .get("chunk_index")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    /// Concatenates this result's content parts into a flat string (for LLM prompts).
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ContentPart::payload)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One incremental fragment of a tool call within a [`StreamDelta`] (§4.10).
///
/// `tool_call_index` is the position within the message's tool-call array,
/// distinct from `id`, which may only arrive on the fragment that opens the
/// call. Reassembly keys on `(choice_index, tool_call_index)`, never on `id`
/// alone, since some providers omit `id` from continuation fragments.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    /// Position of this tool call within the message's tool-call array.
    pub tool_call_index: u32,
    /// The call's id, present only on the opening fragment.
    pub id: Option<String>,
    /// The tool's name, present only on the opening fragment.
    pub name: Option<String>,
    /// A fragment of the JSON-encoded arguments string, to be concatenated in order.
    pub arguments_fragment: Option<String>,
}

/// One incremental delta from a streaming completion (§3, §4.10).
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    /// Which choice this delta belongs to (almost always `0`).
    pub choice_index: u32,
    /// A fragment of the assistant's text content, if any.
    pub content: Option<String>,
    /// Tool-call fragments carried by this delta, if any.
    pub tool_call_deltas: Vec<ToolCallDelta>,
    /// Set on the final delta for this choice.
    pub finish_reason: Option<FinishReason>,
}

/// One iteration of the agentic search controller (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticSearchIteration {
    /// 1-based iteration number.
    pub iteration: usize,
    /// The query issued this iteration (empty for the synthetic seed iteration marker).
    pub query: String,
    /// Number of results retrieved this iteration.
    pub retrieved: usize,
    /// Why the loop stopped, if this is the final iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    /// A `##MEMORY##` fragment the model chose to carry forward, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Whether this is the terminal iteration.
    pub is_final: bool,
}

/// Result of a full agentic search run (§4.7 step 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticSearchResult {
    /// Deduplicated, score-sorted, truncated result buffer.
    pub data: Vec<SearchResult>,
    /// Full iteration history.
    pub search_iterations: Vec<AgenticSearchIteration>,
    /// Summary built from `##MEMORY##` fragments, or the termination summary.
    pub knowledge_acquired: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_input_text_normalizes_to_single_user_item() {
        let input = ResponseInput::Text("hi".to_string());
        let items = input.into_items();
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            InputItem::Message { role: ItemRole::User, .. }
        ));
    }

    #[test]
    fn has_tool_calls_false_when_empty() {
        let completion = ModelCompletion {
            id: "c1".to_string(),
            created: 0,
            model: "gpt-4".to_string(),
            choices: vec![Choice {
                index: 0,
                message: crate::agent::message::user_message("hi"),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: None,
        };
        assert!(!completion.has_tool_calls());
    }

    #[test]
    fn search_result_text_joins_parts() {
        let result = SearchResult {
            file_id: "f1".to_string(),
            filename: "doc.txt".to_string(),
            score: 0.9,
            content: vec![
                ContentPart::InputText { text: "a".to_string() },
                ContentPart::InputText { text: "b".to_string() },
            ],
            attributes: HashMap::new(),
        };
        assert_eq!(result.text(), "a\nb");
    }

    #[test]
    fn deserializes_minimal_request() {
        let json = serde_json::json!({"input": "Say hi", "model": "gpt-4"});
        let req: ResponseCreateRequest = serde_json::from_value(json).unwrap_or_else(|e| {
            unreachable!("expected valid request, got {e}")
        });
        assert_eq!(req.model, "gpt-4");
        assert!(!req.store);
    }
}
