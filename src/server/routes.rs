//! HTTP/SSE handlers for the external surface (§6).
//!
//! Each handler wires C12 (replay) -> `server::convert` -> C10/C11
//! (blocking/streaming orchestrator) -> persistence, but owns none of that
//! logic itself; it only translates between the wire shapes in
//! [`crate::model`] and the calls the lower layers expect.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::OrchestratorError;
use crate::filter::Filter;
use crate::model::{ContentPart, InputItem, ItemRole, ResponseCreateRequest, SearchResult};
use crate::replay;
use crate::streaming::{self, SseEvent};

use super::convert;
use super::state::AppState;

/// Builds the axum router for the 4 external routes (§6).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response))
        .route("/v1/responses/{id}", get(get_response))
        .route("/v1/vector_stores/{id}/search", post(search_vector_store))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// `POST /v1/responses` (§6).
///
/// Branches on the request's `stream` flag after building the same
/// replay-rewritten message list either way; the blocking and streaming
/// branches share C9's tool dispatch but diverge on how the terminal answer
/// reaches this handler (a return value vs. a tee'd SSE frame stream).
async fn create_response(
    State(state): State<AppState>,
    Json(request): Json<ResponseCreateRequest>,
) -> Result<Response, OrchestratorError> {
    let model = if request.model.trim().is_empty() {
        state.config.default_model.clone()
    } else {
        request.model.clone()
    };
    let current_items = request.input.into_items();
    let merged_items = replay::build_replay_input(
        &state.item_store,
        request.previous_response_id.as_deref(),
        current_items.clone(),
    )
    .await?;
    let messages = convert::input_items_to_chat_messages(&merged_items);
    let tools = request.tools.clone();
    let store_flag = request.store;

    if request.stream {
        return Ok(stream_response(state, model, messages, tools, store_flag, current_items));
    }

    let completion = crate::completion::run(
        &state.provider,
        &state.registry,
        &model,
        messages,
        tools,
        state.config.max_tool_calls,
    )
    .await?;

    if store_flag {
        let output_items = convert::completion_to_output_items(&completion);
        if let Err(err) = state.item_store.store(&completion.id, &current_items, &output_items).await {
            tracing::warn!(error = %err, response_id = %completion.id, "failed to persist response");
        }
    }

    Ok(Json(completion).into_response())
}

/// Drives C11 in a background task and tees its SSE frames to the HTTP
/// response body, accumulating enough of the stream to persist it when
/// `store` is set (§4.10, §4.12).
///
/// `streaming::run` has no return value of its own: the only way to learn
/// the response id and final text is to read them back off the same `chunk`
/// payloads the client sees, since that JSON is the crate's public wire
/// format rather than a private implementation detail.
fn stream_response(
    state: AppState,
    model: String,
    messages: Vec<crate::agent::message::ChatMessage>,
    tools: Vec<crate::agent::tool::ToolDefinition>,
    store_flag: bool,
    current_items: Vec<InputItem>,
) -> Response {
    let (frame_tx, frame_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<SseEvent>();

    let provider = Arc::clone(&state.provider);
    let registry = Arc::clone(&state.registry);
    let max_tool_calls = state.config.max_tool_calls;
    tokio::spawn(async move {
        streaming::run(&provider, &registry, &model, messages, tools, max_tool_calls, &event_tx).await;
    });

    let item_store = Arc::clone(&state.item_store);
    tokio::spawn(async move {
        let mut response_id: Option<String> = None;
        let mut content = String::new();
        while let Some(event) = event_rx.recv().await {
            if let SseEvent::Named { event: kind, data } = &event {
                if *kind == "chunk" {
                    absorb_chunk(data, &mut response_id, &mut content);
                }
            }
            if frame_tx.send(event.into_frame()).is_err() {
                break;
            }
        }
        if store_flag {
            if let Some(id) = response_id {
                let output_items = vec![InputItem::Message {
                    role: ItemRole::Assistant,
                    content: vec![ContentPart::OutputText { text: content }],
                }];
                if let Err(err) = item_store.store(&id, &current_items, &output_items).await {
                    tracing::warn!(error = %err, response_id = %id, "failed to persist streamed response");
                }
            }
        }
    });

    let body_stream = UnboundedReceiverStream::new(frame_rx)
        .map(|frame| Ok::<_, std::convert::Infallible>(axum::body::Bytes::from(frame)));
    let body = Body::from_stream(body_stream);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Reads the `id`/`content` fields out of one `chunk` event's JSON payload.
///
/// A malformed payload is skipped rather than treated as fatal: the client
/// already received the raw frame, and losing one field from the persisted
/// copy is far cheaper than tearing down an otherwise-healthy stream.
fn absorb_chunk(data: &str, response_id: &mut Option<String>, content: &mut String) {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return;
    };
    if response_id.is_none() {
        if let Some(id) = value.get("id").and_then(Value::as_str) {
            *response_id = Some(id.to_string());
        }
    }
    if let Some(fragment) = value.get("content").and_then(Value::as_str) {
        content.push_str(fragment);
    }
}

/// `GET /v1/responses/{id}` (§4.12, §6).
#[derive(Debug, Serialize)]
struct ResponseRecord {
    id: String,
    output: Vec<InputItem>,
}

async fn get_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResponseRecord>, OrchestratorError> {
    let output = state.item_store.get_output_items(&id).await?;
    Ok(Json(ResponseRecord { id, output }))
}

/// `POST /v1/vector_stores/{id}/search` body (§6).
#[derive(Debug, Deserialize)]
struct VectorStoreSearchRequest {
    query: String,
    #[serde(default)]
    max_num_results: Option<usize>,
    #[serde(default)]
    filters: Option<Filter>,
    /// Ranking hints, passed through opaquely; this crate has one ranking strategy.
    #[serde(default)]
    #[allow(dead_code)]
    ranking_options: Option<Value>,
}

async fn search_vector_store(
    State(state): State<AppState>,
    Path(vector_store_id): Path<String>,
    Json(body): Json<VectorStoreSearchRequest>,
) -> Result<Json<Vec<SearchResult>>, OrchestratorError> {
    let scope = Filter::scope(&[vector_store_id]);
    let combined = Filter::and_optional(scope, body.filters);
    let top_k = body.max_num_results.unwrap_or(10);
    let results = state
        .vector_store
        .search(&body.query, top_k, combined.as_ref(), state.config.score_threshold)
        .await?;
    Ok(Json(results))
}
