//! Process-wide, read-mostly handles shared across every HTTP handler.
//!
//! Mirrors §5 "Shared resources": the tool registry is immutable after
//! startup; the stores are the only mutable shared state, and they own their
//! own internal locking (a `dashmap`-backed per-key mutex in `VectorStore`,
//! a single connection-wide mutex in `ItemStore`).

use std::sync::Arc;

use crate::agent::provider::LlmProvider;
use crate::config::Config;
use crate::hybrid_search::HybridSearch;
use crate::store::ItemStore;
use crate::tool_registry::ToolRegistry;
use crate::vector_store::VectorStore;

/// Shared application state, cheaply cloneable (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Resolved process configuration.
    pub config: Arc<Config>,
    /// Upstream LLM provider.
    pub provider: Arc<dyn LlmProvider>,
    /// Process-wide native/terminal tool registry.
    pub registry: Arc<ToolRegistry>,
    /// Hybrid (vector + lexical) search, also reachable through the registry's
    /// `file_search`/`deep_research` tools.
    pub hybrid_search: Arc<HybridSearch>,
    /// Vector store, exposed directly for the `POST /v1/vector_stores/{id}/search` route.
    pub vector_store: Arc<VectorStore>,
    /// Input-item store backing replay and `GET /v1/responses/{id}`.
    pub item_store: Arc<ItemStore>,
}
