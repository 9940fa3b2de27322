//! HTTP/SSE surface (§6): wires the lower layers (C1-C13) behind axum.

pub mod convert;
pub mod routes;
pub mod state;

pub use state::AppState;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::agent::provider::LlmProvider;
use crate::agent::providers::openai::OpenAiProvider;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::OrchestratorError;
use crate::hybrid_search::HybridSearch;
use crate::lexical_search::LexicalSearch;
use crate::store::ItemStore;
use crate::tool_registry::ToolRegistry;
use crate::vector_store::VectorStore;

/// Builds every shared component from `config` and serves the HTTP surface
/// until the process is asked to shut down (§5, §6).
///
/// # Errors
///
/// Returns [`OrchestratorError::Storage`] if either sqlite-backed store fails
/// to open, or an I/O error wrapped as [`OrchestratorError::Storage`] if the
/// bind address cannot be listened on.
pub async fn serve(config: Config) -> Result<(), OrchestratorError> {
    let state = build_state(config)?;
    let bind = state.config.bind.clone();

    let app = routes::router(state).layer(tower_http::trace::TraceLayer::new_for_http()).layer(
        tower_http::cors::CorsLayer::permissive(),
    );

    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| OrchestratorError::Storage(format!("binding {bind}: {e}")))?;
    tracing::info!(%bind, "orchestrator listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Storage(format!("server loop: {e}")))
}

fn build_state(config: Config) -> Result<AppState, OrchestratorError> {
    let config = Arc::new(config);

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder());
    let vector_store = Arc::new(VectorStore::open(&config.store_path, embedder)?);
    let lexical_search = Arc::new(LexicalSearch::new(vector_store.connection()));
    let hybrid_search = Arc::new(HybridSearch::new(
        Arc::clone(&vector_store),
        lexical_search,
        config.hybrid_alpha,
    ));
    let item_store = Arc::new(ItemStore::open(&config.store_path)?);

    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(&config));
    let registry = Arc::new(ToolRegistry::with_defaults(
        Arc::clone(&hybrid_search),
        Arc::clone(&provider),
        config.default_model.clone(),
    ));

    Ok(AppState {
        config,
        provider,
        registry,
        hybrid_search,
        vector_store,
        item_store,
    })
}
