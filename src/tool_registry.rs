//! Tool registry and router: resolves a tool name to a handler kind (C7, §4.6).
//!
//! The registry is built once at startup and is otherwise immutable — native
//! tools never change at runtime. What *is* per-request is the alias map:
//! each [`crate::model::ResponseCreateRequest`]
//! may declare additional tool definitions (remote/client tools this
//! orchestrator has never heard of), and the router must resolve against the
//! union of the startup registry and that request's declared tools.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::provider::LlmProvider;
use crate::agent::tool::ToolDefinition;
use crate::agentic_search::{self, AgenticSearchEvent, AgenticSearchRequest};
use crate::error::OrchestratorError;
use crate::hybrid_search::HybridSearch;

/// How a resolved tool name should be dispatched (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// This crate executes the tool itself and feeds the result back to the model.
    Native,
    /// A client-side tool; the orchestrator cannot execute it and must hand
    /// control back to the caller (C9 `Outcome::UnresolvedClientTools`).
    Remote,
    /// A terminal tool whose invocation ends the tool-call loop outright
    /// (e.g. `image_generation` — its output *is* the final answer).
    Terminal,
}

/// A tool this crate can execute natively.
#[async_trait]
pub trait NativeTool: Send + Sync {
    /// Executes the tool against its JSON-encoded arguments.
    ///
    /// `events`, when present, is a sink for this tool's own progress events
    /// (currently only the agentic search tool publishes to it); plain tools
    /// ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if `arguments` fails to parse or the
    /// underlying operation fails.
    async fn call(
        &self,
        arguments: &str,
        events: Option<&UnboundedSender<AgenticSearchEvent>>,
    ) -> Result<Value, OrchestratorError>;
}

/// Process-wide registry of native and terminal tools, plus a per-request
/// overlay of the caller's declared tool definitions (C7).
pub struct ToolRegistry {
    native: HashMap<String, Arc<dyn NativeTool>>,
    terminal: HashSet<String>,
}

impl ToolRegistry {
    /// Builds the startup registry: `file_search` backed by one-shot hybrid
    /// search, `deep_research` backed by the agentic search controller (C8),
    /// `image_generation` registered as terminal (§4.6, §4.7).
    #[must_use]
    pub fn with_defaults(
        hybrid_search: Arc<HybridSearch>,
        provider: Arc<dyn LlmProvider>,
        agentic_model: String,
    ) -> Self {
        let mut native: HashMap<String, Arc<dyn NativeTool>> = HashMap::new();
        native.insert(
            "file_search".to_string(),
            Arc::new(FileSearchTool {
                hybrid_search: Arc::clone(&hybrid_search),
            }) as Arc<dyn NativeTool>,
        );
        native.insert(
            "deep_research".to_string(),
            Arc::new(DeepResearchTool {
                hybrid_search,
                provider,
                model: agentic_model,
            }) as Arc<dyn NativeTool>,
        );
        let mut terminal = HashSet::new();
        terminal.insert("image_generation".to_string());
        Self { native, terminal }
    }

    /// Resolves `name` to a [`ToolKind`], consulting the per-request declared
    /// tools for anything this registry doesn't already know (§4.6 step 1-2).
    ///
    /// `name` is first run through the request-scoped alias map built from
    /// `declared_tools` (§4.6) — a tool invoked under its alias resolves
    /// against the same canonical name a direct call would.
    #[must_use]
    pub fn resolve(&self, name: &str, declared_tools: &[ToolDefinition]) -> ToolKind {
        let canonical = canonicalize(name, declared_tools);
        if self.terminal.contains(canonical) {
            return ToolKind::Terminal;
        }
        if self.native.contains_key(canonical) {
            return ToolKind::Native;
        }
        if declared_tools.iter().any(|t| t.name == canonical) {
            return ToolKind::Remote;
        }
        // An undeclared, unregistered name still has to resolve to *something*;
        // treating it as remote hands it back to the caller rather than
        // silently dropping the call (§4.6 edge case: unknown tool names).
        ToolKind::Remote
    }

    /// Looks up the native handler for `name`, resolving `name` through the
    /// same alias map as [`resolve`](Self::resolve) first.
    #[must_use]
    pub fn native_handler(&self, name: &str, declared_tools: &[ToolDefinition]) -> Option<Arc<dyn NativeTool>> {
        self.native.get(canonicalize(name, declared_tools)).cloned()
    }

    /// The tool definitions to advertise to the model: this registry's native
    /// tools plus the caller's own declared tools (§4.6 — a request's `tools`
    /// field is additive to, not a replacement for, native tools).
    #[must_use]
    pub fn advertised_definitions(&self, declared_tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        let mut defs = vec![file_search_definition(), deep_research_definition()];
        defs.extend(declared_tools.iter().cloned());
        defs
    }
}

/// Builds the request-scoped alias map from `declared_tools` and resolves
/// `name` through it, falling back to `name` itself when no declared tool
/// claims it as an alias (§4.6).
fn canonicalize<'a>(name: &'a str, declared_tools: &'a [ToolDefinition]) -> &'a str {
    declared_tools
        .iter()
        .find(|t| t.alias.as_deref() == Some(name))
        .map_or(name, |t| t.name.as_str())
}

struct FileSearchTool {
    hybrid_search: Arc<HybridSearch>,
}

#[async_trait]
impl NativeTool for FileSearchTool {
    async fn call(&self, arguments: &str, _events: Option<&UnboundedSender<AgenticSearchEvent>>) -> Result<Value, OrchestratorError> {
        let args: FileSearchArgs = serde_json::from_str(arguments)?;
        let results = self
            .hybrid_search
            .search(
                &args.query,
                &args.vector_store_ids,
                None,
                args.max_num_results.unwrap_or(10),
                crate::vector_store::DEFAULT_SCORE_THRESHOLD,
            )
            .await?;
        Ok(serde_json::to_value(results)?)
    }
}

#[derive(serde::Deserialize)]
struct FileSearchArgs {
    query: String,
    #[serde(default)]
    vector_store_ids: Vec<String>,
    #[serde(default)]
    max_num_results: Option<usize>,
}

fn file_search_definition() -> ToolDefinition {
    ToolDefinition {
        name: "file_search".to_string(),
        description: "Search indexed vector stores for content relevant to a query, combining \
                       semantic and lexical retrieval."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query text." },
                "vector_store_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Vector store IDs to search within."
                },
                "max_num_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return. Defaults to 10."
                }
            },
            "required": ["query", "vector_store_ids"],
            "additionalProperties": false
        }),
        alias: None,
    }
}

/// C8's bounded-iteration controller, exposed as a native tool so the model
/// can opt into multi-round retrieval instead of a single `file_search` call.
struct DeepResearchTool {
    hybrid_search: Arc<HybridSearch>,
    provider: Arc<dyn LlmProvider>,
    model: String,
}

#[async_trait]
impl NativeTool for DeepResearchTool {
    async fn call(&self, arguments: &str, events: Option<&UnboundedSender<AgenticSearchEvent>>) -> Result<Value, OrchestratorError> {
        let args: DeepResearchArgs = serde_json::from_str(arguments)?;
        let request = AgenticSearchRequest {
            question: args.question,
            vector_store_ids: args.vector_store_ids,
            user_filter: None,
            max_results: args.max_results.unwrap_or(10),
            max_iterations: args.max_iterations.unwrap_or(5),
            seed_name: None,
            score_threshold: crate::vector_store::DEFAULT_SCORE_THRESHOLD,
        };
        let result = agentic_search::run(&self.hybrid_search, &self.provider, &self.model, request, events).await?;
        Ok(serde_json::to_value(result)?)
    }
}

#[derive(serde::Deserialize)]
struct DeepResearchArgs {
    question: String,
    #[serde(default)]
    vector_store_ids: Vec<String>,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    max_iterations: Option<usize>,
}

fn deep_research_definition() -> ToolDefinition {
    ToolDefinition {
        name: "deep_research".to_string(),
        description: "Run a multi-round, model-guided retrieval loop over indexed vector stores: \
                       search, read results, refine the query, and repeat until the answer is \
                       well-supported or the iteration budget runs out."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The question to research." },
                "vector_store_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Vector store IDs to search within."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results kept in the final buffer. Defaults to 10."
                },
                "max_iterations": {
                    "type": "integer",
                    "description": "Maximum number of refine-and-requery rounds. Defaults to 5."
                }
            },
            "required": ["question", "vector_store_ids"],
            "additionalProperties": false
        }),
        alias: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_registry() -> ToolRegistry {
        ToolRegistry {
            native: HashMap::new(),
            terminal: {
                let mut s = HashSet::new();
                s.insert("image_generation".to_string());
                s
            },
        }
    }

    #[test]
    fn terminal_tool_resolves_as_terminal() {
        let registry = empty_registry();
        assert_eq!(registry.resolve("image_generation", &[]), ToolKind::Terminal);
    }

    #[test]
    fn declared_unknown_tool_resolves_as_remote() {
        let registry = empty_registry();
        let declared = vec![ToolDefinition {
            name: "get_weather".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({}),
            alias: None,
        }];
        assert_eq!(registry.resolve("get_weather", &declared), ToolKind::Remote);
    }

    #[test]
    fn fully_unknown_tool_resolves_as_remote_not_dropped() {
        let registry = empty_registry();
        assert_eq!(registry.resolve("mystery_tool", &[]), ToolKind::Remote);
    }

    #[test]
    fn alias_resolves_to_canonical_terminal_tool() {
        let registry = empty_registry();
        let declared = vec![ToolDefinition {
            name: "image_generation".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({}),
            alias: Some("img_gen".to_string()),
        }];
        assert_eq!(registry.resolve("img_gen", &declared), ToolKind::Terminal);
        // The canonical name still resolves the same way directly.
        assert_eq!(registry.resolve("image_generation", &declared), ToolKind::Terminal);
    }

    #[test]
    fn alias_resolves_to_canonical_remote_tool() {
        let registry = empty_registry();
        let declared = vec![ToolDefinition {
            name: "get_weather".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({}),
            alias: Some("weather".to_string()),
        }];
        assert_eq!(registry.resolve("weather", &declared), ToolKind::Remote);
    }

    #[test]
    fn unaliased_name_does_not_match_an_unrelated_alias() {
        let registry = empty_registry();
        let declared = vec![ToolDefinition {
            name: "get_weather".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({}),
            alias: Some("weather".to_string()),
        }];
        // "get_weather" itself is not registered native/terminal, so a direct
        // (non-aliased) call still falls through to Remote via the declared
        // tools list, not because the alias matched.
        assert_eq!(registry.resolve("get_weather", &declared), ToolKind::Remote);
        assert_eq!(registry.resolve("unrelated", &declared), ToolKind::Remote);
    }

    #[test]
    fn advertised_definitions_includes_file_search_and_declared() {
        let registry = empty_registry();
        let declared = vec![ToolDefinition {
            name: "custom".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({}),
            alias: None,
        }];
        let defs = registry.advertised_definitions(&declared);
        assert!(defs.iter().any(|d| d.name == "file_search"));
        assert!(defs.iter().any(|d| d.name == "custom"));
    }
}
