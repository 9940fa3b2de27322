//! Agentic search controller (C8, §4.7).
//!
//! A bounded-iteration control loop: run an initial hybrid search, then ask
//! the model each round to either refine the query (`NEXT_QUERY:`) or declare
//! the retrieval complete (`TERMINATE:`). Guards against three ways this loop
//! could otherwise run forever or waste the upstream budget: a cap on
//! consecutive malformed decisions, a cap on cumulative repeated queries, and
//! a hard iteration ceiling.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::message::{system_message, user_message, ChatRequest};
use crate::agent::provider::LlmProvider;
use crate::error::OrchestratorError;
use crate::filter::{CompareOp, CompoundOp, Filter};
use crate::hybrid_search::HybridSearch;
use crate::model::{AgenticSearchIteration, AgenticSearchResult, SearchResult};

/// Consecutive invalid LLM decisions tolerated within one iteration before
/// forcing termination (§4.7 step 4).
const MAX_INVALID_DECISION_ATTEMPTS: usize = 3;
/// Cumulative repeats of the same normalized query before forcing
/// termination (§4.7 step 5).
const MAX_REPEATED_QUERY_COUNT: usize = 3;
/// How many buffer entries are shown to the model each decision round.
const MAX_BUFFER_PREVIEW: usize = 12;
/// How much of each buffered chunk's text is shown in the decision prompt.
const SNIPPET_PREVIEW_CHARS: usize = 200;

const DECISION_SYSTEM_PROMPT: &str = "You are the retrieval planner for an agentic search loop. \
Given the question, the current buffer of retrieved chunks, and the history of prior iterations, \
respond with exactly one line in exactly one of these two forms:\n\
TERMINATE: <one-paragraph summary answering the question from the buffer>\n\
NEXT_QUERY: <refined search query> {<json object of attribute filters, or {}>} [##MEMORY## <fragment worth remembering>]\n\
The ##MEMORY## suffix is optional. Do not output anything else.";

/// Inputs to one agentic search run (§4.7).
pub struct AgenticSearchRequest {
    /// The question driving retrieval.
    pub question: String,
    /// Vector stores to scope every search to.
    pub vector_store_ids: Vec<String>,
    /// Caller-supplied metadata filter, ANDed with every query's own filter.
    pub user_filter: Option<Filter>,
    /// Results kept in the final truncated buffer.
    pub max_results: usize,
    /// Hard cap on decision iterations.
    pub max_iterations: usize,
    /// Optional prefix applied to the seed query (e.g. a named search profile).
    pub seed_name: Option<String>,
    /// Minimum score a hit must clear to be retained.
    pub score_threshold: f32,
}

/// One progress event emitted per step (§4.7 "Event emission", §6 SSE `response.*`).
#[derive(Debug, Clone, Serialize)]
pub struct AgenticSearchEvent {
    /// Which step produced this event (`seed`, `search`, `iteration_complete`, `terminate`).
    pub phase: String,
    /// 1-based iteration number this event belongs to.
    pub iteration: usize,
    /// The query issued this step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Number of results retrieved this step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Why the loop stopped, if this event reports termination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn emit(
    events: Option<&UnboundedSender<AgenticSearchEvent>>,
    phase: &str,
    iteration: usize,
    query: Option<String>,
    count: Option<usize>,
    reason: Option<String>,
) {
    if let Some(tx) = events {
        let _ = tx.send(AgenticSearchEvent {
            phase: phase.to_string(),
            iteration,
            query,
            count,
            reason,
        });
    }
}

/// Runs the bounded-iteration agentic search loop (§4.7 steps 1-8).
///
/// # Errors
///
/// Returns [`OrchestratorError::InvalidArgument`] if `request.question` is
/// blank or `max_results`/`max_iterations` is zero, or propagates errors from
/// the underlying [`HybridSearch`] or upstream provider.
pub async fn run(
    hybrid: &HybridSearch,
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    request: AgenticSearchRequest,
    events: Option<&UnboundedSender<AgenticSearchEvent>>,
) -> Result<AgenticSearchResult, OrchestratorError> {
    if request.question.trim().is_empty() {
        return Err(OrchestratorError::InvalidArgument(
            "agentic search question must not be empty".to_string(),
        ));
    }
    if request.max_results == 0 {
        return Err(OrchestratorError::InvalidArgument(
            "agentic search max_results must be >= 1".to_string(),
        ));
    }
    if request.max_iterations == 0 {
        return Err(OrchestratorError::InvalidArgument(
            "agentic search max_iterations must be >= 1".to_string(),
        ));
    }

    let seed_query = request.seed_name.as_ref().map_or_else(
        || request.question.clone(),
        |name| format!("{name}: {}", request.question),
    );

    let mut buffer: HashMap<(String, usize), SearchResult> = HashMap::new();
    let mut history: Vec<AgenticSearchIteration> = Vec::new();
    let mut seen_queries: HashMap<String, usize> = HashMap::new();
    let mut knowledge_fragments: Vec<String> = Vec::new();

    emit(events, "seed", 1, Some(seed_query.clone()), None, None);
    let seed_results = hybrid
        .search(
            &seed_query,
            &request.vector_store_ids,
            request.user_filter.clone(),
            request.max_results,
            request.score_threshold,
        )
        .await?;

    if seed_results.is_empty() {
        let reason = "No initial results found.".to_string();
        emit(events, "terminate", 1, None, Some(0), Some(reason.clone()));
        history.push(AgenticSearchIteration {
            iteration: 1,
            query: seed_query,
            retrieved: 0,
            termination_reason: Some(reason.clone()),
            memory: None,
            is_final: true,
        });
        return Ok(AgenticSearchResult {
            data: Vec::new(),
            search_iterations: history,
            knowledge_acquired: reason,
        });
    }
    merge_into_buffer(&mut buffer, seed_results);

    let mut termination_summary = String::new();

    for iteration_number in 1..=request.max_iterations {
        let mut decision = Decision::Invalid;
        for _ in 0..MAX_INVALID_DECISION_ATTEMPTS {
            let raw = ask_llm_decision(provider, model, &request.question, &buffer, &history).await?;
            decision = parse_decision(&raw);
            if !matches!(decision, Decision::Invalid) {
                break;
            }
        }

        match decision {
            Decision::Invalid => {
                let reason = "LLM decision invalid".to_string();
                emit(events, "terminate", iteration_number, None, None, Some(reason.clone()));
                history.push(AgenticSearchIteration {
                    iteration: iteration_number,
                    query: String::new(),
                    retrieved: 0,
                    termination_reason: Some(reason.clone()),
                    memory: None,
                    is_final: true,
                });
                termination_summary = reason;
                break;
            }
            Decision::Terminate { summary } => {
                emit(events, "terminate", iteration_number, None, None, Some(summary.clone()));
                history.push(AgenticSearchIteration {
                    iteration: iteration_number,
                    query: String::new(),
                    retrieved: 0,
                    termination_reason: Some(summary.clone()),
                    memory: None,
                    is_final: true,
                });
                termination_summary = summary;
                break;
            }
            Decision::NextQuery { query, filter_json, memory } => {
                let normalized = query.trim().to_lowercase();
                let repeat_count = seen_queries.entry(normalized).or_insert(0);
                *repeat_count += 1;
                if *repeat_count >= MAX_REPEATED_QUERY_COUNT {
                    let reason = "repeated queries exceeded the retry limit".to_string();
                    emit(events, "terminate", iteration_number, Some(query), None, Some(reason.clone()));
                    history.push(AgenticSearchIteration {
                        iteration: iteration_number,
                        query: String::new(),
                        retrieved: 0,
                        termination_reason: Some(reason.clone()),
                        memory: None,
                        is_final: true,
                    });
                    termination_summary = reason;
                    break;
                }

                if iteration_number == request.max_iterations {
                    let reason = format!("Reached max iterations ({}).", request.max_iterations);
                    emit(events, "terminate", iteration_number, Some(query), None, Some(reason.clone()));
                    history.push(AgenticSearchIteration {
                        iteration: iteration_number,
                        query: String::new(),
                        retrieved: 0,
                        termination_reason: Some(reason.clone()),
                        memory: None,
                        is_final: true,
                    });
                    termination_summary = reason;
                    break;
                }

                let filter = filter_json.as_deref().and_then(parse_attribute_filter);
                if filter_json.as_deref().is_some_and(|raw| parse_attribute_filter(raw).is_none() && !raw.trim().is_empty() && raw.trim() != "{}") {
                    tracing::warn!(iteration = iteration_number, "ignoring structurally invalid attribute filter from agentic search decision");
                }
                let combined_filter = Filter::and_optional(request.user_filter.clone(), filter);

                emit(events, "search", iteration_number, Some(query.clone()), None, None);
                let results = hybrid
                    .search(
                        &query,
                        &request.vector_store_ids,
                        combined_filter,
                        request.max_results,
                        request.score_threshold,
                    )
                    .await?;
                let retrieved = results.len();
                merge_into_buffer(&mut buffer, results);
                if let Some(fragment) = &memory {
                    knowledge_fragments.push(format!("Iteration {iteration_number}: {fragment}"));
                }
                emit(events, "iteration_complete", iteration_number, Some(query.clone()), Some(retrieved), None);
                history.push(AgenticSearchIteration {
                    iteration: iteration_number,
                    query,
                    retrieved,
                    termination_reason: None,
                    memory,
                    is_final: false,
                });
            }
        }
    }

    let mut data: Vec<SearchResult> = buffer.into_values().collect();
    data.sort_by(|a, b| b.score.total_cmp(&a.score));
    data.truncate(request.max_results);

    let knowledge_acquired = if knowledge_fragments.is_empty() {
        termination_summary
    } else {
        knowledge_fragments.join("\n")
    };

    Ok(AgenticSearchResult {
        data,
        search_iterations: history,
        knowledge_acquired,
    })
}

fn merge_into_buffer(buffer: &mut HashMap<(String, usize), SearchResult>, results: Vec<SearchResult>) {
    for result in results {
        let key = (result.file_id.clone(), result.chunk_index().unwrap_or(0));
        buffer
            .entry(key)
            .and_modify(|existing| {
                if result.score > existing.score {
                    *existing = result.clone();
                }
            })
            .or_insert(result);
    }
}

/// One parsed LLM decision (§4.7 step 3).
enum Decision {
    /// `TERMINATE: <summary>`.
    Terminate {
        /// The model's closing summary.
        summary: String,
    },
    /// `NEXT_QUERY: <query> {<filter>} [##MEMORY## <fragment>]`.
    NextQuery {
        /// The refined search query.
        query: String,
        /// The raw JSON filter object, if present.
        filter_json: Option<String>,
        /// The memory fragment, if present.
        memory: Option<String>,
    },
    /// Anything that doesn't match either form.
    Invalid,
}

fn parse_decision(text: &str) -> Decision {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("TERMINATE:") {
        return Decision::Terminate {
            summary: rest.trim().to_string(),
        };
    }
    if let Some(rest) = trimmed.strip_prefix("NEXT_QUERY:") {
        let rest = rest.trim();
        let (before_memory, memory) = match rest.split_once("##MEMORY##") {
            Some((before, fragment)) => (before.trim(), Some(fragment.trim().to_string())),
            None => (rest, None),
        };
        let (query, filter_json) = extract_trailing_json(before_memory);
        let query = query.trim().to_string();
        if query.is_empty() {
            return Decision::Invalid;
        }
        return Decision::NextQuery { query, filter_json, memory };
    }
    Decision::Invalid
}

/// Splits `s` into the text before its first balanced `{...}` object and that
/// object itself, if one is present.
fn extract_trailing_json(s: &str) -> (String, Option<String>) {
    let Some(start) = s.find('{') else {
        return (s.to_string(), None);
    };
    let mut depth = 0i32;
    let mut end = None;
    for (offset, ch) in s[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset + ch.len_utf8());
                    break;
                }
            }
            _ => {}
        }
    }
    match end {
        Some(end) => (s[..start].to_string(), Some(s[start..end].to_string())),
        None => (s.to_string(), None),
    }
}

/// Parses a flat JSON object of attribute filters into an AND of `eq`
/// comparisons (§4.7 step 6). Structurally invalid JSON fails closed by
/// returning `None` (ignore the filter), never an error — only the search
/// call itself can raise `filter-application-failure` (§4.1).
fn parse_attribute_filter(json_str: &str) -> Option<Filter> {
    let value: Value = serde_json::from_str(json_str).ok()?;
    let obj = value.as_object()?;
    if obj.is_empty() {
        return None;
    }
    let mut filters: Vec<Filter> = obj
        .iter()
        .map(|(key, value)| Filter::Comparison {
            key: key.clone(),
            op: CompareOp::Eq,
            value: value.clone(),
        })
        .collect();
    if filters.len() == 1 {
        filters.pop()
    } else {
        Some(Filter::Compound {
            op: CompoundOp::And,
            filters,
        })
    }
}

async fn ask_llm_decision(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    question: &str,
    buffer: &HashMap<(String, usize), SearchResult>,
    history: &[AgenticSearchIteration],
) -> Result<String, OrchestratorError> {
    let prompt = render_decision_prompt(question, buffer, history);
    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![system_message(DECISION_SYSTEM_PROMPT), user_message(&prompt)],
        temperature: None,
        max_tokens: None,
        json_mode: false,
        stream: false,
        tools: Vec::new(),
    };
    let response = provider.chat(&request).await?;
    Ok(response.content)
}

fn render_decision_prompt(
    question: &str,
    buffer: &HashMap<(String, usize), SearchResult>,
    history: &[AgenticSearchIteration],
) -> String {
    let mut out = String::new();
    out.push_str("Question: ");
    out.push_str(question);
    out.push_str("\n\nCurrent buffer:\n");

    let mut entries: Vec<&SearchResult> = buffer.values().collect();
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    for entry in entries.into_iter().take(MAX_BUFFER_PREVIEW) {
        let snippet: String = entry.text().chars().take(SNIPPET_PREVIEW_CHARS).collect();
        out.push_str(&format!("- {} (score {:.2}): {}\n", entry.filename, entry.score, snippet));
    }

    if history.is_empty() {
        out.push_str("\nNo prior iterations.\n");
    } else {
        out.push_str("\nPrior iterations:\n");
        for iteration in history {
            out.push_str(&format!(
                "- iteration {}: query={:?} retrieved={}\n",
                iteration.iteration, iteration.query, iteration.retrieved
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use futures_util::Stream;

    use super::*;
    use crate::agent::message::ChatResponse;
    use crate::embedding::HashEmbedder;
    use crate::lexical_search::LexicalSearch;
    use crate::vector_store::{IndexRequest, VectorStore};

    struct ScriptedProvider {
        responses: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, OrchestratorError> {
            let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            if responses.is_empty() {
                return Err(OrchestratorError::Upstream("exhausted script".to_string()));
            }
            Ok(ChatResponse {
                content: responses.remove(0),
                usage: crate::agent::message::TokenUsage::default(),
                tool_calls: Vec::new(),
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn chat_stream_deltas(
            &self,
            _request: &ChatRequest,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<crate::model::StreamDelta, OrchestratorError>> + Send>>,
            OrchestratorError,
        > {
            unreachable!("agentic search never streams decisions")
        }
    }

    async fn seeded_hybrid(text: &str) -> (HybridSearch, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let path = dir.path().join("t.db");
        let store = Arc::new(
            VectorStore::open(path.to_str().unwrap_or_default(), Arc::new(HashEmbedder))
                .unwrap_or_else(|e| unreachable!("{e}")),
        );
        store
            .index(IndexRequest {
                file_id: "f1".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "doc.txt".to_string(),
                chunks: vec![crate::chunk::TextChunk {
                    text: text.to_string(),
                    index: 0,
                }],
                attributes: HashMap::new(),
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let lexical = Arc::new(LexicalSearch::new(store.connection()));
        (HybridSearch::new(store, lexical, 0.5), dir)
    }

    fn base_request(question: &str, max_iterations: usize) -> AgenticSearchRequest {
        AgenticSearchRequest {
            question: question.to_string(),
            vector_store_ids: vec!["vs1".to_string()],
            user_filter: None,
            max_results: 10,
            max_iterations,
            seed_name: None,
            score_threshold: 0.0,
        }
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec![]),
        });
        let result = run(&hybrid, &provider, "gpt-4", base_request("", 3), None).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn empty_seed_results_terminate_immediately() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec![]),
        });
        let mut request = base_request("completely unrelated astrophysics topic", 3);
        request.score_threshold = 0.99;
        let result = run(&hybrid, &provider, "gpt-4", request, None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(result.data.is_empty());
        assert_eq!(result.search_iterations.len(), 1);
        assert!(result.search_iterations[0].is_final);
        assert_eq!(result.knowledge_acquired, "No initial results found.");
    }

    #[tokio::test]
    async fn terminate_decision_ends_loop_with_summary() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec!["TERMINATE: the answer is tokio".to_string()]),
        });
        let result = run(&hybrid, &provider, "gpt-4", base_request("what runtime", 3), None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(result.knowledge_acquired, "the answer is tokio");
        assert_eq!(result.search_iterations.len(), 1);
        assert!(result.search_iterations[0].is_final);
    }

    #[tokio::test]
    async fn max_iterations_one_force_terminates_on_next_query() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec!["NEXT_QUERY: more tokio details {}".to_string()]),
        });
        let result = run(&hybrid, &provider, "gpt-4", base_request("what runtime", 1), None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(result.search_iterations.len(), 1);
        assert!(result.search_iterations[0].is_final);
        assert_eq!(result.search_iterations[0].termination_reason.as_deref(), Some("Reached max iterations (1)."));
    }

    #[tokio::test]
    async fn repeated_query_forces_termination() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec![
                "NEXT_QUERY: tokio runtime {}".to_string(),
                "NEXT_QUERY: tokio runtime {}".to_string(),
                "NEXT_QUERY: tokio runtime {}".to_string(),
            ]),
        });
        let result = run(&hybrid, &provider, "gpt-4", base_request("what runtime", 10), None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let last = result.search_iterations.last().unwrap_or_else(|| unreachable!("expected an iteration"));
        assert!(last.is_final);
        assert!(last.termination_reason.as_ref().is_some_and(|r| r.contains("repeated queries")));
    }

    #[tokio::test]
    async fn invalid_decision_three_times_force_terminates() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec!["garbage".to_string(), "garbage".to_string(), "garbage".to_string()]),
        });
        let result = run(&hybrid, &provider, "gpt-4", base_request("what runtime", 3), None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(result.search_iterations.len(), 1);
        assert_eq!(result.search_iterations[0].termination_reason.as_deref(), Some("LLM decision invalid"));
    }

    #[tokio::test]
    async fn memory_fragments_build_knowledge_acquired() {
        let (hybrid, _dir) = seeded_hybrid("rust tokio async runtime").await;
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: StdMutex::new(vec![
                "NEXT_QUERY: tokio internals {} ##MEMORY## Key1; Key2".to_string(),
                "TERMINATE: final answer".to_string(),
            ]),
        });
        let result = run(&hybrid, &provider, "gpt-4", base_request("what runtime", 5), None)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(result.knowledge_acquired.contains("Iteration 1:"));
        assert!(result.knowledge_acquired.contains("Key1; Key2"));
    }

    #[test]
    fn parse_decision_handles_filter_and_memory() {
        let decision = parse_decision(r#"NEXT_QUERY: tokio runtime {"category":"docs"} ##MEMORY## remember this"#);
        match decision {
            Decision::NextQuery { query, filter_json, memory } => {
                assert_eq!(query, "tokio runtime");
                assert_eq!(filter_json.as_deref(), Some(r#"{"category":"docs"}"#));
                assert_eq!(memory.as_deref(), Some("remember this"));
            }
            _ => unreachable!("expected NextQuery"),
        }
    }

    #[test]
    fn parse_decision_rejects_unrecognized_text() {
        assert!(matches!(parse_decision("I think the answer is..."), Decision::Invalid));
    }

    #[test]
    fn parse_attribute_filter_ignores_malformed_json() {
        assert!(parse_attribute_filter("not json").is_none());
        assert!(parse_attribute_filter("{}").is_none());
        assert!(parse_attribute_filter(r#"{"a":1}"#).is_some());
    }
}
