//! Hybrid search: fan out to the vector and lexical providers, dedup, and
//! fuse scores (C6, §4.5).
//!
//! Both providers already return scores normalized to roughly `[0, 1]`
//! (cosine similarity, BM25-over-max); this stage re-normalizes each batch by
//! its own max score before combining so that a batch where every hit scored
//! low (e.g. a niche lexical match) doesn't get crowded out purely because
//! the other channel happened to produce higher raw numbers (§4.5, §9 Open
//! Question 2 — per-batch max-normalize, not reciprocal-rank fusion).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OrchestratorError;
use crate::filter::Filter;
use crate::ids;
use crate::lexical_search::LexicalSearch;
use crate::model::SearchResult;
use crate::vector_store::VectorStore;

/// Default fusion weight favoring the vector channel (§4.5, `OPEN_RESPONSES_HYBRID_ALPHA`).
pub const DEFAULT_ALPHA: f32 = 0.5;

/// Fans C4+C5 out in parallel and fuses their results (C6).
pub struct HybridSearch {
    vector_store: Arc<VectorStore>,
    lexical_search: Arc<LexicalSearch>,
    alpha: f32,
}

impl HybridSearch {
    /// Builds a hybrid search over the given vector/lexical providers.
    ///
    /// `alpha` weights the vector channel; `1.0 - alpha` weights lexical.
    #[must_use]
    pub const fn new(vector_store: Arc<VectorStore>, lexical_search: Arc<LexicalSearch>, alpha: f32) -> Self {
        Self {
            vector_store,
            lexical_search,
            alpha,
        }
    }

    /// Runs one hybrid search: scope to `vector_store_ids`, intersect with
    /// `filter`, fan out, dedup, fuse, rank, truncate to `top_k` (§4.5).
    ///
    /// # Errors
    ///
    /// Propagates [`OrchestratorError`] from either underlying provider.
    pub async fn search(
        &self,
        query: &str,
        vector_store_ids: &[String],
        filter: Option<Filter>,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>, OrchestratorError> {
        let scope = Filter::scope(vector_store_ids);
        let combined = Filter::and_optional(scope, filter);
        let combined_ref = combined.as_ref();

        // Over-fetch each channel so fusion has enough candidates to re-rank
        // before truncating to the caller's requested top_k.
        let fan_out_k = (top_k * 3).max(top_k + 10);

        let (vector_results, lexical_results) = tokio::join!(
            self.vector_store.search(query, fan_out_k, combined_ref, score_threshold),
            self.lexical_search.search(query, fan_out_k, combined_ref),
        );
        let vector_results = vector_results?;
        let lexical_results = lexical_results?;

        let fused = fuse(vector_results, lexical_results, self.alpha);
        let mut ranked: Vec<SearchResult> = fused.into_values().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k.max(1));
        Ok(ranked)
    }
}

fn dedup_key_for(result: &SearchResult) -> String {
    ids::dedup_key(&result.file_id, result.chunk_id(), result.chunk_index(), &result.text())
}

fn max_score(results: &[SearchResult]) -> f32 {
    results.iter().map(|r| r.score).fold(0.0f32, f32::max).max(f32::EPSILON)
}

/// Merges two ranked lists by dedup key, max-normalizing each batch first and
/// linearly combining with `alpha` (§4.5 step 4-5).
fn fuse(
    vector_results: Vec<SearchResult>,
    lexical_results: Vec<SearchResult>,
    alpha: f32,
) -> HashMap<String, SearchResult> {
    let vector_max = max_score(&vector_results);
    let lexical_max = max_score(&lexical_results);

    let mut fused: HashMap<String, SearchResult> = HashMap::new();
    let mut partial_scores: HashMap<String, f32> = HashMap::new();

    for mut result in vector_results {
        let key = dedup_key_for(&result);
        let normalized = result.score / vector_max;
        partial_scores.insert(key.clone(), alpha * normalized);
        result.score = alpha * normalized;
        fused.insert(key, result);
    }

    for result in lexical_results {
        let key = dedup_key_for(&result);
        let normalized = result.score / lexical_max;
        let contribution = (1.0 - alpha) * normalized;
        partial_scores
            .entry(key.clone())
            .and_modify(|s| *s += contribution)
            .or_insert(contribution);
        fused
            .entry(key.clone())
            .and_modify(|r| r.score = partial_scores[&key])
            .or_insert_with(|| {
                let mut r = result;
                r.score = contribution;
                r
            });
    }

    fused
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use super::*;

    fn result(file_id: &str, chunk_index: usize, score: f32) -> SearchResult {
        let mut attributes = StdHashMap::new();
        attributes.insert("chunk_index".to_string(), serde_json::json!(chunk_index));
        SearchResult {
            file_id: file_id.to_string(),
            filename: format!("{file_id}.txt"),
            score,
            content: vec![crate::model::ContentPart::InputText {
                text: "x".to_string(),
            }],
            attributes,
        }
    }

    #[test]
    fn fuse_combines_scores_for_shared_key() {
        let vector = vec![result("f1", 0, 0.8)];
        let lexical = vec![result("f1", 0, 4.0)];
        let fused = fuse(vector, lexical, 0.5);
        let merged = fused.values().next().unwrap_or_else(|| unreachable!("expected one result"));
        // vector normalized to 1.0 * 0.5 + lexical normalized to 1.0 * 0.5 = 1.0
        assert!((merged.score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn fuse_keeps_vector_only_hit_with_partial_score() {
        let vector = vec![result("f1", 0, 0.5)];
        let lexical: Vec<SearchResult> = Vec::new();
        let fused = fuse(vector, lexical, 0.5);
        assert_eq!(fused.len(), 1);
        let merged = fused.values().next().unwrap_or_else(|| unreachable!("expected one result"));
        assert!((merged.score - 0.5).abs() < 1e-5);
    }

    #[test]
    fn fuse_dedups_by_file_and_chunk() {
        let vector = vec![result("f1", 0, 0.9), result("f2", 0, 0.3)];
        let lexical = vec![result("f1", 0, 2.0)];
        let fused = fuse(vector, lexical, 0.5);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn alpha_zero_ignores_vector_channel() {
        let vector = vec![result("f1", 0, 0.9)];
        let lexical = vec![result("f1", 0, 4.0)];
        let fused = fuse(vector, lexical, 0.0);
        let merged = fused.values().next().unwrap_or_else(|| unreachable!("expected one result"));
        assert!((merged.score - 1.0).abs() < 1e-5);
    }
}
