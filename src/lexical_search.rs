//! Lexical (full-text) search provider (C5, §4.4).
//!
//! Implements BM25 (`k1 = 1.2`, `b = 0.75`) directly over the chunk rows the
//! vector store (C4) persists, rather than maintaining a separate inverted
//! index table — the corpus is small enough per-query that an in-process
//! term-frequency scan is simpler than keeping a second store in sync, and it
//! shares exactly the same [`Filter`] contract C4 uses (§4.4 "must accept the
//! same filter AST as the vector provider").

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;

use crate::error::OrchestratorError;
use crate::filter::Filter;
use crate::model::{Chunk, ContentPart, SearchResult};

/// BM25 term-frequency saturation parameter.
pub const BM25_K1: f32 = 1.2;
/// BM25 length-normalization parameter.
pub const BM25_B: f32 = 0.75;

/// Reads the same `chunks` table the vector store writes and scores matches
/// with BM25 (C5).
pub struct LexicalSearch {
    conn: Arc<AsyncMutex<rusqlite::Connection>>,
}

impl LexicalSearch {
    /// Wraps an existing sqlite connection shared with the vector store.
    ///
    /// Taking the connection rather than a path keeps the two providers
    /// reading a single on-disk file and a single in-process lock, so a
    /// concurrent write from [`crate::vector_store::VectorStore::index`] is
    /// never observed half-applied.
    #[must_use]
    pub const fn new(conn: Arc<AsyncMutex<rusqlite::Connection>>) -> Self {
        Self { conn }
    }

    /// BM25-ranked full-text search, filtered and top-k truncated (§4.4).
    ///
    /// An empty or whitespace-only `query` returns an empty list rather than
    /// an error, matching [`crate::vector_store::VectorStore::search`]'s
    /// contract — callers that fan the same query out to both providers
    /// (C6) must not have one provider error while the other returns empty.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::FilterApplicationFailed`] if `filter` is
    /// structurally invalid, or [`OrchestratorError::Storage`] on a read failure.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>, OrchestratorError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.load_all().await?;
        let corpus = build_corpus(&chunks);

        let mut scored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let metadata = attributes_with_ids(&chunk);
            if let Some(f) = filter {
                if !f.matches(&metadata)? {
                    continue;
                }
            }
            let score = bm25_score(&query_terms, &chunk.content, &corpus);
            if score <= 0.0 {
                continue;
            }
            scored.push((score, chunk, metadata));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(top_k.max(1));

        let max_score = scored.first().map_or(1.0, |(s, _, _)| *s).max(f32::EPSILON);
        Ok(scored
            .into_iter()
            .map(|(score, chunk, attributes)| to_search_result(score / max_score, chunk, attributes))
            .collect())
    }

    async fn load_all(&self) -> Result<Vec<Chunk>, OrchestratorError> {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || -> Result<Vec<Chunk>, OrchestratorError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT chunk_id, file_id, vector_store_id, chunk_index, total_chunks, content, attributes FROM chunks",
                )
                .map_err(|e| OrchestratorError::Storage(format!("preparing scan: {e}")))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })
                .map_err(|e| OrchestratorError::Storage(format!("scanning chunks: {e}")))?;

            let mut chunks = Vec::new();
            for row in rows {
                let (chunk_id, file_id, vector_store_id, chunk_index, total_chunks, content, attributes_json) =
                    row.map_err(|e| OrchestratorError::Storage(format!("reading chunk row: {e}")))?;
                let attributes = serde_json::from_str(&attributes_json)?;
                chunks.push(Chunk {
                    chunk_id,
                    file_id,
                    vector_store_id,
                    chunk_index: chunk_index as usize,
                    total_chunks: total_chunks as usize,
                    content,
                    embedding: None,
                    attributes,
                });
            }
            Ok(chunks)
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("scan task panicked: {e}")))?
    }
}

/// Corpus-wide statistics BM25 needs: document frequency per term and average document length.
struct CorpusStats {
    doc_count: usize,
    avg_doc_len: f32,
    doc_freq: HashMap<String, usize>,
}

fn build_corpus(chunks: &[Chunk]) -> CorpusStats {
    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    let mut total_len = 0usize;
    for chunk in chunks {
        let terms = tokenize(&chunk.content);
        total_len += terms.len();
        let unique: std::collections::HashSet<_> = terms.into_iter().collect();
        for term in unique {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }
    let doc_count = chunks.len().max(1);
    CorpusStats {
        doc_count,
        avg_doc_len: total_len as f32 / doc_count as f32,
        doc_freq,
    }
}

fn bm25_score(query_terms: &[String], document: &str, corpus: &CorpusStats) -> f32 {
    let doc_terms = tokenize(document);
    if doc_terms.is_empty() {
        return 0.0;
    }
    let doc_len = doc_terms.len() as f32;
    let mut term_freq: HashMap<&str, usize> = HashMap::new();
    for term in &doc_terms {
        *term_freq.entry(term.as_str()).or_insert(0) += 1;
    }

    let mut score = 0.0f32;
    for term in query_terms {
        let Some(&tf) = term_freq.get(term.as_str()) else {
            continue;
        };
        let df = corpus.doc_freq.get(term).copied().unwrap_or(0);
        let idf = (((corpus.doc_count as f32 - df as f32 + 0.5) / (df as f32 + 0.5)) + 1.0).ln();
        let tf = tf as f32;
        let numerator = tf * (BM25_K1 + 1.0);
        let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / corpus.avg_doc_len.max(1.0)));
        score += idf * (numerator / denominator);
    }
    score.max(0.0)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn attributes_with_ids(chunk: &Chunk) -> Value {
    let mut map = chunk.attributes.clone();
    map.insert("chunk_id".to_string(), Value::String(chunk.chunk_id.clone()));
    map.insert("chunk_index".to_string(), Value::from(chunk.chunk_index));
    map.insert(
        "vector_store_id".to_string(),
        Value::String(chunk.vector_store_id.clone()),
    );
    map.insert("file_id".to_string(), Value::String(chunk.file_id.clone()));
    Value::Object(map.into_iter().collect())
}

fn to_search_result(score: f32, chunk: Chunk, attributes: Value) -> SearchResult {
    let filename = attributes
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let attributes = attributes.as_object().cloned().unwrap_or_default().into_iter().collect();
    SearchResult {
        file_id: chunk.file_id,
        filename,
        score,
        content: vec![ContentPart::InputText { text: chunk.content }],
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use super::*;
    use crate::chunk::TextChunk;
    use crate::vector_store::{IndexRequest, VectorStore};
    use crate::embedding::HashEmbedder;

    async fn seeded_store() -> (VectorStore, Arc<AsyncMutex<rusqlite::Connection>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let path = dir.path().join("lexical.db");
        let store = VectorStore::open(path.to_str().unwrap_or_default(), Arc::new(HashEmbedder))
            .unwrap_or_else(|e| unreachable!("open: {e}"));
        store
            .index(IndexRequest {
                file_id: "f1".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "rust.txt".to_string(),
                chunks: vec![TextChunk {
                    text: "the rust programming language favors ownership and borrowing".to_string(),
                    index: 0,
                }],
                attributes: StdHashMap::new(),
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        store
            .index(IndexRequest {
                file_id: "f2".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "bread.txt".to_string(),
                chunks: vec![TextChunk {
                    text: "sourdough bread needs a long fermentation".to_string(),
                    index: 0,
                }],
                attributes: StdHashMap::new(),
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let conn = Arc::new(AsyncMutex::new(
            rusqlite::Connection::open(&path).unwrap_or_else(|e| unreachable!("reopen: {e}")),
        ));
        (store, conn, dir)
    }

    #[tokio::test]
    async fn finds_matching_document() {
        let (_store, conn, _dir) = seeded_store().await;
        let lexical = LexicalSearch::new(conn);
        let results = lexical.search("rust ownership", 5, None).await.unwrap_or_default();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, "f1");
    }

    #[tokio::test]
    async fn empty_query_yields_empty_results() {
        let (_store, conn, _dir) = seeded_store().await;
        let lexical = LexicalSearch::new(conn);
        let results = lexical.search("", 5, None).await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(results.is_empty());
        let results = lexical.search("   ", 5, None).await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn no_match_yields_empty_results() {
        let (_store, conn, _dir) = seeded_store().await;
        let lexical = LexicalSearch::new(conn);
        let results = lexical
            .search("quantum entanglement", 5, None)
            .await
            .unwrap_or_default();
        assert!(results.is_empty());
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
    }

    #[test]
    fn bm25_score_is_zero_for_nonmatching_document() {
        let corpus = CorpusStats {
            doc_count: 2,
            avg_doc_len: 5.0,
            doc_freq: HashMap::new(),
        };
        let score = bm25_score(&["missing".to_string()], "some unrelated text here", &corpus);
        assert_eq!(score, 0.0);
    }
}
