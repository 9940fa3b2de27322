//! Vector search provider: index, search, and delete chunks with metadata
//! and filters (C4, §4.3).
//!
//! Persists chunks (with their dense embeddings) in sqlite so a process
//! restart doesn't lose an index, and serves `search` by scanning the
//! in-memory candidate set with [`crate::embedding::cosine_similarity`].
//! Writes to a given `file_id` are serialized with a per-key
//! `tokio::sync::Mutex` behind a [`dashmap::DashMap`], so concurrent
//! re-ingests of the same file can't interleave.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::OrchestratorError;
use crate::filter::Filter;
use crate::ids;
use crate::model::{Chunk, ContentPart, SearchResult};

/// Default number of results returned by an unscoped vector search.
pub const DEFAULT_TOP_K: usize = 10;
/// Default minimum similarity score a result must clear (§4.3).
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.07;

/// One document queued for indexing (§4.3 `index`).
pub struct IndexRequest {
    /// Owning file id.
    pub file_id: String,
    /// Owning vector store id.
    pub vector_store_id: String,
    /// Source filename, carried into every chunk's attributes.
    pub filename: String,
    /// Already-chunked text (see [`crate::chunk::chunk_text`]).
    pub chunks: Vec<crate::chunk::TextChunk>,
    /// Attributes merged onto every chunk (§3 `VectorStoreFile::attributes`).
    pub attributes: HashMap<String, Value>,
}

/// sqlite-backed vector search provider (C4).
pub struct VectorStore {
    conn: Arc<AsyncMutex<Connection>>,
    embedder: Arc<dyn Embedder>,
    file_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl VectorStore {
    /// Opens (creating if absent) the chunk table at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] if the sqlite connection or
    /// schema migration fails.
    pub fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self, OrchestratorError> {
        let conn = Connection::open(path)
            .map_err(|e| OrchestratorError::Storage(format!("opening vector store: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT NOT NULL,
                file_id TEXT NOT NULL,
                vector_store_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                attributes TEXT NOT NULL,
                PRIMARY KEY (file_id, chunk_index)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_vector_store ON chunks(vector_store_id);",
        )
        .map_err(|e| OrchestratorError::Storage(format!("migrating vector store schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(AsyncMutex::new(conn)),
            embedder,
            file_locks: DashMap::new(),
        })
    }

    /// Shares this store's sqlite connection, so [`crate::lexical_search::LexicalSearch`]
    /// can read the same `chunks` table without opening a second handle.
    #[must_use]
    pub fn connection(&self) -> Arc<AsyncMutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock_for(&self, file_id: &str) -> Arc<AsyncMutex<()>> {
        self.file_locks
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Indexes a file's chunks, replacing any prior chunks for the same `file_id`
    /// (re-ingest semantics, §4.3 edge case: "re-indexing a file deletes its
    /// previous chunks first").
    ///
    /// Embedding is computed up front; if it fails, nothing is written — a
    /// partially-indexed file is worse than an absent one because it would
    /// rank as "completed" while silently missing chunks.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Upstream`] if embedding fails, or
    /// [`OrchestratorError::Storage`] if the write transaction fails.
    pub async fn index(&self, request: IndexRequest) -> Result<usize, OrchestratorError> {
        let file_lock = self.lock_for(&request.file_id);
        let _guard = file_lock.lock().await;

        let texts: Vec<&str> = request.chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedder.embed_documents(&texts)?;
        let total_chunks = request.chunks.len();

        let mut rows = Vec::with_capacity(total_chunks);
        for (chunk, embedding) in request.chunks.iter().zip(embeddings.into_iter()) {
            let chunk_id = ids::chunk_fingerprint(&request.file_id, chunk.index, &chunk.text);
            let mut attributes = request.attributes.clone();
            attributes.insert("filename".to_string(), Value::String(request.filename.clone()));
            rows.push(Chunk {
                chunk_id,
                file_id: request.file_id.clone(),
                vector_store_id: request.vector_store_id.clone(),
                chunk_index: chunk.index,
                total_chunks,
                content: chunk.text.clone(),
                embedding: Some(embedding),
                attributes,
            });
        }

        let conn = Arc::clone(&self.conn);
        let file_id = request.file_id.clone();
        let inserted = task::spawn_blocking(move || -> Result<usize, OrchestratorError> {
            let mut conn = conn.blocking_lock();
            let tx = conn
                .transaction()
                .map_err(|e| OrchestratorError::Storage(format!("begin transaction: {e}")))?;
            tx.execute("DELETE FROM chunks WHERE file_id = ?1", [&file_id])
                .map_err(|e| OrchestratorError::Storage(format!("clearing prior chunks: {e}")))?;
            for row in &rows {
                let embedding_blob = embedding_to_blob(row.embedding.as_deref().unwrap_or_default());
                let attributes_json = serde_json::to_string(&row.attributes)?;
                tx.execute(
                    "INSERT INTO chunks (chunk_id, file_id, vector_store_id, chunk_index, total_chunks, content, embedding, attributes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        row.chunk_id,
                        row.file_id,
                        row.vector_store_id,
                        row.chunk_index as i64,
                        row.total_chunks as i64,
                        row.content,
                        embedding_blob,
                        attributes_json,
                    ],
                )
                .map_err(|e| OrchestratorError::Storage(format!("inserting chunk: {e}")))?;
            }
            tx.commit()
                .map_err(|e| OrchestratorError::Storage(format!("committing transaction: {e}")))?;
            Ok(rows.len())
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("index task panicked: {e}")))??;

        Ok(inserted)
    }

    /// Deletes every chunk belonging to `file_id` (§4.3 `deleteFile`).
    ///
    /// Returns `true` if at least one chunk was removed, `false` only when
    /// the implementation can prove nothing was deleted (`file_id` had no
    /// chunks) — the affected-row count from the `DELETE` itself, not a
    /// prior existence check, so the answer is exact under concurrent writes.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] if the delete fails.
    pub async fn delete_file(&self, file_id: &str) -> Result<bool, OrchestratorError> {
        let file_lock = self.lock_for(file_id);
        let _guard = file_lock.lock().await;
        let conn = Arc::clone(&self.conn);
        let file_id = file_id.to_string();
        task::spawn_blocking(move || -> Result<bool, OrchestratorError> {
            let conn = conn.blocking_lock();
            let deleted = conn
                .execute("DELETE FROM chunks WHERE file_id = ?1", [&file_id])
                .map_err(|e| OrchestratorError::Storage(format!("deleting file chunks: {e}")))?;
            Ok(deleted > 0)
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("delete task panicked: {e}")))?
    }

    /// Returns `file_id`'s merged attributes, or `None` if it has no chunks
    /// (§4.3 `getFileMetadata`).
    ///
    /// Every chunk of a file carries the same `attributes` map (set once at
    /// [`Self::index`] time), so the first matching row's attributes — minus
    /// the per-chunk identifiers [`attributes_with_ids`] adds for filtering —
    /// represent the file as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] on a read failure.
    pub async fn get_file_metadata(&self, file_id: &str) -> Result<Option<Value>, OrchestratorError> {
        let conn = Arc::clone(&self.conn);
        let file_id = file_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Value>, OrchestratorError> {
            let conn = conn.blocking_lock();
            let attributes_json: Option<String> = conn
                .query_row(
                    "SELECT attributes FROM chunks WHERE file_id = ?1 LIMIT 1",
                    [&file_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| OrchestratorError::Storage(format!("reading file metadata: {e}")))?;
            let Some(attributes_json) = attributes_json else {
                return Ok(None);
            };
            let attributes: Value = serde_json::from_str(&attributes_json)?;
            Ok(Some(attributes))
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("metadata task panicked: {e}")))?
    }

    /// Dense vector search, ranked by cosine similarity, filtered, thresholded (§4.3).
    ///
    /// An empty (or whitespace-only) query returns an empty list rather than
    /// an error, and a non-positive `top_k` returns an empty list too — §4.3
    /// owns this contract for `searchSimilar` specifically, overriding the
    /// generic "non-positive max is invalid-argument" validator row (§7)
    /// that governs other call sites.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Upstream`] if query embedding fails,
    /// [`OrchestratorError::FilterApplicationFailed`] if `filter` is
    /// structurally invalid, or [`OrchestratorError::Storage`] on a read failure.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>, OrchestratorError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed_query(query)?;
        let candidates = self.load_all().await?;

        let mut scored = Vec::with_capacity(candidates.len());
        for chunk in candidates {
            let metadata = attributes_with_ids(&chunk);
            if let Some(f) = filter {
                if !f.matches(&metadata)? {
                    continue;
                }
            }
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(&query_embedding, embedding);
            if score <= score_threshold {
                continue;
            }
            scored.push((score, chunk, metadata));
        }
        // Score descending, stable on ties by (file_id, chunk_index) ascending
        // (§4.3) — `load_all`'s scan has no `ORDER BY`, so ties would
        // otherwise follow non-deterministic storage order.
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.file_id.cmp(&b.1.file_id))
                .then_with(|| a.1.chunk_index.cmp(&b.1.chunk_index))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, chunk, attributes)| to_search_result(score, chunk, attributes))
            .collect())
    }

    async fn load_all(&self) -> Result<Vec<Chunk>, OrchestratorError> {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || -> Result<Vec<Chunk>, OrchestratorError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT chunk_id, file_id, vector_store_id, chunk_index, total_chunks, content, embedding, attributes FROM chunks",
                )
                .map_err(|e| OrchestratorError::Storage(format!("preparing scan: {e}")))?;
            let rows = stmt
                .query_map([], |row| {
                    let embedding_blob: Vec<u8> = row.get(6)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        embedding_blob,
                        row.get::<_, String>(7)?,
                    ))
                })
                .map_err(|e| OrchestratorError::Storage(format!("scanning chunks: {e}")))?;

            let mut chunks = Vec::new();
            for row in rows {
                let (chunk_id, file_id, vector_store_id, chunk_index, total_chunks, content, embedding_blob, attributes_json) =
                    row.map_err(|e| OrchestratorError::Storage(format!("reading chunk row: {e}")))?;
                let attributes = serde_json::from_str(&attributes_json)?;
                chunks.push(Chunk {
                    chunk_id,
                    file_id,
                    vector_store_id,
                    chunk_index: chunk_index as usize,
                    total_chunks: total_chunks as usize,
                    content,
                    embedding: Some(blob_to_embedding(&embedding_blob)),
                    attributes,
                });
            }
            Ok(chunks)
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("scan task panicked: {e}")))?
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Builds the metadata map a [`Filter`] evaluates against: file attributes
/// plus the `chunk_id`/`chunk_index`/`vector_store_id` identifiers §3 requires
/// every [`SearchResult::attributes`] to carry.
fn attributes_with_ids(chunk: &Chunk) -> Value {
    let mut map = chunk.attributes.clone();
    map.insert("chunk_id".to_string(), Value::String(chunk.chunk_id.clone()));
    map.insert("chunk_index".to_string(), Value::from(chunk.chunk_index));
    map.insert(
        "vector_store_id".to_string(),
        Value::String(chunk.vector_store_id.clone()),
    );
    map.insert("file_id".to_string(), Value::String(chunk.file_id.clone()));
    serde_json::Value::Object(map.into_iter().collect())
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
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::chunk::TextChunk;
    use crate::embedding::HashEmbedder;

    fn temp_store() -> (VectorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let path = dir.path().join("vectors.db");
        let store = VectorStore::open(path.to_str().unwrap_or_default(), Arc::new(HashEmbedder))
            .unwrap_or_else(|e| unreachable!("open: {e}"));
        (store, dir)
    }

    #[tokio::test]
    async fn index_then_search_finds_chunk() {
        let (store, _dir) = temp_store();
        store
            .index(IndexRequest {
                file_id: "f1".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "doc.txt".to_string(),
                chunks: vec![TextChunk {
                    text: "rust async runtime tokio".to_string(),
                    index: 0,
                }],
                attributes: HashMap::new(),
            })
            .await
            .unwrap_or_else(|e| unreachable!("index: {e}"));

        let results = store
            .search("rust async runtime", 5, None, 0.0)
            .await
            .unwrap_or_default();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, "f1");
    }

    #[tokio::test]
    async fn reingest_replaces_prior_chunks() {
        let (store, _dir) = temp_store();
        let make_request = |text: &str| IndexRequest {
            file_id: "f1".to_string(),
            vector_store_id: "vs1".to_string(),
            filename: "doc.txt".to_string(),
            chunks: vec![TextChunk {
                text: text.to_string(),
                index: 0,
            }],
            attributes: HashMap::new(),
        };
        store.index(make_request("first version")).await.unwrap_or_else(|e| unreachable!("{e}"));
        store.index(make_request("second version")).await.unwrap_or_else(|e| unreachable!("{e}"));

        let all = store.load_all().await.unwrap_or_default();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "second version");
    }

    #[tokio::test]
    async fn delete_file_removes_all_its_chunks() {
        let (store, _dir) = temp_store();
        store
            .index(IndexRequest {
                file_id: "f1".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "doc.txt".to_string(),
                chunks: vec![
                    TextChunk { text: "a".to_string(), index: 0 },
                    TextChunk { text: "b".to_string(), index: 1 },
                ],
                attributes: HashMap::new(),
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let deleted = store.delete_file("f1").await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(deleted);
        let all = store.load_all().await.unwrap_or_default();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn delete_file_returns_false_when_nothing_to_delete() {
        let (store, _dir) = temp_store();
        let deleted = store.delete_file("missing").await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(!deleted);
    }

    #[tokio::test]
    async fn get_file_metadata_returns_merged_attributes() {
        let (store, _dir) = temp_store();
        let mut attrs = HashMap::new();
        attrs.insert("category".to_string(), json!("tech"));
        store
            .index(IndexRequest {
                file_id: "f1".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "doc.txt".to_string(),
                chunks: vec![TextChunk { text: "hello".to_string(), index: 0 }],
                attributes: attrs,
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let metadata = store
            .get_file_metadata("f1")
            .await
            .unwrap_or_else(|e| unreachable!("{e}"))
            .unwrap_or_else(|| unreachable!("expected metadata for indexed file"));
        assert_eq!(metadata.get("category"), Some(&json!("tech")));
        assert_eq!(metadata.get("filename"), Some(&json!("doc.txt")));
    }

    #[tokio::test]
    async fn get_file_metadata_returns_none_for_unknown_file() {
        let (store, _dir) = temp_store();
        let metadata = store.get_file_metadata("missing").await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(metadata.is_none());
    }

    #[tokio::test]
    async fn search_empty_query_returns_empty_list_not_error() {
        let (store, _dir) = temp_store();
        let result = store.search("", 5, None, 0.0).await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(result.is_empty());
        let result = store.search("   ", 5, None, 0.0).await.unwrap_or_else(|e| unreachable!("{e}"));
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn search_zero_top_k_returns_empty_list() {
        let (store, _dir) = temp_store();
        store
            .index(IndexRequest {
                file_id: "f1".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "a.txt".to_string(),
                chunks: vec![TextChunk { text: "rust async runtime".to_string(), index: 0 }],
                attributes: HashMap::new(),
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        let result = store
            .search("rust async runtime", 0, None, 0.0)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn search_breaks_score_ties_by_file_id_then_chunk_index() {
        let (store, _dir) = temp_store();
        for (file_id, text) in [("f2", "same text"), ("f1", "same text")] {
            store
                .index(IndexRequest {
                    file_id: file_id.to_string(),
                    vector_store_id: "vs1".to_string(),
                    filename: format!("{file_id}.txt"),
                    chunks: vec![TextChunk { text: text.to_string(), index: 0 }],
                    attributes: HashMap::new(),
                })
                .await
                .unwrap_or_else(|e| unreachable!("{e}"));
        }
        let results = store
            .search("same text", 10, None, -1.0)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_id, "f1");
        assert_eq!(results[1].file_id, "f2");
    }

    #[tokio::test]
    async fn search_respects_filter() {
        let (store, _dir) = temp_store();
        let mut attrs_a = HashMap::new();
        attrs_a.insert("category".to_string(), json!("tech"));
        let mut attrs_b = HashMap::new();
        attrs_b.insert("category".to_string(), json!("food"));

        store
            .index(IndexRequest {
                file_id: "f_tech".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "a.txt".to_string(),
                chunks: vec![TextChunk { text: "rust tokio async".to_string(), index: 0 }],
                attributes: attrs_a,
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        store
            .index(IndexRequest {
                file_id: "f_food".to_string(),
                vector_store_id: "vs1".to_string(),
                filename: "b.txt".to_string(),
                chunks: vec![TextChunk { text: "rust tokio async".to_string(), index: 0 }],
                attributes: attrs_b,
            })
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let filter = Filter::Comparison {
            key: "category".to_string(),
            op: crate::filter::CompareOp::Eq,
            value: json!("tech"),
        };
        let results = store
            .search("rust tokio", 10, Some(&filter), 0.0)
            .await
            .unwrap_or_default();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, "f_tech");
    }
}
