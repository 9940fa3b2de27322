//! Pluggable embedding generation (§1 "the embedder" is an external collaborator;
//! this module is the pluggable seam this crate exposes for it).
//!
//! Ships a deterministic hash-based fallback that needs no model weights or
//! network access (useful for tests and for deployments that don't want a
//! local ONNX runtime), plus an optional `fastembed`-backed implementation
//! behind the `fastembed-embeddings` feature, mirroring the teacher's
//! "FastEmbed for semantic embeddings (optional - fallback to hash-based if
//! not available)" convention.

use crate::error::OrchestratorError;

/// Dimension of the deterministic hash-based fallback embedder.
pub const HASH_EMBEDDING_DIM: usize = 256;

/// Generates dense embeddings for text.
pub trait Embedder: Send + Sync {
    /// The dimensionality of vectors this embedder produces.
    fn dimension(&self) -> usize;

    /// Embeds a batch of documents.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Upstream`] if the underlying model/API call fails.
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, OrchestratorError>;

    /// Embeds a single query string.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Upstream`] if the underlying model/API call fails.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, OrchestratorError> {
        let mut batch = self.embed_documents(&[text])?;
        Ok(batch.pop().unwrap_or_default())
    }
}

/// Deterministic, dependency-free embedder using feature hashing.
///
/// Maps each lowercased word to a bucket via a simple multiplicative hash,
/// accumulates term frequency into that bucket, then L2-normalizes. This is
/// not semantically meaningful in the way a trained model's embedding is —
/// it exists so hybrid search and the agentic loop have a working vector
/// channel with zero external dependencies, and so tests are fast and
/// hermetic. Production deployments should enable `fastembed-embeddings` or
/// point at a hosted embeddings API.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        HASH_EMBEDDING_DIM
    }

    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, OrchestratorError> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; HASH_EMBEDDING_DIM];
    for word in text.to_lowercase().split_whitespace() {
        let bucket = fnv1a(word) as usize % HASH_EMBEDDING_DIM;
        vector[bucket] += 1.0;
    }
    l2_normalize(&mut vector);
    vector
}

fn fnv1a(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors, in `[-1, 1]`.
///
/// Returns `0.0` for a zero vector or length mismatch rather than erroring,
/// since callers treat it purely as a ranking signal.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(feature = "fastembed-embeddings")]
mod fastembed_impl {
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{Embedder, OrchestratorError};

    /// `fastembed`-backed embedder (ONNX runtime, BGE-small-en-v1.5, 384 dims).
    ///
    /// Wrapped in a `Mutex` because `TextEmbedding::embed` takes `&mut self`
    /// upstream; callers only ever go through the `Embedder` trait's shared
    /// reference, so this is the minimal seam, not a design commitment to
    /// lock-per-call elsewhere in the crate.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
        dimension: usize,
    }

    impl FastEmbedEmbedder {
        /// Initializes the local ONNX model, downloading weights on first use.
        ///
        /// # Errors
        ///
        /// Returns [`OrchestratorError::Upstream`] if model initialization fails
        /// (e.g. no network access on first run, or a corrupt cache).
        pub fn new() -> Result<Self, OrchestratorError> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::BGESmallENV15).with_show_download_progress(false),
            )
            .map_err(|e| OrchestratorError::Upstream(format!("fastembed init failed: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
                dimension: 384,
            })
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, OrchestratorError> {
            let documents: Vec<String> = texts.iter().map(|t| (*t).to_string()).collect();
            let mut model = self
                .model
                .lock()
                .map_err(|_| OrchestratorError::Upstream("embedder lock poisoned".to_string()))?;
            model
                .embed(documents, None)
                .map_err(|e| OrchestratorError::Upstream(format!("embedding failed: {e}")))
        }
    }
}

#[cfg(feature = "fastembed-embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

/// Creates the best available embedder: `fastembed` if the feature is
/// compiled in and initializes successfully, the hash-based fallback
/// otherwise.
#[must_use]
pub fn create_embedder() -> Box<dyn Embedder> {
    #[cfg(feature = "fastembed-embeddings")]
    {
        if let Ok(embedder) = FastEmbedEmbedder::new() {
            return Box::new(embedder);
        }
        tracing::warn!("fastembed initialization failed, falling back to hash-based embedder");
    }
    Box::new(HashEmbedder)
}
