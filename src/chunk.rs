//! Token-aware text chunker with overlap (C3, §4.2).
//!
//! "Token" here approximates true subword tokenization with Unicode word
//! segmentation: a fast, dependency-light stand-in documented as such rather
//! than silently pretending to match a specific tokenizer (SPEC_FULL §4.2).

use unicode_segmentation::UnicodeSegmentation;

/// Default maximum chunk size in (approximate) tokens.
pub const DEFAULT_MAX_CHUNK_SIZE_TOKENS: usize = 1000;
/// Default overlap between consecutive chunks, in (approximate) tokens.
pub const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 200;

/// Chunking strategy (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct ChunkStrategy {
    /// Maximum tokens per chunk.
    pub max_chunk_size_tokens: usize,
    /// Tokens of overlap between consecutive chunks.
    pub chunk_overlap_tokens: usize,
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        Self {
            max_chunk_size_tokens: DEFAULT_MAX_CHUNK_SIZE_TOKENS,
            chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
        }
    }
}

impl ChunkStrategy {
    /// Validates `chunkOverlap < maxChunkSize` (§4.2 constraint).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.chunk_overlap_tokens < self.max_chunk_size_tokens
    }
}

/// One chunk produced by [`chunk_text`] (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Chunk content.
    pub text: String,
    /// 0-based position within the produced sequence.
    pub index: usize,
}

/// Splits `text` into overlapping, token-bounded chunks (§4.2).
///
/// Empty input yields an empty sequence. The last chunk may be shorter than
/// `strategy.max_chunk_size_tokens`. Each returned [`TextChunk`] carries its
/// 0-based index; callers needing the total count (to stamp `total_chunks`,
/// §3) should use `.len()` on the returned `Vec`.
///
/// # Errors
///
/// Returns an error string if `strategy` violates `chunkOverlap < maxChunkSize`.
pub fn chunk_text(text: &str, strategy: ChunkStrategy) -> Result<Vec<TextChunk>, String> {
    if !strategy.is_valid() {
        return Err(format!(
            "chunk_overlap_tokens ({}) must be less than max_chunk_size_tokens ({})",
            strategy.chunk_overlap_tokens, strategy.max_chunk_size_tokens
        ));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Word-boundary tokens, retaining their byte spans so chunks can be
    // reassembled with the original inter-word whitespace.
    let words: Vec<(usize, &str)> = text.unicode_word_indices().collect();
    if words.is_empty() {
        return Ok(vec![TextChunk {
            text: text.to_string(),
            index: 0,
        }]);
    }

    let stride = strategy.max_chunk_size_tokens - strategy.chunk_overlap_tokens;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < words.len() {
        let end = (start + strategy.max_chunk_size_tokens).min(words.len());
        let byte_start = words[start].0;
        let byte_end = if end < words.len() {
            words[end].0
        } else {
            text.len()
        };
        chunks.push(TextChunk {
            text: text[byte_start..byte_end].trim().to_string(),
            index,
        });
        index += 1;
        if end >= words.len() {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_sequence() {
        let chunks = chunk_text("", ChunkStrategy::default()).unwrap_or_default();
        assert!(chunks.is_empty());
    }

    #[test]
    fn whitespace_only_input_yields_empty_sequence() {
        let chunks = chunk_text("   \n\t  ", ChunkStrategy::default()).unwrap_or_default();
        assert!(chunks.is_empty());
    }

    #[test]
    fn invalid_strategy_errors() {
        let strategy = ChunkStrategy {
            max_chunk_size_tokens: 10,
            chunk_overlap_tokens: 10,
        };
        assert!(chunk_text("hello world", strategy).is_err());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("hello world", ChunkStrategy::default()).unwrap_or_default();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "hello world");
    }

    #[test]
    fn long_text_produces_multiple_overlapping_chunks() {
        let words: Vec<String> = (0..100).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let strategy = ChunkStrategy {
            max_chunk_size_tokens: 20,
            chunk_overlap_tokens: 5,
        };
        let chunks = chunk_text(&text, strategy).unwrap_or_default();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
        // Last chunk may be short.
        let last_word_count = chunks.last().map_or(0, |c| c.text.split_whitespace().count());
        assert!(last_word_count <= 20);
    }

    #[test]
    fn indices_are_sequential_from_zero() {
        let text = "a ".repeat(3000);
        let chunks = chunk_text(&text, ChunkStrategy::default()).unwrap_or_default();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }
}
