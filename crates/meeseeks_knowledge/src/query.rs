//! Query engine: embed the query with the backend the index was built
//! with, score every chunk by cosine similarity, and keep the top K.

use meeseeks_core::context::KB_BLOCK_SEPARATOR;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::{debug, warn};

use crate::embedder::{
    Embedder, EmbedderRuntime, TfIdfEmbedder, TransformerEmbedder, TFIDF_MODEL_TAG,
    TRANSFORMER_MODEL_TAG,
};
use crate::store::IndexStore;
use crate::types::SearchResult;

/// Default number of results returned by a search.
pub const DEFAULT_TOP_K: usize = 5;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Cosine similarity of two vectors. Zero (never NaN) when either vector
/// has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A candidate in the top-K heap. Greater = better: higher score, then
/// lower chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    score: TotalF32,
    id: Reverse<usize>,
}

/// f32 wrapper with a total order (scores are never NaN, but the heap
/// should not be able to panic regardless).
#[derive(Debug, Clone, Copy, PartialEq)]
struct TotalF32(f32);

impl Eq for TotalF32 {}
impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Keep the best `k` of `(id, score)`, ordered by descending score with
/// ascending id on ties. Uses a bounded min-heap rather than sorting the
/// whole score array.
pub fn top_k(scores: impl IntoIterator<Item = (usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
    for (id, score) in scores {
        heap.push(Reverse(Candidate {
            score: TotalF32(score),
            id: Reverse(id),
        }));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut best: Vec<Candidate> = heap.into_iter().map(|r| r.0).collect();
    best.sort_by(|a, b| b.cmp(a));
    best.into_iter()
        .map(|c| (c.id.0, c.score.0))
        .collect()
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Search a KB for the chunks most similar to `query`.
///
/// Returns an empty list when there is no usable index, or when the index
/// was built with a backend that cannot embed the query right now. All
/// other degenerate states (empty vocabulary, zero query vector) still
/// return `min(top_k, chunk_count)` results with zero scores.
pub fn search(
    store: &IndexStore,
    runtime: &EmbedderRuntime,
    kb_id: &str,
    query: &str,
    top_k_count: usize,
) -> Vec<SearchResult> {
    let Some(index) = store.load_index(kb_id) else {
        debug!(kb = kb_id, "search on unindexed kb");
        return Vec::new();
    };

    let query_vec = match index.model.as_str() {
        TFIDF_MODEL_TAG => {
            let Some(vocabulary) = store.load_vocabulary(kb_id) else {
                warn!(kb = kb_id, "tf-idf index without vocabulary, treating as no index");
                return Vec::new();
            };
            if vocabulary.dimensions() != index.dimensions {
                warn!(kb = kb_id, "vocabulary/index dimension mismatch, treating as no index");
                return Vec::new();
            }
            match TfIdfEmbedder::new(vocabulary).embed_batch(&[query]) {
                Ok(mut vectors) => vectors.remove(0),
                Err(e) => {
                    warn!(kb = kb_id, error = %e, "query embedding failed");
                    return Vec::new();
                }
            }
        }
        TRANSFORMER_MODEL_TAG => {
            match TransformerEmbedder::new(runtime).embed_batch(&[query]) {
                Ok(mut vectors) => vectors.remove(0),
                Err(e) => {
                    // A transformer-built index is unusable without the
                    // transformer; never cross-mix with tf-idf vectors.
                    debug!(kb = kb_id, error = %e, "transformer unavailable for query");
                    return Vec::new();
                }
            }
        }
        other => {
            warn!(kb = kb_id, model = other, "unknown index model");
            return Vec::new();
        }
    };

    if query_vec.len() != index.dimensions {
        warn!(
            kb = kb_id,
            query_dims = query_vec.len(),
            index_dims = index.dimensions,
            "query/index dimension mismatch"
        );
        return Vec::new();
    }

    let scores = index
        .embeddings
        .iter()
        .enumerate()
        .map(|(id, row)| (id, cosine_similarity(&query_vec, row)));
    let best = top_k(scores, top_k_count.min(index.chunks.len()));

    debug!(kb = kb_id, results = best.len(), "search complete");
    best.into_iter()
        .map(|(id, score)| SearchResult {
            chunk: index.chunks[id].clone(),
            score,
        })
        .collect()
}

/// Render search results as a Markdown context blob for prompt assembly.
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "## {}\n\nSource: {}\n\n{}",
                r.chunk.page_title, r.chunk.page_url, r.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(KB_BLOCK_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
