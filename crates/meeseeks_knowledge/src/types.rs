//! Data model for knowledge bases: crawled page records, derived chunks,
//! the persisted index, and the per-KB manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Page records (input, owned by the crawler)
// ---------------------------------------------------------------------------

/// A crawled page as written by the crawler into `pages/<hash>.json`.
///
/// The content hash is the filename, not part of the JSON payload; it is
/// filled in when the record is loaded. Records with a missing `url`,
/// `text` or `sourceId` are considered malformed and skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    pub source_id: String,
    /// Content hash, taken from the filename on load.
    #[serde(skip)]
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Chunks and the persisted index
// ---------------------------------------------------------------------------

/// A bounded span of a page's text; the unit of retrieval.
///
/// `start_idx..end_idx` are byte offsets into the page body located on a
/// best-effort basis: when whitespace normalization makes a chunk
/// unfindable, the offsets fall back to a running cursor and are only
/// suitable for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: usize,
    pub page_hash: String,
    pub page_url: String,
    pub page_title: String,
    pub text: String,
    pub start_idx: usize,
    pub end_idx: usize,
}

/// The persisted chunk index (`index/chunks.json`).
///
/// `model` pins the embedding backend the index was built with;
/// `dimensions` is the row width of `embeddings.bin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkIndex {
    pub model: String,
    pub dimensions: usize,
    pub chunks: Vec<Chunk>,
}

/// Which embedding backend an index was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Tfidf,
    Transformer,
}

impl std::fmt::Display for IndexMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tfidf => f.write_str("tfidf"),
            Self::Transformer => f.write_str("transformer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Per-KB status file (`manifest.json`); the single source of truth for
/// "is this KB indexed".
///
/// The crawler writes its own metadata (page counts, names, timestamps)
/// into the same file, so unknown fields are preserved across updates via
/// the flattened `extra` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_mode: Option<IndexMode>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    /// Strip the indexing fields, keeping crawler-owned metadata.
    pub fn clear_index_fields(&mut self) {
        self.indexed = false;
        self.indexed_at = None;
        self.chunk_count = None;
        self.index_mode = None;
    }
}

// ---------------------------------------------------------------------------
// Query results and stats
// ---------------------------------------------------------------------------

/// A scored chunk returned by a knowledge search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// Cheap per-KB statistics derived from the manifest alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbStats {
    pub indexed: bool,
    pub chunk_count: usize,
    pub indexed_at: Option<DateTime<Utc>>,
    pub mode: Option<IndexMode>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
