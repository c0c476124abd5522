//! Local knowledge-base search engine for the Meeseeks CLI.
//!
//! Ingests crawled page records, splits them into overlapping chunks,
//! embeds them (TF-IDF or an optional local transformer), persists a
//! compact on-disk index, and answers top-K semantic queries by cosine
//! similarity. Indexes are replaced atomically at the directory level;
//! queries observe either the previous generation or the new one, never
//! a mix.

/// Page chunking with paragraph / sentence / window fallback tiers.
pub mod chunker;
/// Embedding backends and the process-wide transformer coordinator.
pub mod embedder;
/// Error taxonomy for the knowledge subsystem.
pub mod error;
/// Cosine scoring, top-K selection, and context formatting.
pub mod query;
/// The public facade: index, search, stats, clear.
pub mod service;
/// On-disk layout: pages, chunk index, embeddings, manifest.
pub mod store;
/// Data model: page records, chunks, manifest.
pub mod types;
/// TF-IDF vocabulary construction.
pub mod vocabulary;

pub use chunker::{chunk_text, locate_chunks, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use embedder::{
    shared_runtime, Embedder, EmbedderRuntime, TfIdfEmbedder, TransformerEmbedder,
    TFIDF_MODEL_TAG, TRANSFORMER_DIMENSIONS, TRANSFORMER_MODEL_TAG,
};
pub use error::KnowledgeError;
pub use query::{cosine_similarity, format_context, DEFAULT_TOP_K};
pub use service::{CancelToken, IndexOutcome, IndexPhase, KnowledgeService};
pub use store::{IndexStore, LoadedIndex};
pub use types::{Chunk, ChunkIndex, IndexMode, KbStats, Manifest, PageRecord, SearchResult};
pub use vocabulary::{Vocabulary, MAX_VOCAB, MIN_DOC_FREQUENCY};

// Token budgeting lives in meeseeks_core; re-exported here so callers that
// feed search results into prompts get the full surface from one crate.
pub use meeseeks_core::context::{
    analyze_context, condense_context, count_chat_tokens, count_tokens, get_available_tokens,
    get_model_limits, truncate_diff, truncate_to_token_limit, CondenseRequest, CondenseResult,
    CondenseStrategy, ContextAnalysis, ModelLimits,
};
