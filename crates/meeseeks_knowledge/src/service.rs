//! Knowledge service: the public entry point for indexing and searching
//! knowledge bases.
//!
//! Every operation reports a structured result; nothing panics or
//! propagates an error across this boundary. Indexing runs as a single
//! logical task per KB, yields between embedding batches so progress
//! callbacks stay live, and honors cancellation at batch boundaries
//! without disturbing the previously published index.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use meeseeks_core::config::MeeseeksConfig;

use crate::chunker::{chunk_text, locate_chunks};
use crate::embedder::{shared_runtime, Embedder, EmbedderRuntime, TfIdfEmbedder, TransformerEmbedder};
use crate::error::KnowledgeError;
use crate::query;
use crate::store::IndexStore;
use crate::types::{Chunk, ChunkIndex, IndexMode, KbStats, SearchResult};
use crate::vocabulary::Vocabulary;

/// Embedding batch size in transformer mode (model inference dominates).
const TRANSFORMER_BATCH_SIZE: usize = 10;

/// Embedding batch size in TF-IDF mode (pure CPU, cheap per item).
const TFIDF_BATCH_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Progress & cancellation
// ---------------------------------------------------------------------------

/// The three phases reported while indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Chunking,
    Embedding,
    Saving,
}

/// Cooperative cancellation flag checked at batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Structured result of an indexing run.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub success: bool,
    pub chunk_count: usize,
    pub mode: Option<IndexMode>,
    pub error: Option<String>,
}

impl IndexOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            chunk_count: 0,
            mode: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// KnowledgeService
// ---------------------------------------------------------------------------

/// Facade over the chunker, embedder, store, and query engine.
pub struct KnowledgeService {
    store: IndexStore,
    runtime: Arc<EmbedderRuntime>,
    chunk_size: usize,
    chunk_overlap: usize,
    max_vocab: usize,
}

impl KnowledgeService {
    /// Create a service rooted at an explicit KB directory with default
    /// parameters and the process-wide embedder runtime.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, &MeeseeksConfig::default())
    }

    /// Create a service with tunables taken from the application config.
    pub fn with_config(root: impl Into<PathBuf>, config: &MeeseeksConfig) -> Self {
        Self {
            store: IndexStore::new(root),
            runtime: shared_runtime(),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            max_vocab: config.max_vocab,
        }
    }

    /// Create a service rooted at `~/.meeseeks/knowledge`.
    pub fn with_default_root() -> Result<Self, KnowledgeError> {
        let root = MeeseeksConfig::knowledge_dir()
            .map_err(|e| KnowledgeError::Config(e.to_string()))?;
        Ok(Self::new(root))
    }

    /// Replace the embedder runtime (tests, embedded scenarios).
    pub fn with_runtime(mut self, runtime: Arc<EmbedderRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    // ── Indexing ───────────────────────────────────────────────────────

    /// Build (or fully rebuild) the index for a KB.
    ///
    /// `progress` is invoked synchronously with `(phase, current, total)`
    /// as the run advances through chunking, embedding, and saving.
    /// Cancellation is honored at batch boundaries: the on-disk state is
    /// left exactly as it was before the call.
    pub async fn index_kb<F>(
        &self,
        kb_id: &str,
        mut progress: F,
        cancel: &CancelToken,
    ) -> IndexOutcome
    where
        F: FnMut(IndexPhase, usize, usize),
    {
        // A predecessor may have crashed mid-stage.
        self.store.remove_stale_staging(kb_id);

        let pages = match self.store.load_pages(kb_id) {
            Ok(pages) => pages,
            Err(e) => {
                warn!(kb = kb_id, error = %e, "failed to read pages");
                return IndexOutcome::failure(e.to_string());
            }
        };
        if pages.is_empty() {
            return IndexOutcome::failure(KnowledgeError::NoPages.to_string());
        }

        // Phase 1: chunking.
        let mut chunks: Vec<Chunk> = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            let texts = chunk_text(&page.text, self.chunk_size, self.chunk_overlap);
            let offsets = locate_chunks(&page.text, &texts, self.chunk_overlap);
            for (text, (start_idx, end_idx)) in texts.into_iter().zip(offsets) {
                chunks.push(Chunk {
                    id: chunks.len(),
                    page_hash: page.hash.clone(),
                    page_url: page.url.clone(),
                    page_title: page.title.clone().unwrap_or_else(|| page.url.clone()),
                    text,
                    start_idx,
                    end_idx,
                });
            }
            progress(IndexPhase::Chunking, i + 1, pages.len());
        }
        if cancel.is_cancelled() {
            return IndexOutcome::failure(KnowledgeError::Cancelled.to_string());
        }

        // Pick the embedding backend: transformer when loadable, else
        // TF-IDF. The stored model tag pins the choice for queries.
        let mode = if self.runtime.transformer_available() {
            IndexMode::Transformer
        } else {
            IndexMode::Tfidf
        };
        let (embedder, vocabulary): (Box<dyn Embedder + Send + '_>, Option<Vocabulary>) = match mode {
            IndexMode::Transformer => {
                (Box::new(TransformerEmbedder::new(self.runtime.as_ref())), None)
            }
            IndexMode::Tfidf => {
                let vocabulary = Vocabulary::build(
                    chunks.iter().map(|c| c.text.as_str()),
                    self.max_vocab,
                );
                if vocabulary.is_empty() {
                    // Only stop-words (or nothing) in the corpus: embeddings
                    // degenerate to zero vectors and queries match nothing.
                    debug!(kb = kb_id, "empty vocabulary, index will be zero-dimensional");
                }
                (Box::new(TfIdfEmbedder::new(vocabulary.clone())), Some(vocabulary))
            }
        };
        let batch_size = match mode {
            IndexMode::Transformer => TRANSFORMER_BATCH_SIZE,
            IndexMode::Tfidf => TFIDF_BATCH_SIZE,
        };

        // Phase 2: embedding, batched with cooperative yields.
        let total = chunks.len();
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(total);
        progress(IndexPhase::Embedding, 0, total);
        for batch in chunks.chunks(batch_size.max(1)) {
            if cancel.is_cancelled() {
                return IndexOutcome::failure(KnowledgeError::Cancelled.to_string());
            }
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            match embedder.embed_batch(&texts) {
                Ok(vectors) if vectors.len() == texts.len() => embeddings.extend(vectors),
                Ok(vectors) => {
                    warn!(
                        kb = kb_id,
                        expected = texts.len(),
                        got = vectors.len(),
                        "embedder returned a short batch, zero-filling"
                    );
                    embeddings.extend(texts.iter().map(|_| vec![0.0; embedder.dimensions()]));
                }
                Err(e) => {
                    // A failed batch degrades those chunks to zero vectors
                    // rather than aborting the whole run.
                    warn!(kb = kb_id, error = %e, "batch embedding failed, zero-filling");
                    embeddings.extend(texts.iter().map(|_| vec![0.0; embedder.dimensions()]));
                }
            }
            progress(IndexPhase::Embedding, embeddings.len(), total);
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return IndexOutcome::failure(KnowledgeError::Cancelled.to_string());
        }

        // Phase 3: stage, publish, then flip the manifest.
        progress(IndexPhase::Saving, 0, 2);
        let chunk_count = chunks.len();
        let index = ChunkIndex {
            model: embedder.model_tag().to_string(),
            dimensions: embedder.dimensions(),
            chunks,
        };
        if let Err(e) = self
            .store
            .save_index(kb_id, &index, &embeddings, vocabulary.as_ref())
        {
            warn!(kb = kb_id, error = %e, "failed to save index");
            self.store.remove_stale_staging(kb_id);
            return IndexOutcome::failure(format!("failed to save index: {e}"));
        }
        progress(IndexPhase::Saving, 1, 2);
        if let Err(e) = self.store.mark_indexed(kb_id, chunk_count, mode) {
            warn!(kb = kb_id, error = %e, "failed to update manifest");
            return IndexOutcome::failure(format!("failed to update manifest: {e}"));
        }
        progress(IndexPhase::Saving, 2, 2);

        info!(kb = kb_id, chunks = chunk_count, mode = %mode, "kb indexed");
        IndexOutcome {
            success: true,
            chunk_count,
            mode: Some(mode),
            error: None,
        }
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// Search a KB. Never errors; the worst case is an empty list.
    pub fn search_kb(&self, kb_id: &str, query_text: &str, top_k: usize) -> Vec<SearchResult> {
        query::search(&self.store, &self.runtime, kb_id, query_text, top_k)
    }

    /// Render search results as a Markdown context blob.
    pub fn build_context(results: &[SearchResult]) -> String {
        query::format_context(results)
    }

    /// Whether both index files are physically present.
    pub fn is_indexed(&self, kb_id: &str) -> bool {
        self.store.is_indexed(kb_id)
    }

    /// Cheap stats from the manifest alone; `None` when there is no
    /// manifest at all.
    pub fn index_stats(&self, kb_id: &str) -> Option<KbStats> {
        let manifest = self.store.read_manifest(kb_id)?;
        Some(KbStats {
            indexed: manifest.indexed,
            chunk_count: manifest.chunk_count.unwrap_or(0),
            indexed_at: manifest.indexed_at,
            mode: manifest.index_mode,
        })
    }

    /// Delete the index (not the pages). Idempotent; failures are logged
    /// and swallowed.
    pub fn clear_index(&self, kb_id: &str) {
        if let Err(e) = self.store.clear_index(kb_id) {
            warn!(kb = kb_id, error = %e, "failed to clear index");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
