//! Embedding backends: TF-IDF (always available) and an optional local
//! transformer, behind one capability trait.
//!
//! The transformer handle is process-wide state: it is loaded at most once,
//! a failed load marks it unavailable for the rest of the process, and the
//! coordinator is passed explicitly to the indexer and query engine rather
//! than reached through a global import.

use meeseeks_core::text::tokenize;
use once_cell::sync::Lazy;
#[cfg(feature = "transformer")]
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{KnowledgeError, Result};
use crate::vocabulary::Vocabulary;

/// Model tag stored in indexes built with the TF-IDF backend.
pub const TFIDF_MODEL_TAG: &str = "tfidf-simple";

/// Model tag stored in indexes built with the transformer backend.
pub const TRANSFORMER_MODEL_TAG: &str = "Xenova/all-MiniLM-L6-v2";

/// Embedding width of the transformer backend.
pub const TRANSFORMER_DIMENSIONS: usize = 384;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// A backend that turns texts into fixed-dimension, L2-normalized vectors.
pub trait Embedder {
    /// Identifier persisted in the index; query embedding must match it.
    fn model_tag(&self) -> &str;

    /// Output vector width.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Scale a vector to unit L2 norm; the zero vector is left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// TF-IDF backend
// ---------------------------------------------------------------------------

/// Sparse bag-of-words embedder over a corpus-built [`Vocabulary`].
pub struct TfIdfEmbedder {
    vocabulary: Vocabulary,
}

impl TfIdfEmbedder {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.vocabulary.dimensions()];
        if v.is_empty() {
            return v;
        }

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return v;
        }
        // The denominator counts every token, including those outside the
        // vocabulary.
        let total = tokens.len() as f32;

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for token in &tokens {
            if let Some(index) = self.vocabulary.index_of(token) {
                *counts.entry(index).or_insert(0) += 1;
            }
        }
        for (index, count) in counts {
            v[index] = (count as f32 / total) * self.vocabulary.idf(index);
        }

        l2_normalize(&mut v);
        v
    }
}

impl Embedder for TfIdfEmbedder {
    fn model_tag(&self) -> &str {
        TFIDF_MODEL_TAG
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.dimensions()
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// Transformer coordinator
// ---------------------------------------------------------------------------

#[cfg(feature = "transformer")]
enum TransformerSlot {
    /// No load attempted yet.
    Untried,
    /// Load failed; stays unavailable for the rest of the process.
    Unavailable,
    Ready(Box<fastembed::TextEmbedding>),
}

/// Process-wide embedding runtime.
///
/// Owns the lazily-initialized transformer handle. Constructed once (or
/// obtained via [`shared_runtime`]) and passed into the service; the
/// TF-IDF vocabulary is deliberately not part of this state, it lives in
/// each KB's index.
pub struct EmbedderRuntime {
    #[cfg(feature = "transformer")]
    transformer: Mutex<TransformerSlot>,
    #[cfg(not(feature = "transformer"))]
    _private: (),
}

impl EmbedderRuntime {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "transformer")]
            transformer: Mutex::new(TransformerSlot::Untried),
            #[cfg(not(feature = "transformer"))]
            _private: (),
        }
    }

    /// Whether transformer embeddings can be produced, attempting the
    /// one-shot model load if it has not happened yet.
    pub fn transformer_available(&self) -> bool {
        #[cfg(feature = "transformer")]
        {
            self.ensure_transformer()
        }
        #[cfg(not(feature = "transformer"))]
        {
            false
        }
    }

    #[cfg(feature = "transformer")]
    fn ensure_transformer(&self) -> bool {
        let mut slot = self.transformer.lock();
        match &*slot {
            TransformerSlot::Ready(_) => true,
            TransformerSlot::Unavailable => false,
            TransformerSlot::Untried => {
                tracing::info!(model = TRANSFORMER_MODEL_TAG, "loading transformer embedding model");
                let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                    .with_show_download_progress(false);
                match fastembed::TextEmbedding::try_new(options) {
                    Ok(model) => {
                        *slot = TransformerSlot::Ready(Box::new(model));
                        true
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transformer load failed, falling back to tf-idf");
                        *slot = TransformerSlot::Unavailable;
                        false
                    }
                }
            }
        }
    }

    /// Embed a batch with the transformer, or fail with
    /// [`KnowledgeError::EmbedderUnavailable`].
    pub fn embed_batch_transformer(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[cfg(feature = "transformer")]
        {
            if !self.ensure_transformer() {
                return Err(KnowledgeError::EmbedderUnavailable(
                    "transformer model failed to load".into(),
                ));
            }
            let mut slot = self.transformer.lock();
            let TransformerSlot::Ready(model) = &mut *slot else {
                return Err(KnowledgeError::EmbedderUnavailable(
                    "transformer torn down".into(),
                ));
            };
            let docs: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
            let embeddings = model
                .embed(docs, None)
                .map_err(|e| KnowledgeError::EmbedderUnavailable(e.to_string()))?;
            tracing::debug!(batch = texts.len(), "transformer batch embedded");
            Ok(embeddings)
        }
        #[cfg(not(feature = "transformer"))]
        {
            let _ = texts;
            Err(KnowledgeError::EmbedderUnavailable(
                "transformer support not compiled in".into(),
            ))
        }
    }

    /// Drop the transformer handle. The next use will load it again.
    pub fn shutdown(&self) {
        #[cfg(feature = "transformer")]
        {
            *self.transformer.lock() = TransformerSlot::Untried;
        }
    }
}

impl Default for EmbedderRuntime {
    fn default() -> Self {
        Self::new()
    }
}

static SHARED_RUNTIME: Lazy<Arc<EmbedderRuntime>> =
    Lazy::new(|| Arc::new(EmbedderRuntime::new()));

/// The process-wide [`EmbedderRuntime`], initialized lazily on first use.
pub fn shared_runtime() -> Arc<EmbedderRuntime> {
    SHARED_RUNTIME.clone()
}

/// [`Embedder`] view over the runtime's transformer backend.
pub struct TransformerEmbedder<'a> {
    runtime: &'a EmbedderRuntime,
}

impl<'a> TransformerEmbedder<'a> {
    pub fn new(runtime: &'a EmbedderRuntime) -> Self {
        Self { runtime }
    }
}

impl Embedder for TransformerEmbedder<'_> {
    fn model_tag(&self) -> &str {
        TRANSFORMER_MODEL_TAG
    }

    fn dimensions(&self) -> usize {
        TRANSFORMER_DIMENSIONS
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.runtime.embed_batch_transformer(texts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
