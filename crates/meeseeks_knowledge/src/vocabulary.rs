//! TF-IDF vocabulary: document-frequency driven term selection with
//! smoothed inverse document frequencies.
//!
//! Built in two passes over the chunk texts: collect per-document token
//! sets, then keep the most document-frequent terms. A term must appear
//! in at least two documents; ordering is df descending with
//! lexicographic tie-break so rebuilds are deterministic.

use meeseeks_core::text::tokenize;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Default cap on vocabulary size.
pub const MAX_VOCAB: usize = 5000;

/// Minimum number of documents a term must appear in.
pub const MIN_DOC_FREQUENCY: usize = 2;

/// On-disk shape of `vocabulary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VocabularyFile {
    words: Vec<(String, usize)>,
    idf: Vec<f32>,
    dimensions: usize,
}

/// An ordered word → dense index mapping with parallel IDF weights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "VocabularyFile", into = "VocabularyFile")]
pub struct Vocabulary {
    words: Vec<(String, usize)>,
    idf: Vec<f32>,
    lookup: HashMap<String, usize>,
}

impl From<VocabularyFile> for Vocabulary {
    fn from(file: VocabularyFile) -> Self {
        let lookup = file.words.iter().cloned().collect();
        Self {
            words: file.words,
            idf: file.idf,
            lookup,
        }
    }
}

impl From<Vocabulary> for VocabularyFile {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            dimensions: vocab.words.len(),
            words: vocab.words,
            idf: vocab.idf,
        }
    }
}

impl Vocabulary {
    /// Build a vocabulary from documents, keeping at most `max_vocab`
    /// terms. An empty corpus (or one with only stop-words) produces an
    /// empty, zero-dimension vocabulary.
    pub fn build<'a, I>(documents: I, max_vocab: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut df: HashMap<String, usize> = HashMap::new();
        let mut doc_count = 0usize;

        for doc in documents {
            doc_count += 1;
            // A document contributes at most once per term.
            let unique: HashSet<String> = tokenize(doc).into_iter().collect();
            for token in unique {
                *df.entry(token).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<(String, usize)> = df
            .into_iter()
            .filter(|(_, count)| *count >= MIN_DOC_FREQUENCY)
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(max_vocab);

        let n = doc_count as f32;
        let idf: Vec<f32> = entries
            .iter()
            .map(|(_, df)| ((n + 1.0) / (*df as f32 + 1.0)).ln() + 1.0)
            .collect();
        let words: Vec<(String, usize)> = entries
            .into_iter()
            .enumerate()
            .map(|(i, (word, _))| (word, i))
            .collect();
        let lookup = words.iter().cloned().collect();

        debug!(
            documents = doc_count,
            dimensions = words.len(),
            "vocabulary built"
        );

        Self { words, idf, lookup }
    }

    /// Number of terms; equals the embedding dimension in TF-IDF mode.
    pub fn dimensions(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Dense index of a term, if it is in the vocabulary.
    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.lookup.get(word).copied()
    }

    /// Smoothed IDF weight of the term at `index`.
    pub fn idf(&self, index: usize) -> f32 {
        self.idf[index]
    }

    /// The ordered `(word, index)` pairs.
    pub fn words(&self) -> &[(String, usize)] {
        &self.words
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words && self.idf == other.idf
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
