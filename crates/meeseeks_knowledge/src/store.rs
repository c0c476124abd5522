//! On-disk index store: page record loading, persisted chunk index,
//! packed embeddings, vocabulary, and the per-KB manifest.
//!
//! Layout under the KB root:
//!
//! ```text
//! <root>/<kb-id>/
//!   manifest.json
//!   pages/<hash>.json        crawler-owned input, never written here
//!   index/
//!     chunks.json            pretty-printed ChunkIndex
//!     embeddings.bin         packed little-endian f32, row-major
//!     vocabulary.json        tf-idf mode only
//! ```
//!
//! A new index is staged into `index.new/`, synced, renamed over `index/`,
//! and only then recorded in the manifest, so readers observe either the
//! previous generation or the new one, never a partial write.

use chrono::Utc;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{KnowledgeError, Result};
use crate::types::{Chunk, ChunkIndex, IndexMode, Manifest, PageRecord};
use crate::vocabulary::Vocabulary;

const CHUNKS_FILE: &str = "chunks.json";
const EMBEDDINGS_FILE: &str = "embeddings.bin";
const VOCABULARY_FILE: &str = "vocabulary.json";
const MANIFEST_FILE: &str = "manifest.json";
const INDEX_DIR: &str = "index";
const STAGING_DIR: &str = "index.new";
const PAGES_DIR: &str = "pages";

/// A fully loaded index: chunk metadata plus the embedding matrix
/// (logically `[chunk_count, dimensions]`).
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub model: String,
    pub dimensions: usize,
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Owner of everything under `<root>/<kb-id>/index/` and the manifest.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kb_dir(&self, kb_id: &str) -> PathBuf {
        self.root.join(kb_id)
    }

    pub fn pages_dir(&self, kb_id: &str) -> PathBuf {
        self.kb_dir(kb_id).join(PAGES_DIR)
    }

    pub fn index_dir(&self, kb_id: &str) -> PathBuf {
        self.kb_dir(kb_id).join(INDEX_DIR)
    }

    fn staging_dir(&self, kb_id: &str) -> PathBuf {
        self.kb_dir(kb_id).join(STAGING_DIR)
    }

    pub fn manifest_path(&self, kb_id: &str) -> PathBuf {
        self.kb_dir(kb_id).join(MANIFEST_FILE)
    }

    // ── Pages ──────────────────────────────────────────────────────────

    /// Load all page records from the KB's `pages/` directory.
    ///
    /// Files without a `.json` extension are ignored; files that fail to
    /// parse are skipped with a warning. A missing directory yields an
    /// empty list.
    pub fn load_pages(&self, kb_id: &str) -> Result<Vec<PageRecord>> {
        let dir = self.pages_dir(kb_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut pages = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(hash) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable page file, skipping");
                    continue;
                }
            };
            match serde_json::from_str::<PageRecord>(&content) {
                Ok(mut page) => {
                    page.hash = hash.to_string();
                    pages.push(page);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed page record, skipping");
                }
            }
        }

        // Directory iteration order is platform-dependent; sort for
        // deterministic chunk ids across re-indexes.
        pages.sort_by(|a, b| a.hash.cmp(&b.hash));
        debug!(kb = kb_id, pages = pages.len(), "pages loaded");
        Ok(pages)
    }

    // ── Index write path ───────────────────────────────────────────────

    /// Stage and atomically publish a new index generation.
    ///
    /// The manifest is untouched; call [`IndexStore::mark_indexed`] after
    /// this returns. On error the previous `index/` directory is left
    /// intact.
    pub fn save_index(
        &self,
        kb_id: &str,
        index: &ChunkIndex,
        embeddings: &[Vec<f32>],
        vocabulary: Option<&Vocabulary>,
    ) -> Result<()> {
        if embeddings.len() != index.chunks.len() {
            return Err(KnowledgeError::CorruptIndex(format!(
                "{} chunks but {} embedding rows",
                index.chunks.len(),
                embeddings.len()
            )));
        }
        for row in embeddings {
            if row.len() != index.dimensions {
                return Err(KnowledgeError::CorruptIndex(format!(
                    "embedding row of width {} in a {}-dimension index",
                    row.len(),
                    index.dimensions
                )));
            }
        }

        let staging = self.staging_dir(kb_id);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        write_file_synced(
            &staging.join(CHUNKS_FILE),
            serde_json::to_string_pretty(index)?.as_bytes(),
        )?;
        write_file_synced(&staging.join(EMBEDDINGS_FILE), &pack_embeddings(embeddings))?;
        if let Some(vocabulary) = vocabulary {
            write_file_synced(
                &staging.join(VOCABULARY_FILE),
                serde_json::to_string_pretty(vocabulary)?.as_bytes(),
            )?;
        }
        sync_dir(&staging);

        let index_dir = self.index_dir(kb_id);
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        fs::rename(&staging, &index_dir)?;
        sync_dir(&self.kb_dir(kb_id));

        info!(
            kb = kb_id,
            chunks = index.chunks.len(),
            dimensions = index.dimensions,
            model = %index.model,
            "index written"
        );
        Ok(())
    }

    /// Flip the manifest to `indexed: true` with fresh metadata,
    /// preserving any crawler-owned fields.
    pub fn mark_indexed(&self, kb_id: &str, chunk_count: usize, mode: IndexMode) -> Result<()> {
        let mut manifest = self.read_manifest(kb_id).unwrap_or_default();
        manifest.indexed = true;
        manifest.indexed_at = Some(Utc::now());
        manifest.chunk_count = Some(chunk_count);
        manifest.index_mode = Some(mode);
        self.write_manifest(kb_id, &manifest)
    }

    /// Remove a stale `index.new/` left behind by a crashed or cancelled
    /// indexing run.
    pub fn remove_stale_staging(&self, kb_id: &str) {
        let staging = self.staging_dir(kb_id);
        if staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!(kb = kb_id, error = %e, "could not remove stale staging directory");
            } else {
                debug!(kb = kb_id, "removed stale staging directory");
            }
        }
    }

    /// Remove the index and strip the manifest's indexing fields.
    /// Idempotent; `pages/` is never touched.
    pub fn clear_index(&self, kb_id: &str) -> Result<()> {
        let index_dir = self.index_dir(kb_id);
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        self.remove_stale_staging(kb_id);

        if self.manifest_path(kb_id).exists() {
            let mut manifest = self.read_manifest(kb_id).unwrap_or_default();
            manifest.clear_index_fields();
            self.write_manifest(kb_id, &manifest)?;
        }
        info!(kb = kb_id, "index cleared");
        Ok(())
    }

    // ── Index read path ────────────────────────────────────────────────

    /// Whether both index files are physically present.
    pub fn is_indexed(&self, kb_id: &str) -> bool {
        let dir = self.index_dir(kb_id);
        dir.join(CHUNKS_FILE).is_file() && dir.join(EMBEDDINGS_FILE).is_file()
    }

    /// Load the chunk index and embedding matrix.
    ///
    /// Any missing, malformed, or size-inconsistent file demotes the KB to
    /// "no index": `None` is returned and a warning logged.
    pub fn load_index(&self, kb_id: &str) -> Option<LoadedIndex> {
        let dir = self.index_dir(kb_id);

        let chunks_raw = fs::read_to_string(dir.join(CHUNKS_FILE)).ok()?;
        let index: ChunkIndex = match serde_json::from_str(&chunks_raw) {
            Ok(index) => index,
            Err(e) => {
                warn!(kb = kb_id, error = %e, "malformed chunks.json, treating as no index");
                return None;
            }
        };

        let bytes = fs::read(dir.join(EMBEDDINGS_FILE)).ok()?;
        let expected = index.chunks.len() * index.dimensions * 4;
        if bytes.len() != expected {
            warn!(
                kb = kb_id,
                expected,
                actual = bytes.len(),
                "embeddings.bin size mismatch, treating as no index"
            );
            return None;
        }
        let embeddings = unpack_embeddings(&bytes, index.chunks.len(), index.dimensions);

        Some(LoadedIndex {
            model: index.model,
            dimensions: index.dimensions,
            chunks: index.chunks,
            embeddings,
        })
    }

    /// Load the TF-IDF vocabulary, if this index has one.
    pub fn load_vocabulary(&self, kb_id: &str) -> Option<Vocabulary> {
        let raw = fs::read_to_string(self.index_dir(kb_id).join(VOCABULARY_FILE)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(vocabulary) => Some(vocabulary),
            Err(e) => {
                warn!(kb = kb_id, error = %e, "malformed vocabulary.json, treating as no index");
                None
            }
        }
    }

    // ── Manifest ───────────────────────────────────────────────────────

    /// Read the manifest; `None` when missing or unparseable.
    pub fn read_manifest(&self, kb_id: &str) -> Option<Manifest> {
        let raw = fs::read_to_string(self.manifest_path(kb_id)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(kb = kb_id, error = %e, "malformed manifest.json");
                None
            }
        }
    }

    fn write_manifest(&self, kb_id: &str, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(kb_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a half-written manifest.
        let tmp = path.with_extension("json.tmp");
        write_file_synced(&tmp, serde_json::to_string_pretty(manifest)?.as_bytes())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Embedding (de)serialization
// ---------------------------------------------------------------------------

/// Pack the embedding matrix row-major as little-endian f32, no header:
/// `chunks.json` carries both the row count and the width.
fn pack_embeddings(embeddings: &[Vec<f32>]) -> Vec<u8> {
    let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
    let mut buf = Vec::with_capacity(embeddings.len() * dimensions * 4);
    for row in embeddings {
        for value in row {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    buf
}

/// Inverse of [`pack_embeddings`]. The caller has already validated the
/// byte length.
fn unpack_embeddings(bytes: &[u8], count: usize, dimensions: usize) -> Vec<Vec<f32>> {
    if dimensions == 0 {
        return vec![Vec::new(); count];
    }
    bytes
        .chunks_exact(dimensions * 4)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
        .collect()
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Best-effort directory fsync; not all platforms support opening a
/// directory for sync.
fn sync_dir(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> (ChunkIndex, Vec<Vec<f32>>, Vocabulary) {
        let chunks = vec![
            Chunk {
                id: 0,
                page_hash: "h1".into(),
                page_url: "https://a.example/".into(),
                page_title: "A".into(),
                text: "alpha beta".into(),
                start_idx: 0,
                end_idx: 10,
            },
            Chunk {
                id: 1,
                page_hash: "h2".into(),
                page_url: "https://b.example/".into(),
                page_title: "B".into(),
                text: "beta gamma".into(),
                start_idx: 0,
                end_idx: 10,
            },
        ];
        let index = ChunkIndex {
            model: "tfidf-simple".into(),
            dimensions: 3,
            chunks,
        };
        let embeddings = vec![vec![1.0, 0.0, 0.25], vec![0.0, -1.0, 0.5]];
        let vocabulary =
            Vocabulary::build(["alpha beta gamma", "beta gamma alpha"].into_iter(), 5000);
        (index, embeddings, vocabulary)
    }

    fn store() -> (tempfile::TempDir, IndexStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::new(tmp.path());
        (tmp, store)
    }

    fn write_page(store: &IndexStore, kb: &str, hash: &str, json: &str) {
        let dir = store.pages_dir(kb);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{hash}.json")), json).unwrap();
    }

    #[test]
    fn load_pages_missing_dir_is_empty() {
        let (_tmp, store) = store();
        assert!(store.load_pages("kb").unwrap().is_empty());
    }

    #[test]
    fn load_pages_skips_non_json_and_malformed() {
        let (_tmp, store) = store();
        write_page(
            &store,
            "kb",
            "h1",
            r#"{"url":"https://a.example/","text":"body","sourceId":"s"}"#,
        );
        write_page(&store, "kb", "h2", "{ definitely not json");
        fs::write(store.pages_dir("kb").join("notes.txt"), "ignore me").unwrap();

        let pages = store.load_pages("kb").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].hash, "h1");
        assert_eq!(pages[0].url, "https://a.example/");
    }

    #[test]
    fn load_pages_sorted_by_hash() {
        let (_tmp, store) = store();
        for hash in ["zz", "aa", "mm"] {
            write_page(
                &store,
                "kb",
                hash,
                r#"{"url":"https://x.example/","text":"t","sourceId":"s"}"#,
            );
        }
        let pages = store.load_pages("kb").unwrap();
        let hashes: Vec<&str> = pages.iter().map(|p| p.hash.as_str()).collect();
        assert_eq!(hashes, vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_tmp, store) = store();
        let (index, embeddings, vocabulary) = sample_index();

        store
            .save_index("kb", &index, &embeddings, Some(&vocabulary))
            .unwrap();

        let loaded = store.load_index("kb").unwrap();
        assert_eq!(loaded.model, index.model);
        assert_eq!(loaded.dimensions, 3);
        assert_eq!(loaded.chunks, index.chunks);
        // Float identity through the packed little-endian round trip.
        assert_eq!(loaded.embeddings, embeddings);

        let vocab_back = store.load_vocabulary("kb").unwrap();
        assert_eq!(vocab_back, vocabulary);
    }

    #[test]
    fn embeddings_bin_has_exact_size() {
        let (_tmp, store) = store();
        let (index, embeddings, _) = sample_index();
        store.save_index("kb", &index, &embeddings, None).unwrap();

        let len = fs::metadata(store.index_dir("kb").join(EMBEDDINGS_FILE))
            .unwrap()
            .len() as usize;
        assert_eq!(len, index.chunks.len() * index.dimensions * 4);
    }

    #[test]
    fn save_rejects_mismatched_rows() {
        let (_tmp, store) = store();
        let (index, mut embeddings, _) = sample_index();
        embeddings.pop();
        let err = store.save_index("kb", &index, &embeddings, None).unwrap_err();
        assert!(matches!(err, KnowledgeError::CorruptIndex(_)));

        let (index, _, _) = sample_index();
        let bad_width = vec![vec![1.0; 2], vec![0.0; 2]];
        let err = store.save_index("kb", &index, &bad_width, None).unwrap_err();
        assert!(matches!(err, KnowledgeError::CorruptIndex(_)));
    }

    #[test]
    fn load_index_rejects_size_mismatch() {
        let (_tmp, store) = store();
        let (index, embeddings, _) = sample_index();
        store.save_index("kb", &index, &embeddings, None).unwrap();

        // Truncate the packed floats behind the store's back.
        let bin = store.index_dir("kb").join(EMBEDDINGS_FILE);
        let mut bytes = fs::read(&bin).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&bin, bytes).unwrap();

        assert!(store.load_index("kb").is_none());
    }

    #[test]
    fn load_index_rejects_malformed_chunks_json() {
        let (_tmp, store) = store();
        let (index, embeddings, _) = sample_index();
        store.save_index("kb", &index, &embeddings, None).unwrap();

        fs::write(store.index_dir("kb").join(CHUNKS_FILE), "{ nope").unwrap();
        assert!(store.load_index("kb").is_none());
    }

    #[test]
    fn load_index_missing_files_is_none() {
        let (_tmp, store) = store();
        assert!(store.load_index("kb").is_none());
        assert!(!store.is_indexed("kb"));
    }

    #[test]
    fn zero_dimension_index_round_trips() {
        let (_tmp, store) = store();
        let chunks = vec![Chunk {
            id: 0,
            page_hash: "h".into(),
            page_url: "u".into(),
            page_title: "t".into(),
            text: "the and for".into(),
            start_idx: 0,
            end_idx: 11,
        }];
        let index = ChunkIndex {
            model: "tfidf-simple".into(),
            dimensions: 0,
            chunks,
        };
        let embeddings = vec![Vec::new()];
        store.save_index("kb", &index, &embeddings, None).unwrap();

        let loaded = store.load_index("kb").unwrap();
        assert_eq!(loaded.dimensions, 0);
        assert_eq!(loaded.embeddings, vec![Vec::<f32>::new()]);
    }

    #[test]
    fn reindex_replaces_previous_generation() {
        let (_tmp, store) = store();
        let (index, embeddings, vocabulary) = sample_index();
        store
            .save_index("kb", &index, &embeddings, Some(&vocabulary))
            .unwrap();

        // Second generation: transformer mode, no vocabulary file.
        let index2 = ChunkIndex {
            model: "Xenova/all-MiniLM-L6-v2".into(),
            dimensions: 2,
            chunks: index.chunks[..1].to_vec(),
        };
        store
            .save_index("kb", &index2, &[vec![0.6, 0.8]], None)
            .unwrap();

        let loaded = store.load_index("kb").unwrap();
        assert_eq!(loaded.model, "Xenova/all-MiniLM-L6-v2");
        assert_eq!(loaded.chunks.len(), 1);
        // The old vocabulary did not leak into the new generation.
        assert!(store.load_vocabulary("kb").is_none());
        assert!(!store.kb_dir("kb").join(STAGING_DIR).exists());
    }

    #[test]
    fn manifest_lifecycle() {
        let (_tmp, store) = store();
        assert!(store.read_manifest("kb").is_none());

        store.mark_indexed("kb", 42, IndexMode::Tfidf).unwrap();
        let manifest = store.read_manifest("kb").unwrap();
        assert!(manifest.indexed);
        assert_eq!(manifest.chunk_count, Some(42));
        assert_eq!(manifest.index_mode, Some(IndexMode::Tfidf));
        assert!(manifest.indexed_at.is_some());
    }

    #[test]
    fn mark_indexed_preserves_crawler_fields() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.kb_dir("kb")).unwrap();
        fs::write(
            store.manifest_path("kb"),
            r#"{"name":"rust-docs","pageCount":7}"#,
        )
        .unwrap();

        store.mark_indexed("kb", 3, IndexMode::Tfidf).unwrap();
        let manifest = store.read_manifest("kb").unwrap();
        assert!(manifest.indexed);
        assert_eq!(manifest.extra.get("name").unwrap(), "rust-docs");
        assert_eq!(manifest.extra.get("pageCount").unwrap(), 7);
    }

    #[test]
    fn clear_index_is_idempotent_and_keeps_pages() {
        let (_tmp, store) = store();
        write_page(
            &store,
            "kb",
            "h1",
            r#"{"url":"https://a.example/","text":"body","sourceId":"s"}"#,
        );
        let (index, embeddings, vocabulary) = sample_index();
        store
            .save_index("kb", &index, &embeddings, Some(&vocabulary))
            .unwrap();
        store.mark_indexed("kb", 2, IndexMode::Tfidf).unwrap();
        assert!(store.is_indexed("kb"));

        store.clear_index("kb").unwrap();
        assert!(!store.is_indexed("kb"));
        assert!(!store.index_dir("kb").exists());
        let manifest = store.read_manifest("kb").unwrap();
        assert!(!manifest.indexed);
        assert!(manifest.chunk_count.is_none());
        // Pages are crawler property.
        assert_eq!(store.load_pages("kb").unwrap().len(), 1);

        // Clearing again is a no-op.
        store.clear_index("kb").unwrap();
        assert!(!store.is_indexed("kb"));
    }

    #[test]
    fn stale_staging_is_removed() {
        let (_tmp, store) = store();
        let staging = store.kb_dir("kb").join(STAGING_DIR);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join(CHUNKS_FILE), "{}").unwrap();

        store.remove_stale_staging("kb");
        assert!(!staging.exists());
        // Safe to call when nothing is there.
        store.remove_stale_staging("kb");
    }

    #[test]
    fn staged_but_unpublished_index_is_invisible() {
        let (_tmp, store) = store();
        // Simulate a crash after staging writes but before the rename.
        let staging = store.kb_dir("kb").join(STAGING_DIR);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join(CHUNKS_FILE), "{}").unwrap();
        fs::write(staging.join(EMBEDDINGS_FILE), [0u8; 8]).unwrap();

        assert!(!store.is_indexed("kb"));
        assert!(store.load_index("kb").is_none());
    }

    #[test]
    fn pack_unpack_round_trip() {
        let rows = vec![vec![0.0f32, 1.5, -2.25], vec![f32::MIN, f32::MAX, 1e-30]];
        let bytes = pack_embeddings(&rows);
        assert_eq!(bytes.len(), 2 * 3 * 4);
        assert_eq!(unpack_embeddings(&bytes, 2, 3), rows);
    }
}
