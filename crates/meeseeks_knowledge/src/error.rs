use thiserror::Error;

/// Errors produced by the knowledge subsystem.
///
/// These never cross the [`crate::service::KnowledgeService`] boundary as
/// panics or raw errors: the facade converts them into structured outcomes
/// (empty results, `success = false`, warnings).
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// The pages directory is missing or holds no parseable page records.
    #[error("No pages to index")]
    NoPages,

    /// Indexing was cancelled at a batch boundary.
    #[error("indexing cancelled")]
    Cancelled,

    /// The embedding backend required by the stored index is not usable.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// Persisted index files disagree with each other or are malformed.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Configuration problem (e.g. no resolvable home directory).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;
