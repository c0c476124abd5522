use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// MeeseeksConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.meeseeks/config.json`.
///
/// Every field has a default so a missing or partial config file never
/// prevents startup; unknown fields written by newer versions are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeeseeksConfig {
    // Knowledge-base indexing
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap in characters between fixed-window chunks.
    pub chunk_overlap: usize,
    /// Maximum TF-IDF vocabulary size.
    pub max_vocab: usize,
    /// Default number of results returned by a knowledge search.
    pub search_top_k: usize,

    // Model selection
    /// Model id used for token budgeting when the caller does not name one.
    pub default_model: String,

    // Logging
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for MeeseeksConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            max_vocab: 5000,
            search_top_k: 5,
            default_model: "gpt-4".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl MeeseeksConfig {
    /// Base data directory: `~/.meeseeks`.
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(".meeseeks"))
    }

    /// Root of all knowledge bases: `~/.meeseeks/knowledge`.
    pub fn knowledge_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("knowledge"))
    }

    /// Log file directory: `~/.meeseeks/logs`.
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Path of the config file: `~/.meeseeks/config.json`.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Load the config from the default location, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn load() -> Self {
        match Self::config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                warn!(error = %e, "no home directory, using default config");
                Self::default()
            }
        }
    }

    /// Load the config from an explicit path, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed config, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Save the config to the default location, creating `~/.meeseeks` if
    /// needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save the config to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = MeeseeksConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.max_vocab, 5000);
        assert_eq!(config.search_top_k, 5);
        assert!(config.chunk_overlap < config.chunk_size);
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut config = MeeseeksConfig::default();
        config.chunk_size = 800;
        config.default_model = "claude-3-5-sonnet".to_string();
        config.save_to(&path).unwrap();

        let loaded = MeeseeksConfig::load_from(&path);
        assert_eq!(loaded.chunk_size, 800);
        assert_eq!(loaded.default_model, "claude-3-5-sonnet");
        // Untouched fields keep their defaults.
        assert_eq!(loaded.max_vocab, 5000);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = MeeseeksConfig::load_from(&tmp.path().join("absent.json"));
        assert_eq!(loaded.chunk_size, 500);
    }

    #[test]
    fn load_malformed_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded = MeeseeksConfig::load_from(&path);
        assert_eq!(loaded.search_top_k, 5);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{ "chunkSize": 123 }"#).unwrap();
        // Field names are snake_case on disk; camelCase key is ignored.
        let loaded = MeeseeksConfig::load_from(&path);
        assert_eq!(loaded.chunk_size, 500);

        std::fs::write(&path, r#"{ "chunk_size": 123 }"#).unwrap();
        let loaded = MeeseeksConfig::load_from(&path);
        assert_eq!(loaded.chunk_size, 123);
        assert_eq!(loaded.max_vocab, 5000);
    }
}
