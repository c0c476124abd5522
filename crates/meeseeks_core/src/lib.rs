//! Core types and services for the Meeseeks CLI.
//!
//! This crate provides configuration management, logging initialization,
//! shared text tokenization, and token budgeting used across the other
//! Meeseeks crates.

/// Application configuration and data-directory resolution.
pub mod config;
/// Token counting, model limits, and context condensation.
pub mod context;
/// Logging initialization with daily file rotation and console output.
pub mod logging;
/// Lightweight word tokenization shared by retrieval and budgeting.
pub mod text;

pub use config::MeeseeksConfig;
pub use context::{
    analyze_context, condense_context, count_chat_tokens, count_tokens, count_tokens_opt,
    get_available_tokens, get_model_limits, truncate_diff, truncate_to_token_limit, ChatMessage,
    CondenseRequest, CondenseResult, CondenseStrategy, ContextAnalysis, ModelLimits,
    DEFAULT_MODEL_LIMITS, KB_BLOCK_SEPARATOR, TRUNCATION_MARKER,
};
pub use logging::{init_logging, init_logging_to_dir};
pub use text::{is_stop_word, tokenize, STOP_WORDS};
