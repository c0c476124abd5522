//! Token budgeting and context condensation.
//!
//! Counts approximate tokens for a model's limits and shrinks oversized
//! prompts before they are sent upstream: knowledge-base excerpts are
//! reduced block by block, git diffs are truncated file section by file
//! section. Counting uses a deterministic sub-word approximation rather
//! than a real tokenizer, which avoids a heavy dependency and is stable
//! across runs.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Token counting
// ---------------------------------------------------------------------------

/// Approximate characters per sub-word piece for English text.
const CHARS_PER_PIECE: usize = 4;

/// Fixed per-message token overhead for chat-formatted requests.
const MESSAGE_TOKEN_OVERHEAD: usize = 4;

/// Marker appended to truncated content so the model (and the user reading
/// the prompt) can see that something was cut.
pub const TRUNCATION_MARKER: &str = "[... content truncated to fit model context limit ...]";

/// Separator between formatted knowledge search result blocks.
pub const KB_BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Estimate the token count of a string.
///
/// Each whitespace-separated word contributes `ceil(chars / 4)` pieces
/// (minimum one). The estimate is zero for the empty string and
/// non-decreasing as the string is extended.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace()
        .map(|w| w.chars().count().div_ceil(CHARS_PER_PIECE))
        .sum()
}

/// [`count_tokens`] for optional content; `None` counts as zero.
pub fn count_tokens_opt(text: Option<&str>) -> usize {
    text.map(count_tokens).unwrap_or(0)
}

/// A chat message for token accounting purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Estimate tokens for a chat request: content tokens plus a fixed
/// per-message formatting overhead.
pub fn count_chat_tokens(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| count_tokens(&m.content) + MESSAGE_TOKEN_OVERHEAD)
        .sum()
}

// ---------------------------------------------------------------------------
// Model limits
// ---------------------------------------------------------------------------

/// Token limits for a model: total context window, reserved output space,
/// and the soft budget available for the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub context: usize,
    pub max_output: usize,
    pub available: usize,
}

/// Fallback limits for unknown models.
pub const DEFAULT_MODEL_LIMITS: ModelLimits = ModelLimits {
    context: 8192,
    max_output: 4096,
    available: 6000,
};

/// Look up the limits for a model id. Prefix matching, most specific
/// first, so `gpt-4-turbo-preview` resolves to the turbo limits and plain
/// `gpt-4` to the 8k ones.
pub fn get_model_limits(model_id: &str) -> ModelLimits {
    const TABLE: &[(&str, ModelLimits)] = &[
        (
            "gpt-4o",
            ModelLimits { context: 128_000, max_output: 4096, available: 100_000 },
        ),
        (
            "gpt-4-turbo",
            ModelLimits { context: 128_000, max_output: 4096, available: 100_000 },
        ),
        (
            "gpt-4",
            ModelLimits { context: 8192, max_output: 4096, available: 6000 },
        ),
        (
            "gpt-3.5-turbo",
            ModelLimits { context: 16_385, max_output: 4096, available: 12_000 },
        ),
        (
            "claude-3-5-sonnet",
            ModelLimits { context: 200_000, max_output: 8192, available: 150_000 },
        ),
        (
            "claude-sonnet-4",
            ModelLimits { context: 200_000, max_output: 8192, available: 150_000 },
        ),
        (
            "claude-3-haiku",
            ModelLimits { context: 200_000, max_output: 4096, available: 150_000 },
        ),
    ];

    TABLE
        .iter()
        .find(|(prefix, _)| model_id.starts_with(prefix))
        .map(|(_, limits)| *limits)
        .unwrap_or(DEFAULT_MODEL_LIMITS)
}

/// The prompt token budget for a model id.
pub fn get_available_tokens(model_id: &str) -> usize {
    get_model_limits(model_id).available
}

// ---------------------------------------------------------------------------
// Truncation helpers
// ---------------------------------------------------------------------------

/// Truncate `text` so that its estimated token count is at most
/// `max_tokens`, cutting at word boundaries.
pub fn truncate_to_token_limit(text: &str, max_tokens: usize) -> String {
    if count_tokens(text) <= max_tokens {
        return text.to_string();
    }
    if max_tokens == 0 {
        return String::new();
    }

    // Rough character cut, then shed whole words until within budget.
    let rough = text
        .char_indices()
        .map(|(i, _)| i)
        .nth(max_tokens * CHARS_PER_PIECE)
        .unwrap_or(text.len());
    let mut prefix = &text[..rough];
    while !prefix.is_empty() && count_tokens(prefix) > max_tokens {
        let trimmed = prefix.trim_end();
        match trimmed.rfind(char::is_whitespace) {
            Some(idx) => prefix = &trimmed[..idx],
            None => prefix = "",
        }
    }
    prefix.trim_end().to_string()
}

/// Split a unified diff into per-file sections on `diff --git` headers.
/// Content before the first header (if any) becomes its own leading
/// section so nothing is lost.
fn split_diff_sections(diff: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = Vec::new();
    if diff.starts_with("diff --git ") {
        starts.push(0);
    }
    let mut pos = 0;
    while let Some(found) = diff[pos..].find("\ndiff --git ") {
        starts.push(pos + found + 1);
        pos += found + 1;
    }
    if starts.is_empty() {
        return vec![diff];
    }

    let mut sections = Vec::new();
    if starts[0] > 0 {
        sections.push(&diff[..starts[0]]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(diff.len());
        sections.push(&diff[start..end]);
    }
    sections
}

/// Truncate a git diff to roughly `max_tokens` by dropping trailing
/// `diff --git` file sections. At least one section is always kept, and a
/// visible marker is appended whenever anything was dropped.
pub fn truncate_diff(diff: &str, max_tokens: usize) -> String {
    if count_tokens(diff) <= max_tokens {
        return diff.to_string();
    }

    let sections = split_diff_sections(diff);
    let marker_tokens = count_tokens(TRUNCATION_MARKER);
    let budget = max_tokens.saturating_sub(marker_tokens);

    let mut kept = String::new();
    for (i, section) in sections.iter().enumerate() {
        let candidate_tokens = count_tokens(&kept) + count_tokens(section);
        if i > 0 && candidate_tokens > budget {
            break;
        }
        kept.push_str(section);
    }

    debug!(
        total_sections = sections.len(),
        kept_tokens = count_tokens(&kept),
        "diff truncated to fit token budget"
    );

    let mut out = kept.trim_end().to_string();
    out.push_str("\n\n");
    out.push_str(TRUNCATION_MARKER);
    out
}

// ---------------------------------------------------------------------------
// Context analysis & condensation
// ---------------------------------------------------------------------------

/// Inputs to context analysis and condensation.
#[derive(Debug, Clone, Default)]
pub struct CondenseRequest {
    pub model_id: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Git diff embedded in the user prompt, if any.
    pub git_diff: Option<String>,
    /// Formatted knowledge-base excerpt embedded in the system prompt, if
    /// any. Blocks are separated by [`KB_BLOCK_SEPARATOR`].
    pub kb_content: Option<String>,
    /// How many search results `kb_content` was assembled from.
    pub search_result_count: usize,
}

/// Read-only token report for a prompt about to be sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub model_id: String,
    pub available: usize,
    pub system_tokens: usize,
    pub user_tokens: usize,
    pub diff_tokens: usize,
    pub kb_tokens: usize,
    pub total_tokens: usize,
    pub over_budget_by: usize,
    pub fits: bool,
}

/// Which condensation strategies were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondenseStrategy {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "kb")]
    Kb,
    #[serde(rename = "diff")]
    Diff,
    #[serde(rename = "kb+diff")]
    KbDiff,
}

impl std::fmt::Display for CondenseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Kb => "kb",
            Self::Diff => "diff",
            Self::KbDiff => "kb+diff",
        };
        f.write_str(s)
    }
}

/// Outcome of [`condense_context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondenseResult {
    pub system_prompt: String,
    pub user_prompt: String,
    pub condensed: bool,
    pub strategy: CondenseStrategy,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub warnings: Vec<String>,
}

/// Compute per-part token counts against the model's available budget.
pub fn analyze_context(req: &CondenseRequest) -> ContextAnalysis {
    let available = get_available_tokens(&req.model_id);
    let system_tokens = count_tokens(&req.system_prompt);
    let user_tokens = count_tokens(&req.user_prompt);
    let total_tokens = system_tokens + user_tokens;

    ContextAnalysis {
        model_id: req.model_id.clone(),
        available,
        system_tokens,
        user_tokens,
        diff_tokens: count_tokens_opt(req.git_diff.as_deref()),
        kb_tokens: count_tokens_opt(req.kb_content.as_deref()),
        total_tokens,
        over_budget_by: total_tokens.saturating_sub(available),
        fits: total_tokens <= available,
    }
}

/// Shrink the prompts until they fit the model's available token budget.
///
/// Strategies are applied in order, each recomputing the totals:
/// 1. Drop trailing knowledge result blocks from `kb_content` inside the
///    system prompt (down to none if necessary).
/// 2. Truncate `git_diff` inside the user prompt via [`truncate_diff`].
///
/// When everything was applied and the prompt still exceeds the budget,
/// the best-effort result is returned with a warning.
pub fn condense_context(req: &CondenseRequest) -> CondenseResult {
    let available = get_available_tokens(&req.model_id);
    let original_tokens = count_tokens(&req.system_prompt) + count_tokens(&req.user_prompt);

    let mut system = req.system_prompt.clone();
    let mut user = req.user_prompt.clone();
    let mut warnings = Vec::new();
    let mut applied_kb = false;
    let mut applied_diff = false;
    let mut total = original_tokens;

    // Strategy 1: reduce the knowledge excerpt inside the system prompt.
    if total > available {
        if let Some(kb) = req.kb_content.as_deref() {
            if !kb.is_empty() && system.contains(kb) {
                let mut blocks: Vec<&str> = kb.split(KB_BLOCK_SEPARATOR).collect();
                let mut current = kb.to_string();
                while total > available && !blocks.is_empty() {
                    blocks.pop();
                    let reduced = blocks.join(KB_BLOCK_SEPARATOR);
                    system = system.replacen(&current, &reduced, 1);
                    current = reduced;
                    applied_kb = true;
                    total = count_tokens(&system) + count_tokens(&user);
                }
                debug!(
                    dropped = req.search_result_count.saturating_sub(blocks.len()),
                    remaining = blocks.len(),
                    "knowledge excerpt reduced"
                );
            }
        }
    }

    // Strategy 2: truncate the git diff inside the user prompt.
    if total > available {
        if let Some(diff) = req.git_diff.as_deref() {
            if !diff.is_empty() && user.contains(diff) {
                let user_without_diff = user.replacen(diff, "", 1);
                let fixed = count_tokens(&system) + count_tokens(&user_without_diff);
                let diff_budget = available.saturating_sub(fixed);
                let truncated = truncate_diff(diff, diff_budget);
                if truncated != diff {
                    user = user.replacen(diff, &truncated, 1);
                    applied_diff = true;
                    total = count_tokens(&system) + count_tokens(&user);
                }
            }
        }
    }

    if total > available {
        let msg = format!(
            "context still exceeds available budget by {} tokens",
            total - available
        );
        warn!(model = %req.model_id, "{msg}");
        warnings.push(msg);
    }

    let strategy = match (applied_kb, applied_diff) {
        (false, false) => CondenseStrategy::None,
        (true, false) => CondenseStrategy::Kb,
        (false, true) => CondenseStrategy::Diff,
        (true, true) => CondenseStrategy::KbDiff,
    };

    CondenseResult {
        system_prompt: system,
        user_prompt: user,
        condensed: applied_kb || applied_diff,
        strategy,
        original_tokens,
        final_tokens: total,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
