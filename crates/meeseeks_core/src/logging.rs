//! Logging setup for the CLI and its background indexing tasks.
//!
//! Console output stays compact for interactive use; the full stream goes
//! to a daily-rotated file under `~/.meeseeks/logs` so long indexing runs
//! can be inspected after the fact. The configured level applies to the
//! meeseeks crates only, dependencies are capped at `warn`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::MeeseeksConfig;

/// Rotated file names look like `meeseeks.2026-08-01`.
const LOG_FILE_PREFIX: &str = "meeseeks";

/// The filter used when `RUST_LOG` is not set: the configured level is
/// scoped to our own crates with everything else at `warn` so chatty
/// dependencies stay out of the indexing logs.
fn fallback_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "warn,meeseeks_core={level},meeseeks_knowledge={level}"
    ))
}

/// Build the subscriber filter; `RUST_LOG` wins outright.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter(level))
}

/// Install the global subscriber using the application config for the
/// level and the standard log directory. The returned guard must be kept
/// alive; dropping it flushes the file writer.
pub fn init_logging(config: &MeeseeksConfig) -> Result<WorkerGuard> {
    let logs_dir = MeeseeksConfig::logs_dir()?;
    init_logging_to_dir(&logs_dir, &config.log_level)
}

/// Install the global subscriber against an explicit directory and level.
/// Used by tests and embedded scenarios; fails if a subscriber is already
/// installed in this process.
pub fn init_logging_to_dir(logs_dir: &Path, level: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create log directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialized: {e}"))?;

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
