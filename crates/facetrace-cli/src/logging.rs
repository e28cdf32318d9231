//! Tracing setup: human-readable stderr output plus a log file in the run
//! workspace.
//!
//! Level is read from `FACETRACE_LOG`, then `RUST_LOG`, defaulting to `info`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "facetrace.log";

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init(workspace: &Path) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_env("FACETRACE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    std::fs::create_dir_all(workspace)
        .with_context(|| format!("creating workspace {}", workspace.display()))?;

    let file_appender = tracing_appender::rolling::never(workspace, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::info!(log = %workspace.join(LOG_FILE).display(), "logging initialized");
    Ok(guard)
}
