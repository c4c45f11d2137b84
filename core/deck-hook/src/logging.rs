//! File logging for the hook binary.
//!
//! Hooks run inside the calling tool's process tree, so nothing goes to
//! stdout or stderr. Output lands in `~/.agent-deck/logs/deck-hook.log.<date>`.

use deck_core::DeckPaths;
use fs_err as fs;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "deck-hook.log";

/// Installs the global subscriber. The guard must live until exit so buffered
/// lines are flushed.
pub fn init(paths: &DeckPaths) -> Option<WorkerGuard> {
    let log_dir = paths.logs_dir();
    if fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    if result.is_err() {
        return None;
    }
    Some(guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("AGENTDECK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
