//! deck-hook: records Claude and Codex lifecycle events for agent-deck.
//!
//! Each invocation writes `~/.agent-deck/hooks/<instance-id>.json`, which the
//! notifier daemon watches. Called from tool hook configuration, so it never
//! fails the caller: every path exits 0.
//!
//! ## Subcommands
//!
//! - `claude`: Claude hook handler, reads JSON from stdin
//! - `codex`: Codex notify handler, payload from argv or stdin
//! - `clean`: removes stale hook report files

mod codex;
mod handle;
mod logging;

use clap::{Parser, Subcommand};
use deck_core::hooks::clean_stale_hook_files;
use deck_core::DeckPaths;
use std::env;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "deck-hook")]
#[command(about = "agent-deck hook status recorder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a Claude hook event (reads JSON from stdin)
    Claude,

    /// Handle a Codex notify event
    Codex {
        /// Notify payload or event name, as passed by Codex
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Remove hook report files older than the given age
    Clean {
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },
}

fn main() {
    let paths = DeckPaths::from_home();
    let _logging_guard = logging::init(&paths);
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return;
        }
    };
    let hooks_dir = paths.hooks_dir();
    let instance_id = env::var(handle::INSTANCE_ID_ENV).unwrap_or_default();

    match cli.command {
        Commands::Claude => {
            if instance_id.trim().is_empty() {
                return;
            }
            if let Err(e) = handle::run(&hooks_dir, &instance_id) {
                tracing::warn!(error = %e, "deck-hook claude failed");
            }
        }
        Commands::Codex { args } => {
            if instance_id.trim().is_empty() {
                return;
            }
            if let Err(e) = codex::run(&hooks_dir, &instance_id, &args) {
                tracing::warn!(error = %e, "deck-hook codex failed");
            }
        }
        Commands::Clean { max_age_hours } => {
            let max_age = Duration::from_secs(max_age_hours.saturating_mul(3600));
            match clean_stale_hook_files(&hooks_dir, max_age) {
                Ok(removed) => tracing::info!(removed, "Stale hook files cleaned"),
                Err(e) => tracing::warn!(error = %e, "deck-hook clean failed"),
            }
        }
    }
}
