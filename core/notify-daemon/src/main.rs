//! agent-deck transition notifier.
//!
//! Watches every profile's sessions and tells a parent (or conductor) session
//! when one of its children stops running and needs attention. Runs as a
//! plain thread loop: one hook watcher thread, one monitor loop, and a signal
//! thread that triggers shutdown.

use clap::Parser;
use deck_core::config::load_notify_config;
use deck_core::{
    CliMessageSender, CommandTmuxAdapter, DeckPaths, HookStatusResolver, HookStatusWatcher,
    LocalBackend, NotifyConfig,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod detect;
mod event;
mod monitor;
mod notifier;
mod reconcile;
mod shutdown;
#[cfg(test)]
mod test_support;

use monitor::{MonitorSettings, TransitionMonitor};
use notifier::TransitionNotifier;
use shutdown::Shutdown;

#[derive(Parser, Debug)]
#[command(name = "notify-daemon")]
#[command(about = "Relays child session transitions to their parent sessions")]
struct Cli {
    /// Run a single pass and exit.
    #[arg(long)]
    once: bool,

    /// Config file (defaults to <root>/notify-daemon.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// agent-deck data directory (defaults to ~/.agent-deck).
    #[arg(long)]
    root: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let paths = match &cli.root {
        Some(root) => DeckPaths::new(root),
        None => DeckPaths::from_home(),
    };
    let config = load_config(&cli, &paths);

    // Signals must be blocked before any other thread exists.
    let shutdown = Shutdown::new();
    if !cli.once {
        if let Err(err) = shutdown::install_signal_handler(shutdown.clone()) {
            error!(error = %err, "Failed to install signal handler");
            std::process::exit(1);
        }
    }

    let watcher = match HookStatusWatcher::new(paths.hooks_dir()) {
        Ok(watcher) => Some(Arc::new(watcher)),
        Err(err) => {
            warn!(error = %err, "Hook directory unavailable; hook fast path disabled");
            None
        }
    };
    let hooks = Arc::new(HookStatusResolver::new(paths.hooks_dir(), watcher.clone()));

    let backend = Arc::new(LocalBackend::new(
        paths.clone(),
        Arc::new(CommandTmuxAdapter),
        config.instance.clone(),
    ));
    let sender = Arc::new(CliMessageSender::new(&config.notifier.cli_command));
    info!(binary = %sender.binary().display(), "Resolved agent-deck CLI");

    let notifier = TransitionNotifier::new(
        paths.notify_state_path(),
        paths.notify_log_path(),
        backend.clone(),
        sender,
        config.notifier.clone(),
    );
    let mut monitor = TransitionMonitor::new(
        backend,
        notifier,
        hooks,
        watcher,
        MonitorSettings {
            polling: config.polling.clone(),
            rules: config.hooks.tools.clone(),
            fresh_window_secs: config.hooks.fresh_window_secs,
        },
    );

    if cli.once {
        let next = monitor.sync_once();
        monitor.stop();
        info!(next_interval_ms = next.as_millis() as u64, "Single pass complete");
        return;
    }

    info!(root = %paths.root().display(), "Transition notifier started");
    monitor.run(&shutdown);
    info!("Transition notifier stopped");
}

fn init_logging() {
    let debug_enabled = env::var("AGENTDECK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli, paths: &DeckPaths) -> NotifyConfig {
    let path = cli.config.clone().unwrap_or_else(|| paths.config_path());
    match load_notify_config(&path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Invalid notifier config; using defaults");
            NotifyConfig::default()
        }
    }
}
