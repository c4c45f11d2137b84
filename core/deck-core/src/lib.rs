//! # deck-core
//!
//! Shared pieces for agent-deck background services: the session status
//! vocabulary, hook report ingest, on-disk layout and config, profile
//! storage, and the tmux and CLI adapters the notifier drives.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The daemon runs a plain thread loop.
//! - **Graceful degradation**: Unreadable hook files and missing profiles
//!   read as "nothing there", not as errors.
//! - **Trait seams**: Storage, instances, tmux and message delivery sit behind
//!   traits so the notification pipeline can be driven with fakes.

pub mod backend;
pub mod config;
pub mod error;
pub mod hooks;
pub mod instance;
pub mod send;
pub mod status;
pub mod storage;
pub mod tmux;

pub use backend::LocalBackend;
pub use config::{DeckPaths, NotifyConfig};
pub use error::{DeckError, Result};
pub use hooks::rules::{HookEventRules, ToolEventRule};
pub use hooks::{HookReport, HookSource, HookStatus, HookStatusResolver, HookStatusWatcher};
pub use instance::TmuxInstance;
pub use send::{CliMessageSender, MessageSender};
pub use status::SessionStatus;
pub use storage::{
    GroupRecord, Instance, InstanceRow, ProfileBackend, SqliteStorage, StatusRow, Storage,
};
pub use tmux::{CommandTmuxAdapter, TmuxAdapter};
