//! Collaborator seams for profile storage and session instances.
//!
//! The notifier only ever talks to these traits; `sqlite` provides the
//! concrete store used by the daemon, and tests substitute in-memory fakes.

mod sqlite;

pub use sqlite::SqliteStorage;

use std::collections::HashMap;

use crate::error::Result;
use crate::hooks::HookStatus;
use crate::status::SessionStatus;

/// A live session as seen by one pass.
pub trait Instance: Send {
    fn id(&self) -> &str;
    fn title(&self) -> &str;
    fn tool(&self) -> &str;
    /// Parent session id, `None` when unset or blank.
    fn parent_session_id(&self) -> Option<&str>;
    fn status(&self) -> SessionStatus;
    /// Latest hook report; only delivered for tools with a hook event rule.
    fn update_hook_status(&mut self, hook: &HookStatus);
    /// Re-derives `status()` from the terminal and the last hook status.
    fn update_status(&mut self) -> Result<()>;
}

pub trait Storage: Send {
    fn load_with_groups(&self) -> Result<(Vec<Box<dyn Instance>>, Vec<GroupRecord>)>;
    /// Number of interactive frontends with a recent heartbeat.
    fn alive_instance_count(&self) -> Result<usize>;
    fn read_all_statuses(&self) -> Result<HashMap<String, StatusRow>>;
    fn write_status(&self, id: &str, status: SessionStatus, tool: &str) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

pub trait ProfileBackend: Send + Sync {
    fn list_profiles(&self) -> Result<Vec<String>>;
    fn open_storage(&self, profile: &str) -> Result<Box<dyn Storage>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceRow {
    pub id: String,
    pub title: String,
    pub project_path: String,
    pub group_path: String,
    pub sort_order: i64,
    pub command: String,
    pub tool: String,
    pub status: SessionStatus,
    pub tmux_session: String,
    pub created_at: i64,
    pub parent_session_id: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub path: String,
    pub name: String,
    pub expanded: bool,
    pub sort_order: i64,
    pub default_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub status: SessionStatus,
    pub tool: String,
    pub acknowledged: bool,
}
