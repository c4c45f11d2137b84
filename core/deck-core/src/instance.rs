//! Session instance backed by a tmux session.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::config::InstanceConfig;
use crate::error::Result;
use crate::hooks::HookStatus;
use crate::status::SessionStatus;
use crate::storage::{Instance, InstanceRow};
use crate::tmux::{has_busy_indicator, TmuxAdapter};

pub struct TmuxInstance {
    row: InstanceRow,
    status: SessionStatus,
    hook: Option<HookStatus>,
    tmux: Arc<dyn TmuxAdapter>,
    windows: InstanceConfig,
}

impl TmuxInstance {
    pub fn new(row: InstanceRow, tmux: Arc<dyn TmuxAdapter>, windows: InstanceConfig) -> Self {
        let status = row.status;
        Self {
            row,
            status,
            hook: None,
            tmux,
            windows,
        }
    }

    pub fn acknowledged(&self) -> bool {
        self.row.acknowledged
    }

    pub fn update_status_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.row.tmux_session.trim().is_empty()
            || !self.tmux.session_exists(&self.row.tmux_session)
        {
            self.status = SessionStatus::Error;
            return Ok(());
        }

        if let Some(status) = self.hook_fast_path(now) {
            self.status = status;
            return Ok(());
        }

        let pane = match self.tmux.capture_pane(&self.row.tmux_session) {
            Ok(pane) => pane,
            Err(err) => {
                self.status = SessionStatus::Error;
                return Err(err);
            }
        };

        self.status = if has_busy_indicator(&self.row.tool, &pane) {
            SessionStatus::Running
        } else if self.row.tool == "shell" || self.row.acknowledged {
            SessionStatus::Idle
        } else {
            SessionStatus::Waiting
        };
        Ok(())
    }

    /// Trusts a recent hook report over pane scraping. Only tools the hook
    /// rules instrument ever receive a report.
    fn hook_fast_path(&mut self, now: DateTime<Utc>) -> Option<SessionStatus> {
        let tool = self.row.tool.as_str();
        let hook = self.hook.as_ref()?;
        let window = self.fast_path_window(hook.status);
        if hook.age_secs(now) >= window {
            return None;
        }

        let status = match hook.status {
            SessionStatus::Running => {
                self.row.acknowledged = false;
                SessionStatus::Running
            }
            SessionStatus::Waiting if tool == "codex" => {
                self.row.acknowledged = false;
                SessionStatus::Waiting
            }
            SessionStatus::Waiting if self.row.acknowledged => SessionStatus::Idle,
            SessionStatus::Waiting => SessionStatus::Waiting,
            SessionStatus::Error => SessionStatus::Error,
            SessionStatus::Idle | SessionStatus::Unknown => return None,
        };
        debug!(
            instance_id = %self.row.id,
            hook_status = %hook.status,
            status = %status,
            "Hook fast path"
        );
        Some(status)
    }

    fn fast_path_window(&self, hook_status: SessionStatus) -> i64 {
        if self.row.tool != "codex" {
            return self.windows.hook_window_secs;
        }
        match hook_status {
            SessionStatus::Running => self.windows.codex_running_window_secs,
            SessionStatus::Waiting => self.windows.codex_waiting_window_secs,
            _ => self.windows.hook_window_secs,
        }
    }
}

impl Instance for TmuxInstance {
    fn id(&self) -> &str {
        &self.row.id
    }

    fn title(&self) -> &str {
        &self.row.title
    }

    fn tool(&self) -> &str {
        &self.row.tool
    }

    fn parent_session_id(&self) -> Option<&str> {
        let parent = self.row.parent_session_id.trim();
        if parent.is_empty() {
            None
        } else {
            Some(parent)
        }
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    fn update_hook_status(&mut self, hook: &HookStatus) {
        self.hook = Some(hook.clone());
    }

    fn update_status(&mut self) -> Result<()> {
        self.update_status_at(Utc::now())
    }
}
