//! Claude hook handler.
//!
//! Reads the hook payload from stdin and records the session's status for the
//! agent-deck instance named by `AGENTDECK_INSTANCE_ID`.
//!
//! ```text
//! SessionStart       → waiting
//! UserPromptSubmit   → running
//! Stop               → waiting
//! PermissionRequest  → waiting
//! Notification       → waiting (permission_prompt / elicitation_dialog only)
//! SessionEnd         → dead
//! ```

use chrono::{DateTime, Utc};
use deck_core::hooks::write_hook_status_file;
use deck_core::HookReport;
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub const INSTANCE_ID_ENV: &str = "AGENTDECK_INSTANCE_ID";

#[derive(Debug, Deserialize, Default)]
pub struct ClaudeHookInput {
    #[serde(default)]
    pub hook_event_name: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub matcher: Option<Value>,
}

pub fn run(hooks_dir: &Path, instance_id: &str) -> Result<(), String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;

    if let Some(path) = handle_input(&input, instance_id, hooks_dir, Utc::now())? {
        tracing::debug!(path = %path.display(), "Claude hook status written");
    }
    Ok(())
}

/// Returns the written report path, or `None` when there was nothing to record.
pub fn handle_input(
    input: &str,
    instance_id: &str,
    hooks_dir: &Path,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>, String> {
    if instance_id.trim().is_empty() || input.trim().is_empty() {
        return Ok(None);
    }

    let hook_input: ClaudeHookInput = match serde_json::from_str(input) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed Claude hook payload");
            return Ok(None);
        }
    };

    let matcher = hook_input.matcher.as_ref().and_then(Value::as_str);
    let Some(status) = map_event_to_status(&hook_input.hook_event_name, matcher) else {
        tracing::debug!(event = %hook_input.hook_event_name, "Unmapped Claude hook event");
        return Ok(None);
    };

    let report = HookReport {
        status: status.to_string(),
        session_id: hook_input.session_id,
        event: hook_input.hook_event_name,
        ts: now.timestamp(),
    };
    write_hook_status_file(hooks_dir, instance_id.trim(), &report)
        .map(Some)
        .map_err(String::from)
}

pub fn map_event_to_status(event: &str, matcher: Option<&str>) -> Option<&'static str> {
    match event {
        "SessionStart" | "Stop" | "PermissionRequest" => Some("waiting"),
        "UserPromptSubmit" => Some("running"),
        "Notification" => match matcher {
            Some("permission_prompt") | Some("elicitation_dialog") => Some("waiting"),
            _ => None,
        },
        "SessionEnd" => Some("dead"),
        _ => None,
    }
}
