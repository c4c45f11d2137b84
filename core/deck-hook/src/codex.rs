//! Codex notify handler.
//!
//! Codex passes its notification either as a JSON argument or on stdin, and
//! the event name has appeared in several shapes (`turn/completed`,
//! `agent-turn-complete`, `turn.failed`, ...). Names are canonicalized to
//! `/`-separated form before matching.

use chrono::{DateTime, Utc};
use deck_core::hooks::write_hook_status_file;
use deck_core::HookReport;
use serde_json::{Map, Value};
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

pub const SESSION_ID_ENV: &str = "CODEX_SESSION_ID";

const EVENT_KEYS: [&str; 3] = ["type", "event", "method"];
const SESSION_KEYS: [&str; 3] = ["session_id", "thread_id", "thread-id"];
const NESTED_SESSION_KEYS: [&str; 4] = ["session_id", "thread_id", "thread-id", "id"];

pub fn run(hooks_dir: &Path, instance_id: &str, args: &[String]) -> Result<(), String> {
    let input = CodexInput::from_args(args);
    let stdin_data = if input.payload.is_none() && !io::stdin().is_terminal() {
        let mut data = String::new();
        io::stdin()
            .read_to_string(&mut data)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        Some(data)
    } else {
        None
    };
    let env_session = std::env::var(SESSION_ID_ENV).unwrap_or_default();

    if let Some(path) = handle(
        input,
        stdin_data.as_deref(),
        instance_id,
        &env_session,
        hooks_dir,
        Utc::now(),
    )? {
        tracing::debug!(path = %path.display(), "Codex hook status written");
    }
    Ok(())
}

/// What the command line carried: a JSON payload, and the first bare word as
/// a fallback event name.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CodexInput {
    pub payload: Option<String>,
    pub event_arg: Option<String>,
}

impl CodexInput {
    pub fn from_args(args: &[String]) -> Self {
        let mut input = Self::default();
        for arg in args.iter().map(|arg| arg.trim()).filter(|arg| !arg.is_empty()) {
            if arg.starts_with('{') && arg.ends_with('}') {
                input.payload = Some(arg.to_string());
                break;
            }
            if input.event_arg.is_none() {
                input.event_arg = Some(arg.to_string());
            }
        }
        input
    }
}

pub fn handle(
    input: CodexInput,
    stdin_data: Option<&str>,
    instance_id: &str,
    env_session_id: &str,
    hooks_dir: &Path,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>, String> {
    if instance_id.trim().is_empty() {
        return Ok(None);
    }

    let data = input
        .payload
        .as_deref()
        .or(stdin_data)
        .map(str::trim)
        .filter(|data| !data.is_empty());

    let (mut event, mut session_id) = data.map(parse_payload).unwrap_or_default();
    if event.is_empty() {
        if let Some(raw) = data.filter(|raw| !raw.starts_with('{')) {
            event = raw.to_string();
        }
    }
    if event.is_empty() {
        event = input.event_arg.unwrap_or_default();
    }

    let Some(status) = map_event_to_status(&event) else {
        tracing::debug!(event = %event, "Unmapped Codex notify event");
        return Ok(None);
    };

    if session_id.is_empty() {
        session_id = env_session_id.trim().to_string();
    }

    let report = HookReport {
        status: status.to_string(),
        session_id,
        event,
        ts: now.timestamp(),
    };
    write_hook_status_file(hooks_dir, instance_id.trim(), &report)
        .map(Some)
        .map_err(String::from)
}

/// Extracts `(event, session_id)` from a notify payload. Both are empty when
/// the data is not a JSON object.
pub fn parse_payload(data: &str) -> (String, String) {
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(data) else {
        return (String::new(), String::new());
    };
    let nested = |key: &str| payload.get(key).and_then(Value::as_object);

    let event = first_string(&payload, &EVENT_KEYS)
        .or_else(|| nested("params").and_then(|map| first_string(map, &EVENT_KEYS)))
        .or_else(|| nested("payload").and_then(|map| first_string(map, &EVENT_KEYS)))
        .unwrap_or_default();

    let session_id = first_string(&payload, &SESSION_KEYS)
        .or_else(|| nested("params").and_then(|map| first_string(map, &NESTED_SESSION_KEYS)))
        .or_else(|| nested("payload").and_then(|map| first_string(map, &NESTED_SESSION_KEYS)))
        .unwrap_or_default();

    (event, session_id)
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn map_event_to_status(event: &str) -> Option<&'static str> {
    let normalized = event.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }
    let canonical: String = normalized
        .chars()
        .map(|c| match c {
            '.' | '-' | '_' => '/',
            other => other,
        })
        .collect();

    if canonical.contains("thread/started") || canonical.contains("session/configured") {
        return Some("waiting");
    }
    if canonical.contains("turn") {
        let ended = ["complete", "fail", "abort", "cancel"]
            .iter()
            .any(|fragment| canonical.contains(fragment));
        if ended {
            return Some("waiting");
        }
        if canonical.contains("start") {
            return Some("running");
        }
    }
    None
}
