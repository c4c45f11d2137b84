//! Hook report files and the in-memory table built from them.
//!
//! Tool hooks write one small JSON file per instance into `hooks/`:
//!
//! ```json
//! {"status": "waiting", "session_id": "abc", "event": "Stop", "ts": 1718000000}
//! ```
//!
//! The monitor never trusts a single path for these: the watcher table can lag
//! behind a write that landed between filesystem events, so lookups go through
//! [`HookStatusResolver`], which also reads the file directly and keeps the
//! fresher of the two.

pub mod rules;
mod watcher;

pub use watcher::HookStatusWatcher;

use chrono::{DateTime, TimeZone, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{DeckError, Result};
use crate::status::SessionStatus;

/// On-disk shape of a hook report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookStatus {
    pub status: SessionStatus,
    pub session_id: String,
    pub event: String,
    pub updated_at: DateTime<Utc>,
}

impl HookStatus {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.updated_at).num_seconds()
    }
}

/// Anything that can answer "what did the hooks last say about this instance".
pub trait HookSource: Send + Sync {
    fn hook_status(&self, instance_id: &str) -> Option<HookStatus>;
}

/// Parses report bytes. Unreadable JSON or an empty status yields `None`.
///
/// `ts <= 0` means the writer did not stamp the report, so `written_at` is used.
pub fn parse_hook_report(bytes: &[u8], written_at: DateTime<Utc>) -> Option<HookStatus> {
    let report: HookReport = serde_json::from_slice(bytes).ok()?;
    let status = report.status.trim();
    if status.is_empty() {
        return None;
    }

    let updated_at = if report.ts > 0 {
        Utc.timestamp_opt(report.ts, 0).single().unwrap_or(written_at)
    } else {
        written_at
    };

    Some(HookStatus {
        status: SessionStatus::parse(status),
        session_id: report.session_id.trim().to_string(),
        event: report.event.trim().to_string(),
        updated_at,
    })
}

pub fn hook_file_path(hooks_dir: &Path, instance_id: &str) -> Option<PathBuf> {
    let id = instance_id.trim();
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.starts_with('.') {
        return None;
    }
    Some(hooks_dir.join(format!("{}.json", id)))
}

/// One-shot read of `hooks/<instance_id>.json`.
pub fn read_hook_status_file(hooks_dir: &Path, instance_id: &str) -> Option<HookStatus> {
    let path = hook_file_path(hooks_dir, instance_id)?;
    read_hook_report_file(&path)
}

/// Reads one report file. Unstamped reports take the file's mtime, so every
/// read of the same file agrees on when it was written.
pub fn read_hook_report_file(path: &Path) -> Option<HookStatus> {
    let bytes = fs::read(path).ok()?;
    let written_at = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    parse_hook_report(&bytes, written_at)
}

/// Writes a report atomically so readers never see a half-written file.
pub fn write_hook_status_file(
    hooks_dir: &Path,
    instance_id: &str,
    report: &HookReport,
) -> Result<PathBuf> {
    let path = hook_file_path(hooks_dir, instance_id)
        .ok_or_else(|| DeckError::InvalidArgument(format!("instance id {:?}", instance_id)))?;
    fs::create_dir_all(hooks_dir).map_err(|err| DeckError::io("creating hooks dir", err))?;

    let content =
        serde_json::to_vec(report).map_err(|err| DeckError::json("encoding hook report", err))?;
    let mut temp_file = NamedTempFile::new_in(hooks_dir)
        .map_err(|err| DeckError::io("creating temp hook file", err))?;
    temp_file
        .write_all(&content)
        .map_err(|err| DeckError::io("writing temp hook file", err))?;
    temp_file
        .flush()
        .map_err(|err| DeckError::io("flushing temp hook file", err))?;
    temp_file
        .persist(&path)
        .map_err(|err| DeckError::io("persisting hook file", err.error))?;

    Ok(path)
}

/// Removes `*.json` reports whose mtime is older than `max_age`.
pub fn clean_stale_hook_files(hooks_dir: &Path, max_age: Duration) -> Result<usize> {
    let entries = match fs::read_dir(hooks_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(DeckError::io("listing hooks dir", err)),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_report_file(&path) {
            continue;
        }
        let modified = match entry.metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => debug!(error = %err, path = %path.display(), "Failed to remove stale hook file"),
        }
    }
    Ok(removed)
}

fn is_report_file(path: &Path) -> bool {
    path.extension().map(|ext| ext == "json").unwrap_or(false)
}

fn instance_id_from_path(path: &Path) -> Option<String> {
    if !is_report_file(path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

/// Combines the watcher table with direct file reads.
pub struct HookStatusResolver {
    hooks_dir: PathBuf,
    watcher: Option<Arc<HookStatusWatcher>>,
}

impl HookStatusResolver {
    pub fn new(hooks_dir: PathBuf, watcher: Option<Arc<HookStatusWatcher>>) -> Self {
        Self { hooks_dir, watcher }
    }
}

impl HookSource for HookStatusResolver {
    fn hook_status(&self, instance_id: &str) -> Option<HookStatus> {
        let cached = self
            .watcher
            .as_ref()
            .and_then(|watcher| watcher.get_hook_status(instance_id));
        let direct = read_hook_status_file(&self.hooks_dir, instance_id);

        match (cached, direct) {
            (Some(cached), Some(direct)) => {
                if direct.updated_at > cached.updated_at {
                    Some(direct)
                } else {
                    Some(cached)
                }
            }
            (cached, direct) => cached.or(direct),
        }
    }
}
