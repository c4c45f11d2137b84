//! Filesystem layout and notifier configuration.
//!
//! Everything lives under a single root directory (`~/.agent-deck` by
//! default):
//!
//! ```text
//! ~/.agent-deck/
//! ├── hooks/<instance-id>.json
//! ├── profiles/<profile>/state.db
//! ├── runtime/transition-notify-state.json
//! ├── logs/transition-notifier.log
//! └── notify-daemon.toml
//! ```

use fs_err as fs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DeckError, Result};
use crate::hooks::rules::HookEventRules;

const ROOT_DIR_NAME: &str = ".agent-deck";
const CONFIG_FILE_NAME: &str = "notify-daemon.toml";
const PROFILE_DB_NAME: &str = "state.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckPaths {
    root: PathBuf,
}

impl DeckPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.agent-deck`, or the same name under the temp dir when there is no home.
    pub fn from_home() -> Self {
        let base = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join(ROOT_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join("hooks")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn profile_db(&self, profile: &str) -> Result<PathBuf> {
        validate_profile_name(profile)?;
        Ok(self.profiles_dir().join(profile).join(PROFILE_DB_NAME))
    }

    pub fn notify_state_path(&self) -> PathBuf {
        self.root.join("runtime").join("transition-notify-state.json")
    }

    pub fn notify_log_path(&self) -> PathBuf {
        self.root.join("logs").join("transition-notifier.log")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }
}

/// Rejects names that would escape `profiles/`.
pub fn validate_profile_name(profile: &str) -> Result<()> {
    let trimmed = profile.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed != profile
    {
        return Err(DeckError::InvalidProfile(profile.to_string()));
    }
    Ok(())
}

/// Profiles are directories under `profiles/` that contain a `state.db`.
pub fn list_profiles(paths: &DeckPaths) -> Result<Vec<String>> {
    let dir = paths.profiles_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(DeckError::io("listing profiles", err)),
    };

    let mut profiles = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| DeckError::io("reading profile entry", err))?;
        let path = entry.path();
        if !path.is_dir() || !path.join(PROFILE_DB_NAME).is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if validate_profile_name(name).is_ok() {
            profiles.push(name.to_string());
        }
    }
    profiles.sort();
    Ok(profiles)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,
    #[serde(default = "default_medium_ms")]
    pub medium_ms: u64,
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_ms: default_fast_ms(),
            medium_ms: default_medium_ms(),
            slow_ms: default_slow_ms(),
        }
    }
}

const MIN_POLL_MS: u64 = 100;
const MAX_POLL_MS: u64 = 3_600_000;

impl PollingConfig {
    pub fn fast(&self) -> Duration {
        poll_interval(self.fast_ms)
    }

    pub fn medium(&self) -> Duration {
        poll_interval(self.medium_ms)
    }

    pub fn slow(&self) -> Duration {
        poll_interval(self.slow_ms)
    }
}

/// Keeps a configured interval between 100 ms and one hour.
fn poll_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_POLL_MS, MAX_POLL_MS))
}

#[derive(Debug, Clone, Deserialize)]
pub struct HooksConfig {
    #[serde(default = "default_fresh_window_secs")]
    pub fresh_window_secs: i64,
    #[serde(default)]
    pub tools: HookEventRules,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            fresh_window_secs: default_fresh_window_secs(),
            tools: HookEventRules::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,
    #[serde(default = "default_conductor_title_prefix")]
    pub conductor_title_prefix: String,
    #[serde(default = "default_cli_command")]
    pub cli_command: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            conductor_title_prefix: default_conductor_title_prefix(),
            cli_command: default_cli_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_hook_window_secs")]
    pub hook_window_secs: i64,
    #[serde(default = "default_codex_running_window_secs")]
    pub codex_running_window_secs: i64,
    #[serde(default = "default_codex_waiting_window_secs")]
    pub codex_waiting_window_secs: i64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            hook_window_secs: default_hook_window_secs(),
            codex_running_window_secs: default_codex_running_window_secs(),
            codex_waiting_window_secs: default_codex_waiting_window_secs(),
        }
    }
}

fn default_fast_ms() -> u64 {
    1000
}

fn default_medium_ms() -> u64 {
    2000
}

fn default_slow_ms() -> u64 {
    3000
}

fn default_fresh_window_secs() -> i64 {
    45
}

fn default_dedup_window_secs() -> i64 {
    90
}

fn default_conductor_title_prefix() -> String {
    "conductor-".to_string()
}

fn default_cli_command() -> String {
    "agent-deck".to_string()
}

fn default_hook_window_secs() -> i64 {
    120
}

fn default_codex_running_window_secs() -> i64 {
    20
}

fn default_codex_waiting_window_secs() -> i64 {
    120
}

/// Loads the notifier config. A missing file yields defaults.
pub fn load_notify_config(path: &Path) -> Result<NotifyConfig> {
    if !path.exists() {
        return Ok(NotifyConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|err| DeckError::io(format!("reading {}", path.display()), err))?;
    toml::from_str::<NotifyConfig>(&content).map_err(|err| DeckError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
