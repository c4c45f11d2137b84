use std::sync::Arc;
use tracing::debug;

use crate::config::{list_profiles, DeckPaths, InstanceConfig};
use crate::error::Result;
use crate::storage::{ProfileBackend, SqliteStorage, Storage};
use crate::tmux::TmuxAdapter;

/// Profiles on the local filesystem, each backed by its own SQLite file.
pub struct LocalBackend {
    paths: DeckPaths,
    tmux: Arc<dyn TmuxAdapter>,
    windows: InstanceConfig,
}

impl LocalBackend {
    pub fn new(paths: DeckPaths, tmux: Arc<dyn TmuxAdapter>, windows: InstanceConfig) -> Self {
        Self {
            paths,
            tmux,
            windows,
        }
    }

    pub fn paths(&self) -> &DeckPaths {
        &self.paths
    }
}

impl ProfileBackend for LocalBackend {
    fn list_profiles(&self) -> Result<Vec<String>> {
        list_profiles(&self.paths)
    }

    fn open_storage(&self, profile: &str) -> Result<Box<dyn Storage>> {
        let path = self.paths.profile_db(profile)?;
        debug!(profile = %profile, path = %path.display(), "Opening profile storage");
        let storage = SqliteStorage::open(&path, Arc::clone(&self.tmux), self.windows.clone())?;
        Ok(Box::new(storage))
    }
}
