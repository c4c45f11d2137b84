//! The polling loop that ties reconcile, detect and notify together.

use chrono::{DateTime, Utc};
use deck_core::config::PollingConfig;
use deck_core::{
    DeckError, HookEventRules, HookSource, HookStatusWatcher, ProfileBackend, SessionStatus,
    Storage,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::detect::detect_transitions;
use crate::notifier::TransitionNotifier;
use crate::reconcile::{reconcile_profile, Snapshot};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Warming,
    Steady,
    Stopped,
}

/// Profile storages opened on first use and kept until shutdown.
#[derive(Default)]
pub struct StorageCache {
    storages: HashMap<String, Box<dyn Storage>>,
}

impl StorageCache {
    pub fn get_or_open(
        &mut self,
        backend: &dyn ProfileBackend,
        profile: &str,
    ) -> Result<&dyn Storage, DeckError> {
        if !self.storages.contains_key(profile) {
            let storage = backend.open_storage(profile)?;
            self.storages.insert(profile.to_string(), storage);
        }
        self.storages
            .get(profile)
            .map(|storage| storage.as_ref())
            .ok_or_else(|| DeckError::InvalidProfile(profile.to_string()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.storages.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    pub fn close_all(&mut self) {
        for (profile, storage) in self.storages.drain() {
            if let Err(err) = storage.close() {
                warn!(error = %err, profile = %profile, "Failed to close profile storage");
            }
        }
    }
}

pub struct MonitorSettings {
    pub polling: PollingConfig,
    pub rules: HookEventRules,
    pub fresh_window_secs: i64,
}

pub struct TransitionMonitor {
    backend: Arc<dyn ProfileBackend>,
    notifier: TransitionNotifier,
    hooks: Arc<dyn HookSource>,
    watcher: Option<Arc<HookStatusWatcher>>,
    settings: MonitorSettings,
    storages: StorageCache,
    baselines: HashMap<String, Snapshot>,
    lifecycle: Lifecycle,
}

impl TransitionMonitor {
    pub fn new(
        backend: Arc<dyn ProfileBackend>,
        notifier: TransitionNotifier,
        hooks: Arc<dyn HookSource>,
        watcher: Option<Arc<HookStatusWatcher>>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            backend,
            notifier,
            hooks,
            watcher,
            settings,
            storages: StorageCache::default(),
            baselines: HashMap::new(),
            lifecycle: Lifecycle::Starting,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Runs passes until `shutdown` fires, then releases the watcher and storages.
    pub fn run(&mut self, shutdown: &Shutdown) {
        info!("Transition monitor starting");
        if let Some(watcher) = &self.watcher {
            if let Err(err) = watcher.start() {
                warn!(error = %err, "Hook watcher unavailable; using direct hook reads");
            }
        }

        let mut interval = self.sync_once();
        while !shutdown.wait_timeout(interval) {
            interval = self.sync_once();
        }

        self.stop();
    }

    pub fn stop(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop();
        }
        self.storages.close_all();
        self.set_lifecycle(Lifecycle::Stopped);
    }

    pub fn sync_once(&mut self) -> Duration {
        self.sync_once_at(Utc::now())
    }

    /// One pass over every profile; returns the delay before the next pass.
    pub fn sync_once_at(&mut self, now: DateTime<Utc>) -> Duration {
        let slow = self.settings.polling.slow();
        let mut profiles = match self.backend.list_profiles() {
            Ok(profiles) if !profiles.is_empty() => profiles,
            Ok(_) => {
                debug!("No profiles to monitor");
                return slow;
            }
            Err(err) => {
                warn!(error = %err, "Failed to list profiles");
                return slow;
            }
        };
        profiles.sort();

        let mut next = slow;
        for profile in &profiles {
            next = next.min(self.sync_profile(profile, now));
        }

        if profiles
            .iter()
            .all(|profile| self.baselines.contains_key(profile))
        {
            self.set_lifecycle(Lifecycle::Steady);
        }
        next
    }

    fn sync_profile(&mut self, profile: &str, now: DateTime<Utc>) -> Duration {
        let slow = self.settings.polling.slow();
        let storage = match self.storages.get_or_open(self.backend.as_ref(), profile) {
            Ok(storage) => storage,
            Err(err) => {
                warn!(error = %err, profile = %profile, "Failed to open profile storage");
                return slow;
            }
        };

        let observation = match reconcile_profile(
            storage,
            self.hooks.as_ref(),
            &self.settings.rules,
            self.settings.fresh_window_secs,
            now,
        ) {
            Ok(observation) => observation,
            Err(err) => {
                warn!(error = %err, profile = %profile, "Failed to reconcile profile");
                return slow;
            }
        };

        if !self.baselines.contains_key(profile) {
            info!(profile = %profile, "Warming profile baseline");
            if self.lifecycle == Lifecycle::Starting {
                self.set_lifecycle(Lifecycle::Warming);
            }
        }

        let previous = self.baselines.get(profile);
        let events = detect_transitions(profile, previous, &observation, now);
        for event in events {
            let result = self.notifier.notify_transition(event);
            debug!(
                profile = %profile,
                child = %result.child_session_id,
                from_status = %result.from_status,
                to_status = %result.to_status,
                result = ?result.delivery_result,
                "Transition processed"
            );
        }

        let interval = choose_poll_interval(&observation.statuses, &self.settings.polling);
        self.baselines.insert(profile.to_string(), observation.statuses);
        interval
    }

    fn set_lifecycle(&mut self, next: Lifecycle) {
        if self.lifecycle != next {
            info!(from = ?self.lifecycle, to = ?next, "Transition monitor lifecycle");
            self.lifecycle = next;
        }
    }
}

/// Fast while anything runs, medium while something waits, slow otherwise.
pub fn choose_poll_interval(statuses: &Snapshot, polling: &PollingConfig) -> Duration {
    if statuses.values().any(|status| *status == SessionStatus::Running) {
        polling.fast()
    } else if statuses.values().any(|status| *status == SessionStatus::Waiting) {
        polling.medium()
    } else {
        polling.slow()
    }
}
