//! Builds one profile's status snapshot for a pass.
//!
//! Two things can own the status column of a profile: a running dashboard
//! (detected by fresh heartbeats) or this daemon. When a dashboard is alive its
//! statuses are read as-is and no session is refreshed, so the two never race
//! on terminal inspection or status writes.

use chrono::{DateTime, Utc};
use deck_core::{DeckError, HookEventRules, HookSource, HookStatus, SessionStatus, Storage};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub type Snapshot = BTreeMap<String, SessionStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    AuthoritativeExternal,
    SelfPolled,
}

/// A fresh terminal hook report that may describe a transition the poll missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTransitionCandidate {
    pub to_status: SessionStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProfileObservation {
    pub source: StatusSource,
    pub statuses: Snapshot,
    pub titles: HashMap<String, String>,
    pub hook_candidates: BTreeMap<String, HookTransitionCandidate>,
}

pub fn reconcile_profile(
    storage: &dyn Storage,
    hooks: &dyn HookSource,
    rules: &HookEventRules,
    fresh_window_secs: i64,
    now: DateTime<Utc>,
) -> Result<ProfileObservation, DeckError> {
    let (mut instances, _groups) = storage.load_with_groups()?;

    let mut titles = HashMap::with_capacity(instances.len());
    let mut hook_candidates = BTreeMap::new();
    for instance in instances.iter_mut() {
        titles.insert(instance.id().to_string(), instance.title().to_string());
        if !rules.is_instrumented(instance.tool()) {
            continue;
        }
        let Some(hook) = hooks.hook_status(instance.id()) else {
            continue;
        };
        instance.update_hook_status(&hook);
        if let Some(candidate) =
            hook_transition_candidate(rules, instance.tool(), &hook, fresh_window_secs, now)
        {
            hook_candidates.insert(instance.id().to_string(), candidate);
        }
    }

    let source = match storage.alive_instance_count() {
        Ok(count) if count > 0 => StatusSource::AuthoritativeExternal,
        Ok(_) => StatusSource::SelfPolled,
        Err(err) => {
            debug!(error = %err, "Heartbeat count failed; polling sessions directly");
            StatusSource::SelfPolled
        }
    };

    let mut statuses = Snapshot::new();
    match source {
        StatusSource::AuthoritativeExternal => {
            match storage.read_all_statuses() {
                Ok(rows) => {
                    for (id, row) in rows {
                        statuses.insert(id, row.status);
                    }
                }
                Err(err) => debug!(error = %err, "Reading shared statuses failed"),
            }
            for instance in &instances {
                statuses
                    .entry(instance.id().to_string())
                    .or_insert_with(|| instance.status());
            }
        }
        StatusSource::SelfPolled => {
            for instance in instances.iter_mut() {
                let previous = instance.status();
                if let Err(err) = instance.update_status() {
                    debug!(error = %err, instance_id = %instance.id(), "Session refresh failed");
                }
                let current = instance.status();
                if current != previous {
                    if let Err(err) = storage.write_status(instance.id(), current, instance.tool())
                    {
                        debug!(error = %err, instance_id = %instance.id(), "Status write failed");
                    }
                }
                statuses.insert(instance.id().to_string(), current);
            }
        }
    }

    Ok(ProfileObservation {
        source,
        statuses,
        titles,
        hook_candidates,
    })
}

/// A hook report seeds a candidate when it is fresh, attention-class and its
/// event ends a turn for the session's tool.
pub fn hook_transition_candidate(
    rules: &HookEventRules,
    tool: &str,
    hook: &HookStatus,
    fresh_window_secs: i64,
    now: DateTime<Utc>,
) -> Option<HookTransitionCandidate> {
    if hook.age_secs(now) > fresh_window_secs {
        return None;
    }
    if !hook.status.is_attention() {
        return None;
    }
    if !rules.is_terminal_event(tool, &hook.event) {
        return None;
    }
    Some(HookTransitionCandidate {
        to_status: hook.status,
        timestamp: hook.updated_at,
    })
}
