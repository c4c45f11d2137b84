//! Turns consecutive snapshots and hook candidates into transition events.
//!
//! Two paths feed the notifier. The diff path compares this pass with the
//! previous one. The backfill path replays fresh terminal hook reports, which
//! catches turns that ended and resumed between two polls.

use chrono::{DateTime, Utc};
use deck_core::SessionStatus;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::event::TransitionNotificationEvent;
use crate::reconcile::{HookTransitionCandidate, ProfileObservation, Snapshot};

/// Only a running session settling into an attention state is notifiable.
pub fn should_notify(from: SessionStatus, to: SessionStatus) -> bool {
    from == SessionStatus::Running && to.is_attention() && from != to
}

pub fn should_notify_transition(from: &str, to: &str) -> bool {
    should_notify(SessionStatus::parse(from), SessionStatus::parse(to))
}

pub fn diff_transitions(
    profile: &str,
    previous: &Snapshot,
    current: &Snapshot,
    titles: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Vec<TransitionNotificationEvent> {
    current
        .iter()
        .filter_map(|(id, &to)| {
            let title = titles.get(id)?;
            let from = previous.get(id).copied().unwrap_or_default();
            should_notify(from, to)
                .then(|| TransitionNotificationEvent::new(id, title, profile, from, to, now))
        })
        .collect()
}

pub fn backfill_transitions(
    profile: &str,
    current: &Snapshot,
    titles: &HashMap<String, String>,
    candidates: &BTreeMap<String, HookTransitionCandidate>,
    already_emitted: &[TransitionNotificationEvent],
) -> Vec<TransitionNotificationEvent> {
    let emitted: HashSet<(&str, SessionStatus)> = already_emitted
        .iter()
        .map(|event| (event.child_session_id.as_str(), event.to_status))
        .collect();

    candidates
        .iter()
        .filter_map(|(id, candidate)| {
            let title = titles.get(id)?;
            let to = match current.get(id) {
                Some(status) if status.is_attention() => *status,
                _ => candidate.to_status,
            };
            if !to.is_attention() || emitted.contains(&(id.as_str(), to)) {
                return None;
            }
            Some(TransitionNotificationEvent::new(
                id,
                title,
                profile,
                SessionStatus::Running,
                to,
                candidate.timestamp,
            ))
        })
        .collect()
}

/// Diff path runs only when a baseline exists; backfill always runs.
pub fn detect_transitions(
    profile: &str,
    previous: Option<&Snapshot>,
    observation: &ProfileObservation,
    now: DateTime<Utc>,
) -> Vec<TransitionNotificationEvent> {
    let mut events = match previous {
        Some(previous) => diff_transitions(
            profile,
            previous,
            &observation.statuses,
            &observation.titles,
            now,
        ),
        None => Vec::new(),
    };
    let backfill = backfill_transitions(
        profile,
        &observation.statuses,
        &observation.titles,
        &observation.hook_candidates,
        &events,
    );
    events.extend(backfill);
    events
}
