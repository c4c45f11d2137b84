//! Delivers transition events to the child's parent session.
//!
//! Each event ends in exactly one of `sent`, `failed` or `dropped_no_target`.
//! Sent and failed deliveries are recorded in a small JSON state file used for
//! de-duplication across restarts, and appended to a JSON-lines audit log.
//! Drops are returned to the caller only.

use chrono::Utc;
use deck_core::config::NotifierConfig;
use deck_core::{Instance, MessageSender, ProfileBackend, SessionStatus};
use fs_err as fs;
use fs_err::OpenOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::detect::should_notify;
use crate::event::{DeliveryResult, TargetKind, TransitionNotificationEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NotifyRecord {
    from: SessionStatus,
    to: SessionStatus,
    at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotifyState {
    #[serde(default)]
    records: HashMap<String, NotifyRecord>,
}

pub struct TransitionNotifier {
    state_path: PathBuf,
    log_path: PathBuf,
    backend: Arc<dyn ProfileBackend>,
    sender: Arc<dyn MessageSender>,
    settings: NotifierConfig,
    state: Mutex<NotifyState>,
}

impl TransitionNotifier {
    pub fn new(
        state_path: PathBuf,
        log_path: PathBuf,
        backend: Arc<dyn ProfileBackend>,
        sender: Arc<dyn MessageSender>,
        settings: NotifierConfig,
    ) -> Self {
        let state = load_state(&state_path);
        Self {
            state_path,
            log_path,
            backend,
            sender,
            settings,
            state: Mutex::new(state),
        }
    }

    pub fn notify_transition(
        &self,
        mut event: TransitionNotificationEvent,
    ) -> TransitionNotificationEvent {
        event.child_session_id = event.child_session_id.trim().to_string();
        event.child_title = event.child_title.trim().to_string();
        event.profile = event.profile.trim().to_string();
        let timestamp = *event.timestamp.get_or_insert_with(Utc::now);

        let drop_reason = if !should_notify(event.from_status, event.to_status) {
            Some("not a notifiable transition")
        } else if event.child_session_id.is_empty() || event.profile.is_empty() {
            Some("missing child or profile")
        } else if self.is_conductor_title(&event.child_title) {
            Some("child is a conductor")
        } else if self.is_duplicate(&event, timestamp.timestamp()) {
            Some("duplicate within window")
        } else {
            None
        };
        if let Some(reason) = drop_reason {
            debug!(
                child = %event.child_session_id,
                profile = %event.profile,
                reason,
                "Transition dropped"
            );
            event.delivery_result = Some(DeliveryResult::DroppedNoTarget);
            return event;
        }

        let result = self.dispatch(event);
        if matches!(
            result.delivery_result,
            Some(DeliveryResult::Sent) | Some(DeliveryResult::Failed)
        ) {
            self.mark_notified(&result, timestamp.timestamp());
            self.log_event(&result);
        }
        result
    }

    fn dispatch(&self, mut event: TransitionNotificationEvent) -> TransitionNotificationEvent {
        let storage = match self.backend.open_storage(&event.profile) {
            Ok(storage) => storage,
            Err(err) => {
                warn!(error = %err, profile = %event.profile, "Failed to open profile for delivery");
                event.delivery_result = Some(DeliveryResult::Failed);
                return event;
            }
        };

        let loaded = storage.load_with_groups();
        if let Err(err) = storage.close() {
            debug!(error = %err, profile = %event.profile, "Failed to close delivery storage");
        }
        let mut instances = match loaded {
            Ok((instances, _groups)) => instances,
            Err(err) => {
                warn!(error = %err, profile = %event.profile, "Failed to load sessions for delivery");
                event.delivery_result = Some(DeliveryResult::Failed);
                return event;
            }
        };

        let Some((target_id, target_kind)) = self.resolve_parent_target(&event, &mut instances)
        else {
            debug!(child = %event.child_session_id, "No live parent to notify");
            event.delivery_result = Some(DeliveryResult::DroppedNoTarget);
            return event;
        };

        let message = build_transition_message(&self.settings.cli_command, &event);
        event.target_session_id = target_id;
        event.target_kind = Some(target_kind);
        match self
            .sender
            .send(&event.profile, &event.target_session_id, &message)
        {
            Ok(()) => {
                info!(
                    child = %event.child_session_id,
                    target = %event.target_session_id,
                    to_status = %event.to_status,
                    "Transition delivered"
                );
                event.delivery_result = Some(DeliveryResult::Sent);
            }
            Err(err) => {
                warn!(
                    error = %err,
                    child = %event.child_session_id,
                    target = %event.target_session_id,
                    "Transition delivery failed"
                );
                event.delivery_result = Some(DeliveryResult::Failed);
            }
        }
        event
    }

    /// The parent must exist and differ from the child; a conductor parent must
    /// also be alive right now.
    fn resolve_parent_target(
        &self,
        event: &TransitionNotificationEvent,
        instances: &mut [Box<dyn Instance>],
    ) -> Option<(String, TargetKind)> {
        let child = instances
            .iter()
            .find(|instance| instance.id() == event.child_session_id)?;
        let parent_id = child.parent_session_id()?.trim().to_string();
        if parent_id.is_empty() || parent_id == event.child_session_id {
            return None;
        }

        let parent = instances
            .iter_mut()
            .find(|instance| instance.id() == parent_id)?;
        if !self.is_conductor_title(parent.title()) {
            return Some((parent_id, TargetKind::Parent));
        }

        if let Err(err) = parent.update_status() {
            debug!(error = %err, parent = %parent_id, "Conductor refresh failed");
        }
        if parent.status().is_live() {
            Some((parent_id, TargetKind::Conductor))
        } else {
            None
        }
    }

    fn is_conductor_title(&self, title: &str) -> bool {
        let prefix = self.settings.conductor_title_prefix.trim().to_lowercase();
        !prefix.is_empty() && title.trim().to_lowercase().starts_with(&prefix)
    }

    fn is_duplicate(&self, event: &TransitionNotificationEvent, at: i64) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        match state.records.get(&event.child_session_id) {
            Some(record) => {
                record.from == event.from_status
                    && record.to == event.to_status
                    && at - record.at <= self.settings.dedup_window_secs
            }
            None => false,
        }
    }

    fn mark_notified(&self, event: &TransitionNotificationEvent, at: i64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.records.insert(
            event.child_session_id.clone(),
            NotifyRecord {
                from: event.from_status,
                to: event.to_status,
                at,
            },
        );
        if let Err(err) = save_state(&self.state_path, &state) {
            warn!(error = %err, "Failed to persist transition notify state");
        }
    }

    fn log_event(&self, event: &TransitionNotificationEvent) {
        if let Err(err) = append_json_line(&self.log_path, event) {
            debug!(error = %err, "Failed to append transition audit log");
        }
    }
}

pub fn build_transition_message(cli_command: &str, event: &TransitionNotificationEvent) -> String {
    format!(
        "[EVENT] Child '{}' ({}) is {}.\nCheck: {} -p {} session output {} -q",
        event.child_title,
        event.child_session_id,
        event.to_status,
        cli_command,
        event.profile,
        event.child_session_id,
    )
}

fn load_state(path: &Path) -> NotifyState {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(_) => return NotifyState::default(),
    };
    match serde_json::from_slice(&data) {
        Ok(state) => state,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Ignoring corrupt transition notify state");
            NotifyState::default()
        }
    }
}

fn save_state(path: &Path, state: &NotifyState) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create notify state dir: {}", err))?;
    }

    let payload = serde_json::to_vec_pretty(state)
        .map_err(|err| format!("Failed to serialize notify state: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)
        .map_err(|err| format!("Failed to write notify state: {}", err))?;
    fs::rename(&tmp_path, path).map_err(|err| format!("Failed to commit notify state: {}", err))?;
    Ok(())
}

fn append_json_line(path: &Path, event: &TransitionNotificationEvent) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create notify log dir: {}", err))?;
    }
    let mut line = serde_json::to_vec(event)
        .map_err(|err| format!("Failed to serialize transition event: {}", err))?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| format!("Failed to open notify log: {}", err))?;
    file.write_all(&line)
        .map_err(|err| format!("Failed to write notify log: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, FakeBackend, FakeInstanceSpec, FakeProfile, RecordingSender};
    use chrono::{DateTime, Duration};
    use tempfile::{tempdir, TempDir};

    struct Harness {
        _temp: TempDir,
        state_path: PathBuf,
        log_path: PathBuf,
        sender: Arc<RecordingSender>,
        backend: Arc<FakeBackend>,
    }

    impl Harness {
        fn new(backend: FakeBackend, sender: RecordingSender) -> Self {
            let temp = tempdir().expect("temp dir");
            let state_path = temp.path().join("runtime").join("transition-notify-state.json");
            let log_path = temp.path().join("logs").join("transition-notifier.log");
            Self {
                _temp: temp,
                state_path,
                log_path,
                sender: Arc::new(sender),
                backend: Arc::new(backend),
            }
        }

        fn notifier(&self) -> TransitionNotifier {
            TransitionNotifier::new(
                self.state_path.clone(),
                self.log_path.clone(),
                self.backend.clone(),
                self.sender.clone(),
                NotifierConfig::default(),
            )
        }

        fn log_lines(&self) -> Vec<serde_json::Value> {
            fs::read_to_string(&self.log_path)
                .unwrap_or_default()
                .lines()
                .map(|line| serde_json::from_str(line).expect("json line"))
                .collect()
        }
    }

    fn family() -> FakeProfile {
        FakeProfile::new(vec![
            FakeInstanceSpec::new("p1", "lead", "claude", SessionStatus::Idle),
            FakeInstanceSpec::new("c1", "worker", "claude", SessionStatus::Waiting)
                .with_parent("p1"),
            FakeInstanceSpec::new("c3", "orphan", "claude", SessionStatus::Waiting),
            FakeInstanceSpec::new("self", "loop", "claude", SessionStatus::Waiting)
                .with_parent("self"),
            FakeInstanceSpec::new("c4", "lost", "claude", SessionStatus::Waiting)
                .with_parent("missing"),
        ])
    }

    fn event(child: &str, title: &str, ts: DateTime<Utc>) -> TransitionNotificationEvent {
        TransitionNotificationEvent::new(
            child,
            title,
            "default",
            SessionStatus::Running,
            SessionStatus::Waiting,
            ts,
        )
    }

    #[test]
    fn sends_to_parent_and_records() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        let notifier = harness.notifier();
        let ts = at("2026-01-01T00:00:00Z");

        let result = notifier.notify_transition(event("c1", "worker", ts));

        assert_eq!(result.delivery_result, Some(DeliveryResult::Sent));
        assert_eq!(result.target_session_id, "p1");
        assert_eq!(result.target_kind, Some(TargetKind::Parent));
        assert_eq!(
            harness.sender.sent(),
            vec![(
                "default".to_string(),
                "p1".to_string(),
                "[EVENT] Child 'worker' (c1) is waiting.\nCheck: agent-deck -p default session output c1 -q"
                    .to_string()
            )]
        );

        let state: serde_json::Value =
            serde_json::from_slice(&fs::read(&harness.state_path).expect("state file"))
                .expect("state json");
        assert_eq!(state["records"]["c1"]["from"], "running");
        assert_eq!(state["records"]["c1"]["to"], "waiting");
        assert_eq!(state["records"]["c1"]["at"], ts.timestamp());

        let lines = harness.log_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["delivery_result"], "sent");
        assert_eq!(lines[0]["target_session_id"], "p1");
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        let notifier = harness.notifier();
        let ts = at("2026-01-01T00:00:00Z");

        notifier.notify_transition(event("c1", "worker", ts));
        let second = notifier.notify_transition(event("c1", "worker", ts + Duration::seconds(30)));
        let edge = notifier.notify_transition(event("c1", "worker", ts + Duration::seconds(90)));

        assert_eq!(second.delivery_result, Some(DeliveryResult::DroppedNoTarget));
        assert_eq!(edge.delivery_result, Some(DeliveryResult::DroppedNoTarget));
        assert_eq!(harness.sender.sent().len(), 1);
        assert_eq!(harness.log_lines().len(), 1);

        let later = notifier.notify_transition(event("c1", "worker", ts + Duration::seconds(91)));
        assert_eq!(later.delivery_result, Some(DeliveryResult::Sent));
        assert_eq!(harness.sender.sent().len(), 2);
    }

    #[test]
    fn dedup_survives_restart() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        let ts = at("2026-01-01T00:00:00Z");
        harness
            .notifier()
            .notify_transition(event("c1", "worker", ts));

        let restarted = harness.notifier();
        let again = restarted.notify_transition(event("c1", "worker", ts + Duration::seconds(10)));
        assert_eq!(again.delivery_result, Some(DeliveryResult::DroppedNoTarget));
        assert_eq!(harness.sender.sent().len(), 1);
    }

    #[test]
    fn corrupt_state_file_starts_empty() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        fs::create_dir_all(harness.state_path.parent().expect("parent")).expect("mkdir");
        fs::write(&harness.state_path, b"{not json").expect("write");

        let result = harness
            .notifier()
            .notify_transition(event("c1", "worker", at("2026-01-01T00:00:00Z")));
        assert_eq!(result.delivery_result, Some(DeliveryResult::Sent));
    }

    #[test]
    fn no_parent_is_dropped_without_send_or_record() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        let notifier = harness.notifier();
        let ts = at("2026-01-01T00:00:00Z");

        for (child, title) in [("c3", "orphan"), ("self", "loop"), ("c4", "lost"), ("gone", "gone")]
        {
            let result = notifier.notify_transition(event(child, title, ts));
            assert_eq!(
                result.delivery_result,
                Some(DeliveryResult::DroppedNoTarget),
                "{child}"
            );
        }
        assert!(harness.sender.sent().is_empty());
        assert!(!harness.state_path.exists());
        assert!(harness.log_lines().is_empty());
    }

    #[test]
    fn early_drops_never_touch_storage() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        let notifier = harness.notifier();
        let ts = at("2026-01-01T00:00:00Z");

        let mut not_running = event("c1", "worker", ts);
        not_running.from_status = SessionStatus::Waiting;
        let mut blank_profile = event("c1", "worker", ts);
        blank_profile.profile = "   ".to_string();
        let conductor = event("c1", "  Conductor-Main", ts);

        for candidate in [not_running, blank_profile, conductor] {
            let result = notifier.notify_transition(candidate);
            assert_eq!(result.delivery_result, Some(DeliveryResult::DroppedNoTarget));
        }
        assert_eq!(harness.backend.open_count(), 0);
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::default(),
        );
        let mut raw = event("c1", " worker ", at("2026-01-01T00:00:00Z"));
        raw.timestamp = None;
        raw.child_session_id = " c1 ".to_string();

        let before = Utc::now();
        let result = harness.notifier().notify_transition(raw);
        let stamped = result.timestamp.expect("timestamp set");
        assert!(stamped >= before);
        assert_eq!(result.child_session_id, "c1");
        assert_eq!(result.child_title, "worker");
    }

    #[test]
    fn send_failure_is_recorded_and_deduplicated() {
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", family()),
            RecordingSender::failing(),
        );
        let notifier = harness.notifier();
        let ts = at("2026-01-01T00:00:00Z");

        let first = notifier.notify_transition(event("c1", "worker", ts));
        assert_eq!(first.delivery_result, Some(DeliveryResult::Failed));
        assert_eq!(first.target_session_id, "p1");

        let retry = notifier.notify_transition(event("c1", "worker", ts + Duration::seconds(5)));
        assert_eq!(retry.delivery_result, Some(DeliveryResult::DroppedNoTarget));
        assert_eq!(harness.sender.sent().len(), 1);
        assert_eq!(harness.log_lines()[0]["delivery_result"], "failed");
    }

    #[test]
    fn storage_open_failure_is_failed() {
        let backend = FakeBackend::default().with_profile("default", family());
        backend.fail_open("default");
        let harness = Harness::new(backend, RecordingSender::default());

        let result = harness
            .notifier()
            .notify_transition(event("c1", "worker", at("2026-01-01T00:00:00Z")));
        assert_eq!(result.delivery_result, Some(DeliveryResult::Failed));
        assert!(harness.sender.sent().is_empty());
        assert_eq!(harness.log_lines().len(), 1);
    }

    #[test]
    fn conductor_parent_must_be_live() {
        let dead_conductor = FakeProfile::new(vec![
            FakeInstanceSpec::new("cond", "conductor-ops", "claude", SessionStatus::Idle)
                .refreshes_to(SessionStatus::Error),
            FakeInstanceSpec::new("c1", "worker", "claude", SessionStatus::Waiting)
                .with_parent("cond"),
        ]);
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", dead_conductor.clone()),
            RecordingSender::default(),
        );
        let result = harness
            .notifier()
            .notify_transition(event("c1", "worker", at("2026-01-01T00:00:00Z")));
        assert_eq!(result.delivery_result, Some(DeliveryResult::DroppedNoTarget));
        assert_eq!(dead_conductor.refresh_count(), 1);

        let live_conductor = FakeProfile::new(vec![
            FakeInstanceSpec::new("cond", "conductor-ops", "claude", SessionStatus::Error)
                .refreshes_to(SessionStatus::Waiting),
            FakeInstanceSpec::new("c1", "worker", "claude", SessionStatus::Waiting)
                .with_parent("cond"),
        ]);
        let harness = Harness::new(
            FakeBackend::default().with_profile("default", live_conductor),
            RecordingSender::default(),
        );
        let result = harness
            .notifier()
            .notify_transition(event("c1", "worker", at("2026-01-01T00:00:00Z")));
        assert_eq!(result.delivery_result, Some(DeliveryResult::Sent));
        assert_eq!(result.target_kind, Some(TargetKind::Conductor));
    }
}
