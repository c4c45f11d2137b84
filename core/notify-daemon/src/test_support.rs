//! In-memory collaborators for driving the pipeline in tests.

use chrono::{DateTime, Utc};
use deck_core::{
    DeckError, GroupRecord, HookSource, HookStatus, Instance, MessageSender, ProfileBackend,
    SessionStatus, StatusRow, Storage,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn hook(status: SessionStatus, event: &str, updated_at: DateTime<Utc>) -> HookStatus {
    HookStatus {
        status,
        session_id: "tool-session".to_string(),
        event: event.to_string(),
        updated_at,
    }
}

#[derive(Debug, Clone)]
pub struct FakeInstanceSpec {
    pub id: String,
    pub title: String,
    pub tool: String,
    pub parent: Option<String>,
    pub status: SessionStatus,
    pub refreshed: Option<SessionStatus>,
}

impl FakeInstanceSpec {
    pub fn new(id: &str, title: &str, tool: &str, status: SessionStatus) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            tool: tool.to_string(),
            parent: None,
            status,
            refreshed: None,
        }
    }

    pub fn refreshes_to(mut self, status: SessionStatus) -> Self {
        self.refreshed = Some(status);
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }
}

#[derive(Default)]
struct ProfileState {
    specs: Vec<FakeInstanceSpec>,
    alive: Option<usize>,
    shared: HashMap<String, SessionStatus>,
    load_error: bool,
    writes: Vec<(String, SessionStatus, String)>,
    refreshes: usize,
    hooks_seen: Vec<String>,
    closes: usize,
}

/// One profile's backing data, shared by every storage handle opened on it.
#[derive(Clone)]
pub struct FakeProfile {
    state: Arc<Mutex<ProfileState>>,
}

impl FakeProfile {
    pub fn new(specs: Vec<FakeInstanceSpec>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProfileState {
                specs,
                alive: Some(0),
                ..ProfileState::default()
            })),
        }
    }

    pub fn with_alive(self, count: usize) -> Self {
        self.lock().alive = Some(count);
        self
    }

    pub fn with_alive_error(self) -> Self {
        self.lock().alive = None;
        self
    }

    pub fn with_shared_status(self, id: &str, status: SessionStatus) -> Self {
        self.lock().shared.insert(id.to_string(), status);
        self
    }

    pub fn with_load_error(self) -> Self {
        self.lock().load_error = true;
        self
    }

    /// Makes `id` load and refresh as `status` from now on.
    pub fn set_status(&self, id: &str, status: SessionStatus) {
        let mut state = self.lock();
        if let Some(spec) = state.specs.iter_mut().find(|spec| spec.id == id) {
            spec.status = status;
            spec.refreshed = None;
        }
        state.shared.insert(id.to_string(), status);
    }

    pub fn storage(&self) -> FakeStorage {
        FakeStorage {
            state: Arc::clone(&self.state),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.lock().refreshes
    }

    pub fn writes(&self) -> Vec<(String, SessionStatus, String)> {
        self.lock().writes.clone()
    }

    pub fn hooks_seen(&self) -> Vec<String> {
        self.lock().hooks_seen.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProfileState> {
        self.state.lock().expect("profile lock")
    }
}

pub struct FakeStorage {
    state: Arc<Mutex<ProfileState>>,
}

impl Storage for FakeStorage {
    fn load_with_groups(
        &self,
    ) -> deck_core::Result<(Vec<Box<dyn Instance>>, Vec<GroupRecord>)> {
        let state = self.state.lock().expect("profile lock");
        if state.load_error {
            return Err(DeckError::InvalidArgument("load failed".to_string()));
        }
        let instances = state
            .specs
            .iter()
            .map(|spec| {
                Box::new(FakeInstance {
                    spec: spec.clone(),
                    status: spec.status,
                    state: Arc::clone(&self.state),
                }) as Box<dyn Instance>
            })
            .collect();
        Ok((instances, Vec::new()))
    }

    fn alive_instance_count(&self) -> deck_core::Result<usize> {
        self.state
            .lock()
            .expect("profile lock")
            .alive
            .ok_or_else(|| DeckError::InvalidArgument("heartbeat table missing".to_string()))
    }

    fn read_all_statuses(&self) -> deck_core::Result<HashMap<String, StatusRow>> {
        let state = self.state.lock().expect("profile lock");
        Ok(state
            .shared
            .iter()
            .map(|(id, status)| {
                (
                    id.clone(),
                    StatusRow {
                        status: *status,
                        tool: "claude".to_string(),
                        acknowledged: false,
                    },
                )
            })
            .collect())
    }

    fn write_status(&self, id: &str, status: SessionStatus, tool: &str) -> deck_core::Result<()> {
        let mut state = self.state.lock().expect("profile lock");
        state
            .writes
            .push((id.to_string(), status, tool.to_string()));
        Ok(())
    }

    fn close(self: Box<Self>) -> deck_core::Result<()> {
        self.state.lock().expect("profile lock").closes += 1;
        Ok(())
    }
}

pub struct FakeInstance {
    spec: FakeInstanceSpec,
    status: SessionStatus,
    state: Arc<Mutex<ProfileState>>,
}

impl Instance for FakeInstance {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn title(&self) -> &str {
        &self.spec.title
    }

    fn tool(&self) -> &str {
        &self.spec.tool
    }

    fn parent_session_id(&self) -> Option<&str> {
        self.spec.parent.as_deref().filter(|parent| !parent.is_empty())
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    fn update_hook_status(&mut self, _hook: &HookStatus) {
        self.state
            .lock()
            .expect("profile lock")
            .hooks_seen
            .push(self.spec.id.clone());
    }

    fn update_status(&mut self) -> deck_core::Result<()> {
        self.state.lock().expect("profile lock").refreshes += 1;
        if let Some(status) = self.spec.refreshed {
            self.status = status;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBackend {
    profiles: Mutex<BTreeMap<String, FakeProfile>>,
    open_failures: Mutex<HashSet<String>>,
    list_fails: AtomicBool,
    opens: AtomicUsize,
}

impl FakeBackend {
    pub fn with_profile(self, name: &str, profile: FakeProfile) -> Self {
        self.profiles
            .lock()
            .expect("profiles lock")
            .insert(name.to_string(), profile);
        self
    }

    pub fn fail_open(&self, name: &str) {
        self.open_failures
            .lock()
            .expect("failures lock")
            .insert(name.to_string());
    }

    pub fn allow_open(&self, name: &str) {
        self.open_failures
            .lock()
            .expect("failures lock")
            .remove(name);
    }

    pub fn fail_list(&self) {
        self.list_fails.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ProfileBackend for FakeBackend {
    fn list_profiles(&self) -> deck_core::Result<Vec<String>> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(DeckError::InvalidArgument("list failed".to_string()));
        }
        Ok(self
            .profiles
            .lock()
            .expect("profiles lock")
            .keys()
            .cloned()
            .collect())
    }

    fn open_storage(&self, profile: &str) -> deck_core::Result<Box<dyn Storage>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self
            .open_failures
            .lock()
            .expect("failures lock")
            .contains(profile)
        {
            return Err(DeckError::InvalidProfile(profile.to_string()));
        }
        let profiles = self.profiles.lock().expect("profiles lock");
        let found = profiles
            .get(profile)
            .ok_or_else(|| DeckError::InvalidProfile(profile.to_string()))?;
        Ok(Box::new(found.storage()))
    }
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: AtomicBool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        let sender = Self::default();
        sender.fail.store(true, Ordering::SeqCst);
        sender
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl MessageSender for RecordingSender {
    fn send(&self, profile: &str, target: &str, message: &str) -> deck_core::Result<()> {
        self.sent.lock().expect("sent lock").push((
            profile.to_string(),
            target.to_string(),
            message.to_string(),
        ));
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeckError::CommandFailed {
                command: "agent-deck session send".to_string(),
                details: "session not found".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHooks {
    statuses: HashMap<String, HookStatus>,
}

impl FakeHooks {
    pub fn with(mut self, id: &str, status: HookStatus) -> Self {
        self.statuses.insert(id.to_string(), status);
        self
    }
}

impl HookSource for FakeHooks {
    fn hook_status(&self, instance_id: &str) -> Option<HookStatus> {
        self.statuses.get(instance_id).cloned()
    }
}
