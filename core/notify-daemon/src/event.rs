use chrono::{DateTime, Utc};
use deck_core::SessionStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Parent,
    Conductor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    Sent,
    Failed,
    DroppedNoTarget,
}

/// A child session finished a turn. Target and delivery fields are filled in
/// by the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionNotificationEvent {
    pub child_session_id: String,
    pub child_title: String,
    pub profile: String,
    pub from_status: SessionStatus,
    pub to_status: SessionStatus,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_session_id: String,
    #[serde(default)]
    pub target_kind: Option<TargetKind>,
    #[serde(default)]
    pub delivery_result: Option<DeliveryResult>,
}

impl TransitionNotificationEvent {
    pub fn new(
        child_session_id: &str,
        child_title: &str,
        profile: &str,
        from_status: SessionStatus,
        to_status: SessionStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            child_session_id: child_session_id.to_string(),
            child_title: child_title.to_string(),
            profile: profile.to_string(),
            from_status,
            to_status,
            timestamp: Some(timestamp),
            target_session_id: String::new(),
            target_kind: None,
            delivery_result: None,
        }
    }
}
