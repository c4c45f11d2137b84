//! Session status vocabulary.
//!
//! Hook reports and status table rows carry free-form strings. They are parsed
//! into [`SessionStatus`] at the boundary so the rest of the pipeline never
//! compares raw strings. Anything unrecognized becomes [`SessionStatus::Unknown`],
//! which is never a valid endpoint for an attention transition.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    Running,
    Waiting,
    Idle,
    Error,
    #[default]
    Unknown,
}

impl SessionStatus {
    /// Parses a status string, trimming whitespace and ignoring case.
    ///
    /// `dead` is the hook vocabulary for an ended session and maps to `Error`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => SessionStatus::Running,
            "waiting" => SessionStatus::Waiting,
            "idle" => SessionStatus::Idle,
            "error" | "dead" => SessionStatus::Error,
            _ => SessionStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Idle => "idle",
            SessionStatus::Error => "error",
            SessionStatus::Unknown => "unknown",
        }
    }

    /// Waiting, Error and Idle: the states a finished turn can land in.
    pub fn is_attention(&self) -> bool {
        matches!(
            self,
            SessionStatus::Waiting | SessionStatus::Error | SessionStatus::Idle
        )
    }

    /// Running, Waiting and Idle: the session process is observably alive.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionStatus::Running | SessionStatus::Waiting | SessionStatus::Idle
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SessionStatus {
    fn from(value: &str) -> Self {
        SessionStatus::parse(value)
    }
}

impl Serialize for SessionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SessionStatus::parse(&raw))
    }
}
