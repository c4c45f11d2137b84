//! Per-tool classification of hook events that end an agent turn.
//!
//! A tool only participates in hook backfill when it has a rule here. Rules
//! come from `[hooks.tools.<tool>]` in the notifier config and default to the
//! Claude and Codex vocabularies.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct ToolEventRule {
    /// Exact (lowercased) event names.
    #[serde(default)]
    pub events: Vec<String>,
    /// Fragment that must appear in the canonical event name.
    #[serde(default)]
    pub required_fragment: Option<String>,
    /// At least one of these must also appear when `required_fragment` is set.
    #[serde(default)]
    pub any_fragments: Vec<String>,
}

impl ToolEventRule {
    pub fn matches(&self, event: &str) -> bool {
        let normalized = event.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return false;
        }
        if self.events.iter().any(|name| name.eq_ignore_ascii_case(&normalized)) {
            return true;
        }

        let Some(required) = self.required_fragment.as_deref() else {
            return false;
        };
        let canonical = canonical_event_name(&normalized);
        canonical.contains(&required.to_ascii_lowercase())
            && self
                .any_fragments
                .iter()
                .any(|fragment| canonical.contains(&fragment.to_ascii_lowercase()))
    }
}

/// Configured tables are merged over the built-in Claude and Codex rules, so
/// adding a tool never drops the defaults. A table for `claude` or `codex`
/// replaces that tool's rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEventRules {
    tools: BTreeMap<String, ToolEventRule>,
}

impl Default for HookEventRules {
    fn default() -> Self {
        let mut tools = BTreeMap::new();
        tools.insert(
            "claude".to_string(),
            ToolEventRule {
                events: vec![
                    "stop".to_string(),
                    "permissionrequest".to_string(),
                    "notification".to_string(),
                ],
                ..ToolEventRule::default()
            },
        );
        tools.insert(
            "codex".to_string(),
            ToolEventRule {
                events: Vec::new(),
                required_fragment: Some("turn".to_string()),
                any_fragments: ["complete", "fail", "abort", "cancel"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
        );
        Self { tools }
    }
}

impl<'de> Deserialize<'de> for HookEventRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let overrides = BTreeMap::<String, ToolEventRule>::deserialize(deserializer)?;
        Ok(Self::default().with_overrides(overrides))
    }
}

impl HookEventRules {
    pub fn new(tools: BTreeMap<String, ToolEventRule>) -> Self {
        Self {
            tools: BTreeMap::new(),
        }
        .with_overrides(tools)
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, ToolEventRule>) -> Self {
        for (tool, rule) in overrides {
            let key = tool.trim().to_ascii_lowercase();
            if !key.is_empty() {
                self.tools.insert(key, rule);
            }
        }
        self
    }

    pub fn is_instrumented(&self, tool: &str) -> bool {
        self.rule_for(tool).is_some()
    }

    /// True when `event` from a `tool` session signals the end of a turn.
    pub fn is_terminal_event(&self, tool: &str, event: &str) -> bool {
        self.rule_for(tool)
            .map(|rule| rule.matches(event))
            .unwrap_or(false)
    }

    fn rule_for(&self, tool: &str) -> Option<&ToolEventRule> {
        self.tools.get(tool.trim().to_ascii_lowercase().as_str())
    }
}

/// Replaces `.`, `-` and `_` separators with `/`.
fn canonical_event_name(event: &str) -> String {
    event
        .chars()
        .map(|c| match c {
            '.' | '-' | '_' => '/',
            other => other,
        })
        .collect()
}
