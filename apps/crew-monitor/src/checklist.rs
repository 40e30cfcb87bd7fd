// [[AgentOps]]/apps/crew-monitor/src/checklist.rs
// Purpose: Per-stage checklist and checkpoint derivation from attributed sub-logs.
// Architecture: Derivation Layer
// Dependencies: Regex, once_cell, Serde

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::events::{EventKind, StreamEvent};
use crate::phase::StagePhase;

pub const CHECKPOINT_TEXT_LIMIT: usize = 60;
const ELLIPSIS: &str = "...";

static TOOL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:using tool|tool name|tool)\s*:\s*([A-Za-z0-9_][A-Za-z0-9_\- ]*)")
        .expect("tool pattern is valid")
});

/// Known tool identifiers and their display labels.
const TOOL_LABELS: &[(&str, &str)] = &[
    ("query_model_metrics", "Query model metrics"),
    ("query_feature_drift", "Query feature drift"),
    ("query_data_quality", "Query data quality"),
    ("query_metric_trend", "Query metric trend"),
    ("search_runbooks", "Search runbooks"),
    ("search_incidents", "Search incidents"),
    ("check_model_health", "Check model health"),
    ("trigger_retraining", "Trigger retraining"),
    ("check_training_status", "Check training status"),
    ("rollback_model", "Rollback model"),
    ("send_slack_alert", "Send Slack alert"),
    ("create_github_issue", "Create GitHub issue"),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Done,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub label: String,
    pub text: String,
    /// Kind of the event the line was taken from; absent for placeholders.
    pub kind: Option<EventKind>,
}

/// A tool reference resolved from an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRef {
    /// Dedup identity.
    pub key: String,
    pub label: String,
}

/// Lowercase, with spaces and hyphens folded into single underscores.
fn normalize_tool(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn known_tool(key: &str) -> Option<(&'static str, &'static str)> {
    TOOL_LABELS.iter().copied().find(|(id, _)| *id == key).or_else(|| {
        TOOL_LABELS
            .iter()
            .copied()
            .find(|(id, _)| key.starts_with(&format!("{}_", id)))
    })
}

pub fn resolve_tool(name: &str) -> Option<ToolRef> {
    let key = normalize_tool(name);
    if key.is_empty() {
        return None;
    }
    if let Some((id, label)) = known_tool(&key) {
        return Some(ToolRef {
            key: id.to_string(),
            label: label.to_string(),
        });
    }

    let raw = name.split_whitespace().next()?.to_string();
    Some(ToolRef {
        key: normalize_tool(&raw),
        label: raw,
    })
}

/// Structured `tool`/`tool_name` fields win over narration text.
pub fn extract_tool(event: &StreamEvent) -> Option<ToolRef> {
    if let Some(name) = event.extra_str("tool_name").or_else(|| event.extra_str("tool")) {
        if let Some(tool) = resolve_tool(name) {
            return Some(tool);
        }
    }

    let captures = TOOL_PATTERN.captures(event.payload())?;
    resolve_tool(captures.get(1)?.as_str())
}

/// Ordered, deduplicated milestones for one stage.
pub fn derive_checklist(sub_log: &[&StreamEvent], phase: StagePhase) -> Vec<ChecklistItem> {
    let mut items: Vec<ChecklistItem> = Vec::new();
    let mut push = |id: String, label: String| {
        if !items.iter().any(|item| item.id == id) {
            items.push(ChecklistItem {
                id,
                label,
                status: ItemStatus::Done,
            });
        }
    };

    for event in sub_log {
        match event.event_kind {
            EventKind::AgentStart => push("agent_initialized".into(), "Agent initialized".into()),
            EventKind::ToolCall => {
                if let Some(tool) = extract_tool(event) {
                    push(format!("tool:{}", tool.key), tool.label);
                }
            }
            EventKind::Reasoning => push("reasoning".into(), "Analyzing results".into()),
            EventKind::TaskComplete => push("task_complete".into(), "Task complete".into()),
            _ => {}
        }
    }

    if phase == StagePhase::Active {
        if let Some(last) = items.last_mut() {
            last.status = ItemStatus::Active;
        }
    }

    items
}

/// Display label for kinds that can headline an active stage.
pub fn kind_label(kind: EventKind) -> Option<&'static str> {
    match kind {
        EventKind::AgentStart => Some("Agent started"),
        EventKind::ToolCall => Some("Running tool"),
        EventKind::TaskComplete => Some("Task complete"),
        EventKind::Reasoning => Some("Reasoning"),
        EventKind::Error => Some("Error"),
        EventKind::Complete => Some("Done"),
        EventKind::Stdout | EventKind::CrewStart | EventKind::Ping => None,
    }
}

/// Cut to the first 60 characters plus an ellipsis.
pub fn truncate(text: &str) -> String {
    match text.char_indices().nth(CHECKPOINT_TEXT_LIMIT) {
        Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        None => text.to_string(),
    }
}

pub fn derive_checkpoint(sub_log: &[&StreamEvent], phase: StagePhase) -> Option<Checkpoint> {
    match phase {
        StagePhase::Pending => None,
        StagePhase::Complete => {
            let finished = sub_log.iter().rev().find(|e| {
                matches!(e.event_kind, EventKind::TaskComplete | EventKind::Complete)
            });
            Some(match finished {
                Some(event) => Checkpoint {
                    label: "Complete".into(),
                    text: truncate(event.payload()),
                    kind: Some(event.event_kind),
                },
                None => Checkpoint {
                    label: "Complete".into(),
                    text: format!("{} lines processed", sub_log.len()),
                    kind: None,
                },
            })
        }
        StagePhase::Active => {
            let latest = sub_log
                .iter()
                .rev()
                .find_map(|e| kind_label(e.event_kind).map(|label| (label, e)));
            Some(match latest {
                Some((label, event)) => Checkpoint {
                    label: label.into(),
                    text: truncate(event.payload()),
                    kind: Some(event.event_kind),
                },
                None => Checkpoint {
                    label: "Processing".into(),
                    text: "Working...".into(),
                    kind: None,
                },
            })
        }
    }
}
