// [[AgentOps]]/apps/crew-monitor/src/events.rs
// Purpose: Wire event model for the crew stream. Decodes pushes into StreamEvent.
// Architecture: Domain Event Layer
// Dependencies: Serde, Serde JSON, thiserror

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Raw narration line captured from the crew process
    Stdout,
    /// An agent picked up its task
    AgentStart,
    /// An agent invoked a tool
    ToolCall,
    /// An agent finished its task
    TaskComplete,
    /// Intermediate thought output
    Reasoning,
    /// Terminal success, `data` carries the crew result
    Complete,
    /// Terminal failure, `data` carries the message
    Error,
    /// Global marker emitted once when the crew boots
    CrewStart,
    /// Keep-alive
    Ping,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Stdout,
        EventKind::AgentStart,
        EventKind::ToolCall,
        EventKind::TaskComplete,
        EventKind::Reasoning,
        EventKind::Complete,
        EventKind::Error,
        EventKind::CrewStart,
        EventKind::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Stdout => "stdout",
            EventKind::AgentStart => "agent_start",
            EventKind::ToolCall => "tool_call",
            EventKind::TaskComplete => "task_complete",
            EventKind::Reasoning => "reasoning",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::CrewStart => "crew_start",
            EventKind::Ping => "ping",
        }
    }

    /// Kinds that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete | EventKind::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// One normalized push from the crew stream.
///
/// The SSE event name is authoritative for `event_kind`; the backend also
/// repeats it as `type` inside the body, which is discarded on decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub event_kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(event_kind: EventKind) -> Self {
        Self {
            event_kind,
            agent: None,
            data: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    #[cfg(test)]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Fallback record used when a push body cannot be parsed.
    pub fn raw(event_kind: EventKind, raw: &str) -> Self {
        Self::new(event_kind).with_data(raw)
    }

    /// Strict decode of a push body. Only JSON objects are accepted.
    pub fn parse(event_kind: EventKind, raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        fields.remove("type");
        fields.remove("event_kind");
        let agent = take_text(&mut fields, "agent").filter(|a| !a.trim().is_empty());
        let data = take_text(&mut fields, "data");
        let timestamp = take_text(&mut fields, "timestamp");

        Ok(Self {
            event_kind,
            agent,
            data,
            timestamp,
            extra: fields,
        })
    }

    pub fn payload(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }

    /// Structured string field carried alongside the standard ones.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

// Strings pass through; null is absent; anything else keeps its JSON text.
fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
