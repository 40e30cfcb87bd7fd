// [[AgentOps]]/apps/crew-monitor/src/store.rs
// Purpose: Run State Store. Bounded event log plus terminal outcome, mutated only through RunCommand.
// Architecture: State Layer
// Dependencies: Serde, Chrono

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

use crate::events::{EventKind, StreamEvent};

pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: Option<String>,
    pub running: bool,
    pub events: VecDeque<StreamEvent>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Natural-language summary of `result`, filled in after completion.
    pub summary: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    #[serde(skip)]
    history_limit: usize,
}

impl Default for RunState {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

/// Every way the run state can change.
#[derive(Debug, Clone)]
pub enum RunCommand {
    Start { run_id: String },
    Event(StreamEvent),
    Fail(String),
    Clear,
    /// Terminal outcome read back from the backend without a live stream.
    Restore {
        run_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Summary for a given result text; dropped if the result has since changed.
    Summary { result: String, summary: String },
}

impl RunState {
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            run_id: None,
            running: false,
            events: VecDeque::new(),
            result: None,
            error: None,
            summary: None,
            started_at: None,
            finished_at: None,
            history_limit: history_limit.max(1),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Result rendered as text, the way the dashboard displays it.
    pub fn result_text(&self) -> Option<String> {
        match self.result.as_ref()? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn start_run(&mut self, run_id: String) {
        if self.running {
            tracing::warn!("Run restarted while still running; resetting state");
        }
        self.run_id = Some(run_id);
        self.running = true;
        self.started_at = Some(Utc::now().to_rfc3339());
        self.finished_at = None;
        self.reset_outcome();
    }

    /// Returns false when the event was dropped.
    pub fn append_event(&mut self, event: StreamEvent) -> bool {
        if event.event_kind == EventKind::Ping {
            return false;
        }
        self.events.push_back(event);
        while self.events.len() > self.history_limit {
            self.events.pop_front();
        }
        true
    }

    pub fn complete_run(&mut self, payload: Value) {
        self.running = false;
        self.result = Some(payload);
        self.summary = None;
        self.finished_at = Some(Utc::now().to_rfc3339());
    }

    pub fn fail_run(&mut self, message: String) {
        self.running = false;
        self.error = Some(message);
        self.finished_at = Some(Utc::now().to_rfc3339());
    }

    /// Drops history and outcome; `running` is left alone.
    pub fn clear(&mut self) {
        self.reset_outcome();
    }

    fn reset_outcome(&mut self) {
        self.events.clear();
        self.result = None;
        self.error = None;
        self.summary = None;
    }

    /// Reducer entry point. Stream events are dispatched the way the
    /// dashboard did: terminal kinds are logged and then end the run.
    pub fn apply(&mut self, command: RunCommand) {
        match command {
            RunCommand::Start { run_id } => self.start_run(run_id),
            RunCommand::Event(event) => {
                let kind = event.event_kind;
                let payload = event.data.clone();
                if !self.append_event(event) {
                    return;
                }
                if !kind.is_terminal() {
                    return;
                }
                let payload = payload.unwrap_or_default();
                if kind == EventKind::Error {
                    self.fail_run(payload);
                } else {
                    self.complete_run(Value::String(payload));
                }
            }
            RunCommand::Fail(message) => self.fail_run(message),
            RunCommand::Clear => self.clear(),
            RunCommand::Restore { run_id, result, error } => {
                self.reset_outcome();
                self.run_id = Some(run_id);
                self.running = false;
                self.result = result;
                self.error = error;
            }
            RunCommand::Summary { result, summary } => {
                if self.result_text().as_deref() == Some(result.as_str()) {
                    self.summary = Some(summary);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> StreamEvent {
        StreamEvent::new(EventKind::Stdout).with_data(format!("line {}", n))
    }

    #[test]
    fn test_pings_never_enter_the_log() {
        let mut state = RunState::default();
        state.start_run("run-1".into());

        let mut expected = 0;
        for n in 0..20 {
            if n % 3 == 0 {
                state.apply(RunCommand::Event(StreamEvent::new(EventKind::Ping)));
            } else {
                state.apply(RunCommand::Event(line(n)));
                expected += 1;
            }
        }

        assert_eq!(state.events.len(), expected);
        assert!(state.events.iter().all(|e| e.event_kind != EventKind::Ping));
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut state = RunState::default();
        for n in 0..1005 {
            state.append_event(line(n));
        }

        assert_eq!(state.events.len(), 1000);
        let kept: Vec<String> = state.events.iter().map(|e| e.payload().to_string()).collect();
        let expected: Vec<String> = (5..1005).map(|n| format!("line {}", n)).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_start_resets_previous_run() {
        let mut state = RunState::default();
        state.start_run("run-1".into());
        state.append_event(line(1));
        state.fail_run("boom".into());

        state.start_run("run-2".into());
        assert!(state.running);
        assert!(state.events.is_empty());
        assert_eq!(state.error, None);
        assert_eq!(state.result, None);
        assert_eq!(state.run_id.as_deref(), Some("run-2"));
    }

    #[test]
    fn test_complete_event_is_logged_and_terminal() {
        let mut state = RunState::default();
        state.start_run("run-1".into());
        state.apply(RunCommand::Event(line(1)));
        state.apply(RunCommand::Event(StreamEvent::new(EventKind::Complete).with_data("ok")));

        assert!(!state.running);
        assert_eq!(state.result, Some(Value::String("ok".into())));
        assert_eq!(state.events.len(), 2);
    }

    #[test]
    fn test_error_event_fails_run() {
        let mut state = RunState::default();
        state.start_run("run-1".into());
        state.apply(RunCommand::Event(StreamEvent::new(EventKind::Error).with_data("quota exceeded")));

        assert!(!state.running);
        assert_eq!(state.error.as_deref(), Some("quota exceeded"));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_clear_keeps_running_flag() {
        let mut state = RunState::default();
        state.start_run("run-1".into());
        state.append_event(line(1));
        state.apply(RunCommand::Clear);

        assert!(state.running);
        assert!(state.events.is_empty());
    }

    #[test]
    fn test_summary_only_applies_to_current_result() {
        let mut state = RunState::default();
        state.start_run("run-1".into());
        state.apply(RunCommand::Event(StreamEvent::new(EventKind::Complete).with_data("ok")));

        state.apply(RunCommand::Summary {
            result: "stale".into(),
            summary: "nope".into(),
        });
        assert_eq!(state.summary, None);

        state.apply(RunCommand::Summary {
            result: "ok".into(),
            summary: "All good".into(),
        });
        assert_eq!(state.summary.as_deref(), Some("All good"));
    }
}
