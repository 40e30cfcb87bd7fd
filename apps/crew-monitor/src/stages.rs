// [[AgentOps]]/apps/crew-monitor/src/stages.rs
// Purpose: Stage model and forward-fill attribution of events to stages.
// Architecture: Derivation Layer
// Dependencies: Serde

use serde::{Deserialize, Serialize};

use crate::events::{EventKind, StreamEvent};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Monitor,
    Investigator,
    Remediator,
}

impl Stage {
    /// Pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Monitor, Stage::Investigator, Stage::Remediator];

    pub fn agent_name(&self) -> &'static str {
        match self {
            Stage::Monitor => "ML Model Monitor",
            Stage::Investigator => "ML Incident Investigator",
            Stage::Remediator => "ML Operations Remediator",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Stage::Monitor => 0,
            Stage::Investigator => 1,
            Stage::Remediator => 2,
        }
    }

    /// Resolve an agent tag. Matching is case-insensitive and accepts tags
    /// that embed the canonical name.
    pub fn from_agent(agent: &str) -> Option<Stage> {
        let agent = agent.trim().to_lowercase();
        if agent.is_empty() {
            return None;
        }
        Stage::ALL
            .into_iter()
            .find(|s| agent.contains(&s.agent_name().to_lowercase()))
    }

    /// Stages that come after this one in the pipeline.
    pub fn later(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(move |s| s > self)
    }
}

/// Partition of the run log into per-stage sub-logs, in arrival order.
#[derive(Debug, Default, PartialEq)]
pub struct StageAssignment<'a> {
    pub monitor: Vec<&'a StreamEvent>,
    pub investigator: Vec<&'a StreamEvent>,
    pub remediator: Vec<&'a StreamEvent>,
}

impl<'a> StageAssignment<'a> {
    pub fn for_stage(&self, stage: Stage) -> &[&'a StreamEvent] {
        match stage {
            Stage::Monitor => &self.monitor,
            Stage::Investigator => &self.investigator,
            Stage::Remediator => &self.remediator,
        }
    }

    /// A stage is seen once its sub-log holds at least one event.
    pub fn seen(&self, stage: Stage) -> bool {
        !self.for_stage(stage).is_empty()
    }

    fn push(&mut self, stage: Stage, event: &'a StreamEvent) {
        match stage {
            Stage::Monitor => self.monitor.push(event),
            Stage::Investigator => self.investigator.push(event),
            Stage::Remediator => self.remediator.push(event),
        }
    }
}

/// Single pass, no lookahead. An event's own agent always wins; untagged
/// events go to the last explicit owner, or to Monitor before any owner.
pub fn attribute<'a, I>(events: I) -> StageAssignment<'a>
where
    I: IntoIterator<Item = &'a StreamEvent>,
{
    let mut assignment = StageAssignment::default();
    let mut current_owner: Option<Stage> = None;

    for event in events {
        if event.event_kind == EventKind::CrewStart {
            continue;
        }

        let explicit = event.agent.as_deref().and_then(|agent| {
            let stage = Stage::from_agent(agent);
            if stage.is_none() {
                tracing::debug!("Unrecognized agent tag '{}', forward-filling", agent);
            }
            stage
        });

        let stage = match explicit {
            Some(stage) => {
                current_owner = Some(stage);
                stage
            }
            None => current_owner.unwrap_or(Stage::Monitor),
        };

        assignment.push(stage, event);
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(kind: EventKind, stage: Stage) -> StreamEvent {
        StreamEvent::new(kind).with_agent(stage.agent_name())
    }

    fn untagged(data: &str) -> StreamEvent {
        StreamEvent::new(EventKind::Stdout).with_data(data)
    }

    #[test]
    fn test_from_agent_variants() {
        assert_eq!(Stage::from_agent("ML Model Monitor"), Some(Stage::Monitor));
        assert_eq!(Stage::from_agent("ml incident investigator"), Some(Stage::Investigator));
        assert_eq!(
            Stage::from_agent("Working Agent: ML Operations Remediator"),
            Some(Stage::Remediator)
        );
        assert_eq!(Stage::from_agent("Somebody Else"), None);
        assert_eq!(Stage::from_agent("  "), None);
    }

    #[test]
    fn test_forward_fill() {
        let events = vec![
            tagged(EventKind::AgentStart, Stage::Monitor),
            untagged("e1"),
            tagged(EventKind::AgentStart, Stage::Investigator),
            untagged("e3"),
        ];

        let a = attribute(&events);
        assert_eq!(a.monitor, vec![&events[0], &events[1]]);
        assert_eq!(a.investigator, vec![&events[2], &events[3]]);
        assert!(a.remediator.is_empty());
    }

    #[test]
    fn test_leading_untagged_events_default_to_monitor() {
        let events = vec![untagged("boot"), untagged("still booting")];
        let a = attribute(&events);
        assert_eq!(a.monitor.len(), 2);
        assert!(a.investigator.is_empty());
    }

    #[test]
    fn test_explicit_agent_overrides_current_owner() {
        let events = vec![
            tagged(EventKind::AgentStart, Stage::Investigator),
            tagged(EventKind::Stdout, Stage::Monitor),
            untagged("after"),
        ];

        let a = attribute(&events);
        assert_eq!(a.investigator, vec![&events[0]]);
        // The explicit tag moves the owner back to Monitor.
        assert_eq!(a.monitor, vec![&events[1], &events[2]]);
    }

    #[test]
    fn test_crew_start_is_skipped() {
        let events = vec![
            StreamEvent::new(EventKind::CrewStart).with_data("Starting AgentOps crew..."),
            tagged(EventKind::AgentStart, Stage::Remediator),
        ];
        let a = attribute(&events);
        assert!(a.monitor.is_empty());
        assert_eq!(a.remediator.len(), 1);
    }

    #[test]
    fn test_unknown_agent_is_forward_filled() {
        let events = vec![
            tagged(EventKind::AgentStart, Stage::Investigator),
            StreamEvent::new(EventKind::Stdout).with_agent("Crew Manager"),
        ];
        let a = attribute(&events);
        assert_eq!(a.investigator.len(), 2);
    }

    #[test]
    fn test_attribution_is_deterministic() {
        let events = vec![
            untagged("a"),
            tagged(EventKind::ToolCall, Stage::Investigator),
            untagged("b"),
            tagged(EventKind::AgentStart, Stage::Remediator),
            untagged("c"),
        ];
        assert_eq!(attribute(&events), attribute(&events));
    }
}
