use serde::Serialize;
use serde_json::Value;

use crate::checklist::{derive_checklist, derive_checkpoint, Checkpoint, ChecklistItem};
use crate::phase::{derive_phases, RunFlags, StagePhase};
use crate::stages::{attribute, Stage};
use crate::store::RunState;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageView {
    pub stage: Stage,
    pub agent: &'static str,
    pub phase: StagePhase,
    pub checklist: Vec<ChecklistItem>,
    pub checkpoint: Option<Checkpoint>,
    pub event_count: usize,
}

/// Everything a presentation client needs, re-derived from scratch per change.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineView {
    pub run_id: Option<String>,
    pub running: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub summary: Option<String>,
    pub event_count: usize,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub stages: Vec<StageView>,
}

impl PipelineView {
    pub fn derive(state: &RunState) -> Self {
        let assignment = attribute(&state.events);
        let flags = RunFlags {
            running: state.running,
            terminal: state.is_terminal(),
        };

        let phases = derive_phases(&assignment, flags);

        let stages = Stage::ALL
            .into_iter()
            .map(|stage| {
                let sub_log = assignment.for_stage(stage);
                let phase = phases[stage.index()];
                StageView {
                    stage,
                    agent: stage.agent_name(),
                    phase,
                    checklist: derive_checklist(sub_log, phase),
                    checkpoint: derive_checkpoint(sub_log, phase),
                    event_count: sub_log.len(),
                }
            })
            .collect();

        Self {
            run_id: state.run_id.clone(),
            running: state.running,
            result: state.result.clone(),
            error: state.error.clone(),
            summary: state.summary.clone(),
            event_count: state.events.len(),
            started_at: state.started_at.clone(),
            finished_at: state.finished_at.clone(),
            stages,
        }
    }

    #[cfg(test)]
    pub fn stage(&self, stage: Stage) -> &StageView {
        &self.stages[stage.index()]
    }
}
