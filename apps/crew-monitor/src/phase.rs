use serde::{Deserialize, Serialize};

use crate::stages::{Stage, StageAssignment};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StagePhase {
    Pending,
    Active,
    Complete,
}

/// Run-level flags the phase rules depend on.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub running: bool,
    /// A result or an error has been recorded.
    pub terminal: bool,
}

/// Phase of every stage, in pipeline order.
pub fn derive_phases(assignment: &StageAssignment<'_>, flags: RunFlags) -> [StagePhase; 3] {
    Stage::ALL.map(|stage| derive_phase(stage, assignment, flags))
}

pub fn derive_phase(stage: Stage, assignment: &StageAssignment<'_>, flags: RunFlags) -> StagePhase {
    if !assignment.seen(stage) {
        return StagePhase::Pending;
    }

    // The pipeline moved past this stage, or the run is over.
    let overtaken = stage.later().any(|later| assignment.seen(later));
    if overtaken || flags.terminal {
        return StagePhase::Complete;
    }

    // Furthest stage reached is the one doing work.
    if flags.running {
        return StagePhase::Active;
    }

    StagePhase::Complete
}
