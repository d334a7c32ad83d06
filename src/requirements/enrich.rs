//! Cross-link requirements to validation evidence observed during a run.

use crate::outcome::Observation;

use super::{LiveStatus, ModuleIndex};

/// The slice of one executed phase the enricher needs.
pub struct PhaseEvidence<'a> {
    pub phase_id: &'a str,
    pub success: bool,
    pub observations: &'a [Observation],
}

/// Assign live statuses: a requirement passes iff every executed phase
/// whose observation evidence mentions its id succeeded, fails if any such
/// phase failed, and stays unknown without evidence. Failure is absorbing,
/// so statuses move monotonically within a run.
pub fn enrich_from_phases(index: &mut ModuleIndex, phases: &[PhaseEvidence<'_>]) {
    for module in &mut index.modules {
        for requirement in &mut module.requirements {
            let mut live = LiveStatus::Unknown;
            for phase in phases {
                if !references(phase.observations, &requirement.id) {
                    continue;
                }
                let evidence = if phase.success {
                    LiveStatus::Passed
                } else {
                    LiveStatus::Failed
                };
                tracing::debug!(
                    requirement = %requirement.id,
                    phase = phase.phase_id,
                    status = evidence.label(),
                    "requirement evidence"
                );
                live = live.absorb(evidence);
            }
            requirement.live_status = live;
        }
    }
}

fn references(observations: &[Observation], requirement_id: &str) -> bool {
    observations.iter().any(|observation| {
        observation
            .evidence
            .as_deref()
            .is_some_and(|evidence| evidence.contains(requirement_id))
    })
}
