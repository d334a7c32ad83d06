//! Phase engine: schedule phases, propagate preconditions, assemble the
//! run record.
//!
//! The engine owns the [`RunRecord`] exclusively during execution. Phases
//! run strictly one at a time, in topological order with lexicographic
//! tie-breaks on phase id, so runs over identical inputs are identical.
//! Seeds cleanup handles accumulate on a run-scoped stack and drain LIFO
//! before the record freezes, on every exit path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::audit::{RuleSeverity, ViolationSet};
use crate::classify::{classify, ScenarioProfile};
use crate::config::ConfigError;
use crate::outcome::{FailureClass, Observation, PhaseResult};
use crate::platform::{CancelToken, Platform};
use crate::requirements::enrich::PhaseEvidence;
use crate::requirements::{enrich_from_phases, load_module_index, ModuleIndex};
use crate::runners::DEFAULT_UNIT_TIMEOUT;
use crate::seeds::CleanupHandle;
use crate::snapshot::{build_snapshot, Snapshot};

pub mod phases;

/// Schema version stamped on serialized run records.
pub const RUN_RECORD_SCHEMA_VERSION: u32 = 1;

/// Stable identifiers for every unit of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub enum PhaseId {
    #[serde(rename = "existence")]
    Existence,
    #[serde(rename = "commands")]
    Commands,
    #[serde(rename = "runtime")]
    Runtime,
    #[serde(rename = "unit:go")]
    UnitGo,
    #[serde(rename = "unit:node")]
    UnitNode,
    #[serde(rename = "unit:python")]
    UnitPython,
    #[serde(rename = "audit")]
    Audit,
    #[serde(rename = "ui_smoke")]
    UiSmoke,
    #[serde(rename = "integration")]
    Integration,
}

impl PhaseId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseId::Existence => "existence",
            PhaseId::Commands => "commands",
            PhaseId::Runtime => "runtime",
            PhaseId::UnitGo => "unit:go",
            PhaseId::UnitNode => "unit:node",
            PhaseId::UnitPython => "unit:python",
            PhaseId::Audit => "audit",
            PhaseId::UiSmoke => "ui_smoke",
            PhaseId::Integration => "integration",
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static phase table: preconditions are phases that must not have failed
/// (nor be transitively blocked) for this phase to execute.
struct PhaseSpec {
    id: PhaseId,
    preconditions: &'static [PhaseId],
}

const PHASE_TABLE: &[PhaseSpec] = &[
    PhaseSpec {
        id: PhaseId::Existence,
        preconditions: &[],
    },
    PhaseSpec {
        id: PhaseId::Commands,
        preconditions: &[PhaseId::Existence],
    },
    PhaseSpec {
        id: PhaseId::Runtime,
        preconditions: &[PhaseId::Commands],
    },
    PhaseSpec {
        id: PhaseId::UnitGo,
        preconditions: &[PhaseId::Runtime],
    },
    PhaseSpec {
        id: PhaseId::UnitNode,
        preconditions: &[PhaseId::Runtime],
    },
    PhaseSpec {
        id: PhaseId::UnitPython,
        preconditions: &[PhaseId::Runtime],
    },
    PhaseSpec {
        id: PhaseId::Audit,
        preconditions: &[PhaseId::Existence],
    },
    PhaseSpec {
        id: PhaseId::UiSmoke,
        preconditions: &[PhaseId::Existence],
    },
    PhaseSpec {
        id: PhaseId::Integration,
        preconditions: &[PhaseId::Runtime],
    },
];

/// How one scheduled phase concluded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Executed {
        #[serde(flatten)]
        result: PhaseResult,
    },
    SkippedNotApplicable,
    SkippedBlocked {
        blocked_on: PhaseId,
    },
}

impl PhaseOutcome {
    /// A phase counts as failed only when it executed and did not succeed.
    pub fn failed(&self) -> bool {
        matches!(self, PhaseOutcome::Executed { result } if !result.success)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseRecord {
    pub id: PhaseId,
    pub outcome: PhaseOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

/// The frozen aggregate emitted at the end of a scenario invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub schema_version: u32,
    pub profile: ScenarioProfile,
    pub phases: Vec<PhaseRecord>,
    pub violations: ViolationSet,
    pub requirement_snapshot: Snapshot,
    /// Run-level notes: seeds cleanup results and bookkeeping outside any
    /// single phase.
    pub run_observations: Vec<Observation>,
    pub started_at_epoch_ms: u128,
    pub completed_at_epoch_ms: u128,
    pub verdict: Verdict,
}

impl RunRecord {
    pub fn phase(&self, id: PhaseId) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|record| record.id == id)
            .map(|record| &record.outcome)
    }
}

/// Caller-supplied knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cancel: CancelToken,
    /// Root for per-run artifact directories; a temp dir when unset.
    pub artifact_root: Option<PathBuf>,
    /// Replacement for `<scenario>/.vrooli/testing.json`.
    pub config_override: Option<PathBuf>,
    /// Exported to seed subprocesses as the application root; defaults to
    /// the scenario's parent directory.
    pub app_root: Option<PathBuf>,
    pub unit_timeout: Duration,
    pub node_package_manager: String,
    pub python_test_driver: String,
    /// The audit phase fails iff a violation reaches this severity.
    pub audit_severity_floor: RuleSeverity,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cancel: CancelToken::new(),
            artifact_root: None,
            config_override: None,
            app_root: None,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            node_package_manager: "npm".to_string(),
            python_test_driver: "pytest".to_string(),
            audit_severity_floor: RuleSeverity::High,
        }
    }
}

/// Conditions that abort a run before any phase executes.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("run cancelled before any phase started")]
    CancelledEarly,
    #[error("prepare artifact directory: {0}")]
    Artifacts(String),
}

/// Execute every applicable phase for the scenario and return the frozen
/// record.
pub fn run_scenario(
    platform: &dyn Platform,
    scenario_path: &std::path::Path,
    options: &RunOptions,
) -> Result<RunRecord, RunError> {
    let profile = classify(platform, scenario_path, options.config_override.as_deref())?;
    if options.cancel.is_cancelled() {
        return Err(RunError::CancelledEarly);
    }

    let started_at_epoch_ms = platform.now_epoch_ms();
    let artifact_dir = prepare_artifact_dir(platform, &profile, started_at_epoch_ms, options)?;
    tracing::info!(
        scenario = %profile.name,
        artifacts = %artifact_dir.display(),
        "run started"
    );

    let mut outcomes: BTreeMap<PhaseId, PhaseOutcome> = BTreeMap::new();
    let mut order: Vec<PhaseId> = Vec::new();
    let mut violations = ViolationSet::default();
    let mut cleanup_stack: Vec<CleanupHandle> = Vec::new();
    let mut run_observations = Vec::new();

    for id in schedule() {
        if options.cancel.is_cancelled() {
            // Stop scheduling; the phase that observed the cancel has
            // already recorded a cancelled result.
            break;
        }
        let spec = PHASE_TABLE
            .iter()
            .find(|spec| spec.id == id)
            .expect("phase table covers the schedule");

        if !phases::applicable(id, &profile) {
            order.push(id);
            outcomes.insert(id, PhaseOutcome::SkippedNotApplicable);
            continue;
        }

        if let Some(blocker) = spec.preconditions.iter().find(|pre| blocked(&outcomes, **pre)) {
            order.push(id);
            outcomes.insert(
                id,
                PhaseOutcome::SkippedBlocked {
                    blocked_on: *blocker,
                },
            );
            continue;
        }

        tracing::debug!(phase = %id, "phase start");
        let execution = phases::execute(phases::PhaseExecution {
            id,
            platform,
            profile: &profile,
            options,
            artifact_dir: &artifact_dir,
        });
        if let Some(found) = execution.violations {
            violations = found;
        }
        if let Some(handle) = execution.cleanup {
            cleanup_stack.push(handle);
        }
        tracing::debug!(
            phase = %id,
            success = execution.result.success,
            class = %execution.result.failure_class,
            "phase done"
        );
        order.push(id);
        outcomes.insert(
            id,
            PhaseOutcome::Executed {
                result: execution.result,
            },
        );
    }

    // Cleanup obligations drain LIFO before the record freezes, cancelled
    // or not.
    while let Some(handle) = cleanup_stack.pop() {
        let (_, observations) = handle.run(platform);
        run_observations.extend(observations);
    }

    let phases: Vec<PhaseRecord> = order
        .iter()
        .map(|id| PhaseRecord {
            id: *id,
            outcome: outcomes
                .get(id)
                .cloned()
                .expect("every scheduled phase has an outcome"),
        })
        .collect();

    let requirement_snapshot = enriched_snapshot(
        platform,
        &profile,
        &phases,
        &mut run_observations,
        started_at_epoch_ms,
    );

    let verdict = if phases.iter().any(|record| record.outcome.failed()) {
        Verdict::Failed
    } else {
        Verdict::Passed
    };
    let completed_at_epoch_ms = platform.now_epoch_ms();
    tracing::info!(scenario = %profile.name, verdict = ?verdict, "run complete");

    Ok(RunRecord {
        schema_version: RUN_RECORD_SCHEMA_VERSION,
        profile,
        phases,
        violations,
        requirement_snapshot,
        run_observations,
        started_at_epoch_ms,
        completed_at_epoch_ms,
        verdict,
    })
}

/// Topological order over the phase table with lexicographic tie-breaks.
pub fn schedule() -> Vec<PhaseId> {
    let mut remaining: Vec<&PhaseSpec> = PHASE_TABLE.iter().collect();
    let mut done: Vec<PhaseId> = Vec::new();
    while !remaining.is_empty() {
        let mut ready: Vec<PhaseId> = remaining
            .iter()
            .filter(|spec| {
                spec.preconditions
                    .iter()
                    .all(|pre| done.contains(pre))
            })
            .map(|spec| spec.id)
            .collect();
        // The table is a DAG; an empty ready set would mean a cycle.
        debug_assert!(!ready.is_empty(), "phase table must be acyclic");
        if ready.is_empty() {
            break;
        }
        ready.sort_by_key(|id| id.as_str());
        let next = ready[0];
        remaining.retain(|spec| spec.id != next);
        done.push(next);
    }
    done
}

/// A precondition blocks when it failed or was itself blocked.
fn blocked(outcomes: &BTreeMap<PhaseId, PhaseOutcome>, id: PhaseId) -> bool {
    match outcomes.get(&id) {
        Some(outcome) => outcome.failed() || matches!(outcome, PhaseOutcome::SkippedBlocked { .. }),
        None => false,
    }
}

fn prepare_artifact_dir(
    platform: &dyn Platform,
    profile: &ScenarioProfile,
    started_at_epoch_ms: u128,
    options: &RunOptions,
) -> Result<PathBuf, RunError> {
    let root = match &options.artifact_root {
        Some(root) => root.clone(),
        None => dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("test-genie/runs"),
    };
    let dir = root.join(format!("{}-{started_at_epoch_ms}", profile.name));
    platform
        .mkdir_all(&dir)
        .map_err(|err| RunError::Artifacts(err.to_string()))?;
    Ok(dir)
}

fn enriched_snapshot(
    platform: &dyn Platform,
    profile: &ScenarioProfile,
    phases: &[PhaseRecord],
    run_observations: &mut Vec<Observation>,
    generated_at_epoch_ms: u128,
) -> Snapshot {
    let mut index = match load_module_index(platform, &profile.path) {
        Ok(index) => index,
        Err(err) => {
            run_observations.push(Observation {
                severity: crate::outcome::ObservationSeverity::Warn,
                message: format!("requirement modules unavailable: {err:#}"),
                evidence: None,
            });
            ModuleIndex::default()
        }
    };

    let evidence: Vec<PhaseEvidence<'_>> = phases
        .iter()
        .filter_map(|record| match &record.outcome {
            PhaseOutcome::Executed { result } => Some(PhaseEvidence {
                phase_id: record.id.as_str(),
                success: result.success,
                observations: &result.observations,
            }),
            _ => None,
        })
        .collect();
    enrich_from_phases(&mut index, &evidence);

    build_snapshot(
        &profile.name,
        Some(&profile.path),
        &index,
        generated_at_epoch_ms,
    )
}

/// Map a phase failure class onto the record-level early-exit contract.
pub fn phase_failed_with(record: &RunRecord, id: PhaseId, class: FailureClass) -> bool {
    matches!(
        record.phase(id),
        Some(PhaseOutcome::Executed { result }) if result.failure_class == class
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_a_topological_order() {
        let order = schedule();
        assert_eq!(order.len(), PHASE_TABLE.len());
        for spec in PHASE_TABLE {
            let own = order.iter().position(|id| *id == spec.id).expect("scheduled");
            for pre in spec.preconditions {
                let pre_pos = order.iter().position(|id| id == pre).expect("scheduled");
                assert!(pre_pos < own, "{pre} must precede {}", spec.id);
            }
        }
    }

    #[test]
    fn schedule_tie_breaks_lexicographically() {
        let order: Vec<&str> = schedule().iter().map(|id| id.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "existence",
                "audit",
                "commands",
                "runtime",
                "integration",
                "ui_smoke",
                "unit:go",
                "unit:node",
                "unit:python",
            ]
        );
    }

    #[test]
    fn failed_precondition_blocks() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            PhaseId::Existence,
            PhaseOutcome::Executed {
                result: PhaseResult::fail(FailureClass::Misconfiguration, "missing"),
            },
        );
        assert!(blocked(&outcomes, PhaseId::Existence));
    }

    #[test]
    fn blocked_precondition_propagates() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            PhaseId::Commands,
            PhaseOutcome::SkippedBlocked {
                blocked_on: PhaseId::Existence,
            },
        );
        assert!(blocked(&outcomes, PhaseId::Commands));
    }

    #[test]
    fn skipped_not_applicable_does_not_block() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(PhaseId::UnitGo, PhaseOutcome::SkippedNotApplicable);
        assert!(!blocked(&outcomes, PhaseId::UnitGo));
        assert!(!blocked(&outcomes, PhaseId::Runtime));
    }

    #[test]
    fn phase_ids_serialize_to_stable_strings() {
        let json = serde_json::to_string(&PhaseId::UnitGo).expect("serialize");
        assert_eq!(json, "\"unit:go\"");
        let back: PhaseId = serde_json::from_str("\"ui_smoke\"").expect("parse");
        assert_eq!(back, PhaseId::UiSmoke);
    }
}
