//! Snapshot builder: the deterministic, machine-consumable report.
//!
//! For fixed inputs the serialized snapshot is byte-identical across runs:
//! every collection is sorted by a documented key before serialization and
//! the timestamp is an explicit input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::requirements::{DeclaredStatus, LiveStatus, ModuleIndex, Summary};
use crate::util::display_path;

/// Mandatory schema version stamped on every snapshot.
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot {
    pub schema_version: String,
    pub generated_at_epoch_ms: u128,
    pub scenario: String,
    pub summary: SnapshotSummary,
    /// Requirement groups sharing a PRD reference, sorted by reference.
    pub operational_targets: Vec<OperationalTarget>,
    /// Per-module counts, sorted by module file path.
    pub modules: Vec<ModuleSnapshot>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotSummary {
    pub total: usize,
    pub complete: usize,
    /// `complete / total * 100`; 0.0 when there are no requirements.
    pub completion_rate: f64,
    /// `passed / (passed + failed) * 100`; 0.0 without validation evidence.
    pub pass_rate: f64,
    pub by_declared_status: BTreeMap<String, usize>,
    pub by_live_status: BTreeMap<String, usize>,
    pub validation_total: usize,
    pub validation_passed: usize,
    pub validation_failed: usize,
    pub criticality_gap: usize,
}

/// Status of a PRD-level grouping of requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperationalTarget {
    pub prd_ref: String,
    pub status: TargetStatus,
    pub total: usize,
    pub complete: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleSnapshot {
    pub name: String,
    pub file: String,
    pub total: usize,
    pub complete: usize,
    pub completion_rate: f64,
    pub pass_rate: f64,
}

/// Build the snapshot for one enriched module index.
pub fn build_snapshot(
    scenario_name: &str,
    scenario_root: Option<&std::path::Path>,
    index: &ModuleIndex,
    generated_at_epoch_ms: u128,
) -> Snapshot {
    let summary = Summary::compute(index);
    let complete = index
        .requirements()
        .filter(|requirement| requirement.declared_status == DeclaredStatus::Complete)
        .count();

    let mut targets: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for requirement in index.requirements() {
        let Some(prd_ref) = &requirement.prd_ref else {
            continue;
        };
        let entry = targets.entry(prd_ref.clone()).or_insert((0, 0));
        entry.0 += 1;
        if requirement.declared_status == DeclaredStatus::Complete {
            entry.1 += 1;
        }
    }
    let operational_targets = targets
        .into_iter()
        .map(|(prd_ref, (total, complete))| OperationalTarget {
            prd_ref,
            status: target_status(total, complete),
            total,
            complete,
        })
        .collect();

    let mut modules: Vec<ModuleSnapshot> = index
        .modules
        .iter()
        .map(|module| {
            let total = module.requirements.len();
            let complete = module
                .requirements
                .iter()
                .filter(|requirement| requirement.declared_status == DeclaredStatus::Complete)
                .count();
            let passed = module
                .requirements
                .iter()
                .filter(|requirement| requirement.live_status == LiveStatus::Passed)
                .count();
            let failed = module
                .requirements
                .iter()
                .filter(|requirement| requirement.live_status == LiveStatus::Failed)
                .count();
            ModuleSnapshot {
                name: module.effective_name.clone(),
                file: display_path(&module.file_path, scenario_root),
                total,
                complete,
                completion_rate: percentage(complete, total),
                pass_rate: percentage(passed, passed + failed),
            }
        })
        .collect();
    modules.sort_by(|a, b| a.file.cmp(&b.file));

    Snapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
        generated_at_epoch_ms,
        scenario: scenario_name.to_string(),
        summary: SnapshotSummary {
            total: summary.total,
            complete,
            completion_rate: percentage(complete, summary.total),
            pass_rate: percentage(
                summary.validation_stats.passed,
                summary.validation_stats.total,
            ),
            by_declared_status: summary.by_declared_status,
            by_live_status: summary.by_live_status,
            validation_total: summary.validation_stats.total,
            validation_passed: summary.validation_stats.passed,
            validation_failed: summary.validation_stats.failed,
            criticality_gap: summary.criticality_gap,
        },
        operational_targets,
        modules,
    }
}

fn target_status(total: usize, complete: usize) -> TargetStatus {
    if total > 0 && complete == total {
        TargetStatus::Complete
    } else if complete > 0 {
        TargetStatus::InProgress
    } else {
        TargetStatus::Pending
    }
}

fn percentage(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}
