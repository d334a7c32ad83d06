//! Requirement index: typed view over a scenario's requirement modules.
//!
//! Modules live under `<scenario>/requirements/` as markdown or JSON files;
//! `index.json` restricts and orders the module list when present. After a
//! run, enrichment assigns each requirement a live status from the phase
//! observations that referenced it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod enrich;
pub mod parse;

pub use enrich::enrich_from_phases;
pub use parse::load_module_index;

/// Author-declared requirement lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredStatus {
    Pending,
    InProgress,
    Planned,
    Complete,
}

impl DeclaredStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DeclaredStatus::Pending => "pending",
            DeclaredStatus::InProgress => "in_progress",
            DeclaredStatus::Planned => "planned",
            DeclaredStatus::Complete => "complete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(DeclaredStatus::Pending),
            "in_progress" => Some(DeclaredStatus::InProgress),
            "planned" => Some(DeclaredStatus::Planned),
            "complete" => Some(DeclaredStatus::Complete),
            _ => None,
        }
    }
}

/// Business criticality, ordered least to most critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

impl Criticality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "low" => Some(Criticality::Low),
            "medium" => Some(Criticality::Medium),
            "high" => Some(Criticality::High),
            "critical" => Some(Criticality::Critical),
            _ => None,
        }
    }
}

/// Validation-derived status, assigned during enrichment.
///
/// Transitions are monotone within a run: `Failed` is absorbing and
/// `Passed` only ever replaces `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Unknown,
    Passed,
    Failed,
}

impl LiveStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LiveStatus::Unknown => "unknown",
            LiveStatus::Passed => "passed",
            LiveStatus::Failed => "failed",
        }
    }

    /// Monotone merge of new evidence into the current status.
    pub fn absorb(self, evidence: LiveStatus) -> LiveStatus {
        match (self, evidence) {
            (LiveStatus::Failed, _) | (_, LiveStatus::Failed) => LiveStatus::Failed,
            (LiveStatus::Passed, _) | (_, LiveStatus::Passed) => LiveStatus::Passed,
            _ => LiveStatus::Unknown,
        }
    }
}

/// One parsed requirement.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_ref: Option<String>,
    pub criticality: Criticality,
    pub declared_status: DeclaredStatus,
    pub live_status: LiveStatus,
}

/// One requirement module file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequirementModule {
    pub file_path: PathBuf,
    pub effective_name: String,
    pub requirements: Vec<Requirement>,
}

/// All modules of one scenario, in index order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModuleIndex {
    pub modules: Vec<RequirementModule>,
}

impl ModuleIndex {
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.modules
            .iter()
            .flat_map(|module| module.requirements.iter())
    }

    pub fn total(&self) -> usize {
        self.requirements().count()
    }
}

/// Counts of validation evidence across the index.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct ValidationStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Aggregate statistics across all modules.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Summary {
    pub total: usize,
    pub by_declared_status: BTreeMap<String, usize>,
    pub by_live_status: BTreeMap<String, usize>,
    pub validation_stats: ValidationStats,
    /// High/critical requirements not yet declared complete.
    pub criticality_gap: usize,
}

impl Summary {
    pub fn compute(index: &ModuleIndex) -> Self {
        let mut summary = Summary::default();
        for requirement in index.requirements() {
            summary.total += 1;
            *summary
                .by_declared_status
                .entry(requirement.declared_status.label().to_string())
                .or_insert(0) += 1;
            *summary
                .by_live_status
                .entry(requirement.live_status.label().to_string())
                .or_insert(0) += 1;
            match requirement.live_status {
                LiveStatus::Passed => {
                    summary.validation_stats.total += 1;
                    summary.validation_stats.passed += 1;
                }
                LiveStatus::Failed => {
                    summary.validation_stats.total += 1;
                    summary.validation_stats.failed += 1;
                }
                LiveStatus::Unknown => {}
            }
            if requirement.criticality >= Criticality::High
                && requirement.declared_status != DeclaredStatus::Complete
            {
                summary.criticality_gap += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(
        id: &str,
        declared: DeclaredStatus,
        live: LiveStatus,
        criticality: Criticality,
    ) -> Requirement {
        Requirement {
            id: id.to_string(),
            title: id.to_string(),
            prd_ref: None,
            criticality,
            declared_status: declared,
            live_status: live,
        }
    }

    #[test]
    fn live_status_failed_is_absorbing() {
        let mut status = LiveStatus::Unknown;
        status = status.absorb(LiveStatus::Passed);
        assert_eq!(status, LiveStatus::Passed);
        status = status.absorb(LiveStatus::Failed);
        assert_eq!(status, LiveStatus::Failed);
        status = status.absorb(LiveStatus::Passed);
        assert_eq!(status, LiveStatus::Failed);
        status = status.absorb(LiveStatus::Unknown);
        assert_eq!(status, LiveStatus::Failed);
    }

    #[test]
    fn passed_only_replaces_unknown() {
        assert_eq!(
            LiveStatus::Unknown.absorb(LiveStatus::Passed),
            LiveStatus::Passed
        );
        assert_eq!(
            LiveStatus::Passed.absorb(LiveStatus::Unknown),
            LiveStatus::Passed
        );
    }

    #[test]
    fn summary_counts_statuses_and_gap() {
        let index = ModuleIndex {
            modules: vec![RequirementModule {
                file_path: PathBuf::from("core.md"),
                effective_name: "core".to_string(),
                requirements: vec![
                    requirement(
                        "REQ-1",
                        DeclaredStatus::Complete,
                        LiveStatus::Passed,
                        Criticality::High,
                    ),
                    requirement(
                        "REQ-2",
                        DeclaredStatus::Pending,
                        LiveStatus::Failed,
                        Criticality::Critical,
                    ),
                    requirement(
                        "REQ-3",
                        DeclaredStatus::Planned,
                        LiveStatus::Unknown,
                        Criticality::Low,
                    ),
                ],
            }],
        };
        let summary = Summary::compute(&index);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_declared_status.get("complete"), Some(&1));
        assert_eq!(summary.by_live_status.get("failed"), Some(&1));
        assert_eq!(summary.validation_stats.total, 2);
        assert_eq!(summary.validation_stats.passed, 1);
        assert_eq!(summary.validation_stats.failed, 1);
        assert_eq!(summary.criticality_gap, 1);
    }
}
