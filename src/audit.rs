//! Standards auditor: data-driven scanning of a scenario's files.
//!
//! The auditor walks the scenario tree, matches each file against the rule
//! catalog's path filters, and collects structured violations. Violations
//! are deduplicated on `(rule_id, file_path, line, description)` and sorted
//! by `(severity desc, file_path asc, line asc, rule_id asc)` so audit
//! output is stable across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::classify::ScenarioProfile;
use crate::platform::Platform;

pub mod fix;
pub mod rules;

pub use fix::{FixEntry, FixOptions, FixReport, Patch, PatchStatus};
pub use rules::{default_catalog, Rule, RuleCatalog};

/// Version tag stamped on every violation from the built-in rule families.
pub const STANDARD_TAG: &str = "vrooli-standards/1";

/// Rule grouping used for reporting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Config,
    Ui,
    Naming,
    Security,
    Standards,
}

/// Violation severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RuleSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RuleSeverity::Low => "low",
            RuleSeverity::Medium => "medium",
            RuleSeverity::High => "high",
            RuleSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for RuleSeverity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "low" => Ok(RuleSeverity::Low),
            "medium" => Ok(RuleSeverity::Medium),
            "high" => Ok(RuleSeverity::High),
            "critical" => Ok(RuleSeverity::Critical),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

/// A single auditor finding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Violation {
    pub rule_id: String,
    pub category: RuleCategory,
    pub severity: RuleSeverity,
    pub title: String,
    pub description: String,
    pub file_path: PathBuf,
    /// 1-based; 0 when the location is unknown.
    pub line: u32,
    pub recommendation: String,
    pub standard: String,
}

impl Violation {
    fn dedup_key(&self) -> (String, PathBuf, u32, String) {
        (
            self.rule_id.clone(),
            self.file_path.clone(),
            self.line,
            self.description.clone(),
        )
    }

    fn sort_key(&self) -> impl Ord + '_ {
        (
            std::cmp::Reverse(self.severity),
            &self.file_path,
            self.line,
            &self.rule_id,
        )
    }
}

/// The auditor's aggregate output for one scenario.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ViolationSet {
    pub violations: Vec<Violation>,
}

impl ViolationSet {
    /// Build from raw findings: dedup, then stable sort.
    pub fn from_raw(raw: Vec<Violation>) -> Self {
        let mut seen = BTreeSet::new();
        let mut violations: Vec<Violation> = raw
            .into_iter()
            .filter(|violation| seen.insert(violation.dedup_key()))
            .collect();
        violations.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Self { violations }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn max_severity(&self) -> Option<RuleSeverity> {
        self.violations
            .iter()
            .map(|violation| violation.severity)
            .max()
    }

    /// Findings at or above the given floor.
    pub fn at_or_above(&self, floor: RuleSeverity) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |violation| violation.severity >= floor)
    }
}

/// Walk the scenario and run every applicable `(file, rule)` pair.
pub fn scan(
    platform: &dyn Platform,
    profile: &ScenarioProfile,
    catalog: &RuleCatalog,
) -> Result<ViolationSet> {
    let files = platform
        .walk(&profile.path)
        .with_context(|| format!("walk scenario {}", profile.path.display()))?;

    let mut raw = Vec::new();
    for file in &files {
        let applicable: Vec<&dyn Rule> = catalog
            .rules()
            .iter()
            .map(|rule| rule.as_ref())
            .filter(|rule| rule.applies(file, profile))
            .collect();
        if applicable.is_empty() {
            continue;
        }
        let content = match platform.read_file(file) {
            Ok(content) => content,
            // A file that vanished mid-walk is not a finding.
            Err(_) => continue,
        };
        for rule in applicable {
            raw.extend(rule.check(&content, file));
        }
    }
    tracing::debug!(
        scenario = %profile.name,
        files = files.len(),
        findings = raw.len(),
        "audit scan complete"
    );
    Ok(ViolationSet::from_raw(raw))
}

/// Relative display path for a violation inside its scenario.
pub fn relative_to_scenario(violation: &Violation, profile: &ScenarioProfile) -> String {
    violation
        .file_path
        .strip_prefix(&profile.path)
        .unwrap_or(&violation.file_path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(rule_id: &str, file: &str, line: u32, severity: RuleSeverity) -> Violation {
        Violation {
            rule_id: rule_id.to_string(),
            category: RuleCategory::Security,
            severity,
            title: "t".to_string(),
            description: format!("{rule_id} at {line}"),
            file_path: PathBuf::from(file),
            line,
            recommendation: String::new(),
            standard: STANDARD_TAG.to_string(),
        }
    }

    #[test]
    fn dedup_removes_exact_tuples_only() {
        let a = violation("r1", "a.js", 3, RuleSeverity::High);
        let duplicate = a.clone();
        let different_line = violation("r1", "a.js", 4, RuleSeverity::High);
        let set = ViolationSet::from_raw(vec![a, duplicate, different_line]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn sort_is_severity_desc_then_path_line_rule() {
        let set = ViolationSet::from_raw(vec![
            violation("r2", "b.js", 1, RuleSeverity::Low),
            violation("r1", "a.js", 9, RuleSeverity::Critical),
            violation("r1", "a.js", 2, RuleSeverity::Critical),
            violation("r3", "a.js", 2, RuleSeverity::High),
        ]);
        let keys: Vec<_> = set
            .violations
            .iter()
            .map(|violation| {
                (
                    violation.severity,
                    violation.file_path.clone(),
                    violation.line,
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (RuleSeverity::Critical, PathBuf::from("a.js"), 2),
                (RuleSeverity::Critical, PathBuf::from("a.js"), 9),
                (RuleSeverity::High, PathBuf::from("a.js"), 2),
                (RuleSeverity::Low, PathBuf::from("b.js"), 1),
            ]
        );
    }

    #[test]
    fn severity_floor_filters() {
        let set = ViolationSet::from_raw(vec![
            violation("r1", "a.js", 1, RuleSeverity::Low),
            violation("r2", "a.js", 2, RuleSeverity::High),
            violation("r3", "a.js", 3, RuleSeverity::Critical),
        ]);
        assert_eq!(set.at_or_above(RuleSeverity::High).count(), 2);
        assert_eq!(set.max_severity(), Some(RuleSeverity::Critical));
    }

    #[test]
    fn severity_parses_from_cli_strings() {
        assert_eq!("high".parse::<RuleSeverity>().ok(), Some(RuleSeverity::High));
        assert!("loud".parse::<RuleSeverity>().is_err());
    }
}
