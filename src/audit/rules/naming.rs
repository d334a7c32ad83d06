//! Naming rule family: predictable file names inside scenario trees.

use std::path::Path;

use crate::audit::{RuleCategory, RuleSeverity, Violation};
use crate::classify::{ScenarioProfile, SEEDS_DIR_REL};

use super::{violation_at, Rule};

const SEED_SCRIPT_NAMES: &[&str] = &["apply", "apply.sh", "cleanup", "cleanup.sh", "README.md"];

/// Seeds playbook directories may only contain apply/cleanup entrypoints.
pub struct SeedScriptNames;

impl Rule for SeedScriptNames {
    fn id(&self) -> &'static str {
        "naming.seed-scripts"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Naming
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Medium
    }

    fn applies(&self, path: &Path, profile: &ScenarioProfile) -> bool {
        path.parent()
            .is_some_and(|parent| parent == profile.path.join(SEEDS_DIR_REL))
    }

    fn check(&self, _content: &[u8], path: &Path) -> Vec<Violation> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if SEED_SCRIPT_NAMES.contains(&name.as_str()) {
            return Vec::new();
        }
        vec![violation_at(
            self,
            path,
            0,
            "unexpected file in seeds playbook",
            format!("seeds directory holds {name:?}; only apply/cleanup entrypoints belong here"),
            "move auxiliary files out of test/playbooks/__seeds/",
        )]
    }
}

/// File names with whitespace break downstream shell plumbing.
pub struct NoWhitespaceInNames;

impl Rule for NoWhitespaceInNames {
    fn id(&self) -> &'static str {
        "naming.no-whitespace"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Naming
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Low
    }

    fn applies(&self, path: &Path, _profile: &ScenarioProfile) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().contains(char::is_whitespace))
            .unwrap_or(false)
    }

    fn check(&self, _content: &[u8], path: &Path) -> Vec<Violation> {
        vec![violation_at(
            self,
            path,
            0,
            "file name contains whitespace",
            "whitespace in file names breaks script interpolation",
            "rename the file using hyphens or underscores",
        )]
    }
}
