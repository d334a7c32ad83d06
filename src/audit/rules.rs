//! Rule catalog: the data-driven contract every audit rule implements.

use std::path::Path;

use crate::classify::ScenarioProfile;

use super::fix::Patch;
use super::{RuleCategory, RuleSeverity, Violation, STANDARD_TAG};

pub mod config;
pub mod naming;
pub mod security;
pub mod ui_tunnel;

/// Contract for one audit rule.
///
/// `applies` is a cheap path-level filter; `check` only runs on files that
/// pass it. Rules are stateless and the catalog is read-only after
/// construction.
pub trait Rule: Send + Sync {
    fn id(&self) -> &'static str;
    fn category(&self) -> RuleCategory;
    fn severity(&self) -> RuleSeverity;

    /// Rule family version tag stamped on violations.
    fn standard(&self) -> &'static str {
        STANDARD_TAG
    }

    /// Path-level filter: extension, basename heuristics, location.
    fn applies(&self, path: &Path, profile: &ScenarioProfile) -> bool;

    /// Scan file content; return zero or more violations.
    fn check(&self, content: &[u8], path: &Path) -> Vec<Violation>;

    /// Optional fix generator. The default is "no fix available".
    fn fix(&self, _violation: &Violation, _content: &[u8]) -> Option<Patch> {
        None
    }
}

/// In-memory registry of rules, immutable once built.
pub struct RuleCatalog {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleCatalog {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.rules
    }

    pub fn rule_by_id(&self, id: &str) -> Option<&dyn Rule> {
        self.rules
            .iter()
            .find(|rule| rule.id() == id)
            .map(AsRef::as_ref)
    }
}

/// The built-in rule set: config, UI tunnel, naming, and security families.
pub fn default_catalog() -> RuleCatalog {
    RuleCatalog::new(vec![
        Box::new(config::TestingJsonParses),
        Box::new(config::PackageTestScript),
        Box::new(config::RequirementsIndexShape),
        Box::new(ui_tunnel::UiSecureTunnel),
        Box::new(naming::SeedScriptNames),
        Box::new(naming::NoWhitespaceInNames),
        Box::new(security::HardcodedSecret),
        Box::new(security::CurlPipeShell),
    ])
}

/// Shared helper: build a violation for `rule` at a 1-based line.
pub(crate) fn violation_at(
    rule: &dyn Rule,
    path: &Path,
    line: u32,
    title: impl Into<String>,
    description: impl Into<String>,
    recommendation: impl Into<String>,
) -> Violation {
    Violation {
        rule_id: rule.id().to_string(),
        category: rule.category(),
        severity: rule.severity(),
        title: title.into(),
        description: description.into(),
        file_path: path.to_path_buf(),
        line,
        recommendation: recommendation.into(),
        standard: rule.standard().to_string(),
    }
}
