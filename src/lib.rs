//! test-genie: a scenario build/test harness core.
//!
//! The library walks a scenario directory, classifies what it contains,
//! runs the applicable validation phases in a deterministic order, audits
//! the tree against the standards catalog, and emits a frozen run record
//! with a requirement-coverage snapshot. The CLI in `src/main.rs` is a
//! thin driver over the three entry points below; transports and run
//! history live outside this crate behind the [`store::Store`] interface.

use std::path::{Path, PathBuf};

use anyhow::Result;

pub mod audit;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod outcome;
pub mod platform;
pub mod requirements;
pub mod runners;
pub mod seeds;
pub mod snapshot;
pub mod store;
pub mod ui_smoke;
pub mod util;

pub use engine::{run_scenario, RunError, RunOptions, RunRecord, Verdict};
pub use platform::{CancelToken, HostPlatform, Platform};

use audit::{FixOptions, FixReport, RuleSeverity, ViolationSet};
use classify::ScenarioProfile;
use config::ConfigError;

/// Options for the standalone auditor entry point.
#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub config_override: Option<PathBuf>,
    /// Apply generated patches when their pre-image still matches.
    pub auto_apply: bool,
    /// Return full patch bodies, not only fix intents.
    pub include_patches: bool,
}

/// Auditor output: violations plus whatever the fixer did.
#[derive(Debug, Clone)]
pub struct AuditOutput {
    pub violations: ViolationSet,
    pub fixes: FixReport,
}

impl AuditOutput {
    pub fn has_blocking(&self, floor: RuleSeverity) -> bool {
        self.violations.at_or_above(floor).next().is_some()
    }
}

/// Run every applicable phase for the scenario at `scenario_path`.
pub fn run(scenario_path: &Path, options: &RunOptions) -> Result<RunRecord, RunError> {
    run_scenario(&HostPlatform::new(), scenario_path, options)
}

/// Audit the scenario without executing any phases.
pub fn audit(scenario_path: &Path, options: &AuditOptions) -> Result<AuditOutput> {
    let platform = HostPlatform::new();
    let profile = classify::classify(&platform, scenario_path, options.config_override.as_deref())?;
    let catalog = audit::default_catalog();
    let violations = audit::scan(&platform, &profile, &catalog)?;
    let fixes = audit::fix::plan_fixes(
        &platform,
        &catalog,
        &violations,
        FixOptions {
            auto_apply: options.auto_apply,
            include_patches: options.include_patches,
        },
    )?;
    Ok(AuditOutput { violations, fixes })
}

/// Classify the scenario without running anything.
pub fn classify(scenario_path: &Path) -> Result<ScenarioProfile, ConfigError> {
    classify::classify(&HostPlatform::new(), scenario_path, None)
}
