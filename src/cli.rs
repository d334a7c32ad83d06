//! CLI argument parsing for the harness driver.
//!
//! The CLI is intentionally thin: it maps arguments onto the library entry
//! points and library results onto exit codes, without embedding policy.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::audit::RuleSeverity;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "tgen",
    version,
    about = "Scenario build/test harness with phased orchestration and standards audit",
    after_help = "Commands:\n  run <scenario>       Execute every applicable validation phase\n  audit <scenario>     Scan the scenario against the standards catalog\n  classify <scenario>  Report what the scenario contains\n\nExit codes:\n  0  verdict passed / no blocking violations\n  1  verdict failed / blocking violations\n  2  configuration error (bad testing.json, missing scenario dir)\n\nExamples:\n  tgen run ./scenarios/billing --artifact-root /tmp/tg-artifacts\n  tgen audit ./scenarios/billing --fix --include-patches\n  tgen classify ./scenarios/billing --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Audit(AuditArgs),
    Classify(ClassifyArgs),
}

/// Run the full phase suite against one scenario.
#[derive(Parser, Debug)]
#[command(about = "Execute every applicable validation phase for a scenario")]
pub struct RunArgs {
    /// Scenario directory
    pub scenario: PathBuf,

    /// Root directory for per-run artifacts (default: a temp dir)
    #[arg(long, value_name = "DIR")]
    pub artifact_root: Option<PathBuf>,

    /// Override path for .vrooli/testing.json
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Wall-clock budget per unit-test subprocess, in minutes
    #[arg(long, value_name = "MIN", default_value_t = 30)]
    pub timeout_minutes: u64,

    /// Severity at which audit findings fail the run
    #[arg(long, value_name = "SEV", default_value = "high")]
    pub severity_floor: RuleSeverity,

    /// Package manager used for Node phases
    #[arg(long, value_name = "CMD", default_value = "npm")]
    pub package_manager: String,

    /// Test driver command for Python phases
    #[arg(long, value_name = "CMD", default_value = "pytest")]
    pub python_driver: String,

    /// Emit the full run record as JSON
    #[arg(long)]
    pub json: bool,
}

/// Audit a scenario without running its tests.
#[derive(Parser, Debug)]
#[command(about = "Scan a scenario against the standards catalog")]
pub struct AuditArgs {
    /// Scenario directory
    pub scenario: PathBuf,

    /// Override path for .vrooli/testing.json
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Apply generated fixes whose pre-image still matches
    #[arg(long)]
    pub fix: bool,

    /// Include full patch bodies in the report
    #[arg(long)]
    pub include_patches: bool,

    /// Severity at which findings set a failing exit code
    #[arg(long, value_name = "SEV", default_value = "high")]
    pub severity_floor: RuleSeverity,

    /// Emit violations and fixes as JSON
    #[arg(long)]
    pub json: bool,
}

/// Report a scenario's profile.
#[derive(Parser, Debug)]
#[command(about = "Classify a scenario without running anything")]
pub struct ClassifyArgs {
    /// Scenario directory
    pub scenario: PathBuf,

    /// Emit the profile as JSON
    #[arg(long)]
    pub json: bool,
}
