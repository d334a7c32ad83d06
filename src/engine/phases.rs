//! Concrete phase implementations dispatched by the engine.

use std::path::Path;
use std::time::Duration;

use crate::audit::{default_catalog, relative_to_scenario, scan, ViolationSet};
use crate::classify::{Language, ScenarioProfile};
use crate::outcome::{FailureClass, ObservationSeverity, PhaseResult};
use crate::platform::{discard_sink, Platform, SpawnSpec, WaitOutcome};
use crate::runners::{all_runners, RunnerContext};
use crate::seeds::{run_playbooks, CleanupHandle, SeedsManager};
use crate::ui_smoke::{run_ui_smoke, HttpHandshake, UiSmokeArgs};

use super::{PhaseId, RunOptions};

/// Budget for version-probe subprocesses in the runtime phase.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a phase applies to this profile at all.
pub fn applicable(id: PhaseId, profile: &ScenarioProfile) -> bool {
    match id {
        PhaseId::Existence | PhaseId::Commands | PhaseId::Runtime | PhaseId::Audit => true,
        PhaseId::UnitGo => profile.has_language(Language::Go),
        PhaseId::UnitNode => profile.has_language(Language::Node),
        PhaseId::UnitPython => profile.has_language(Language::Python),
        PhaseId::UiSmoke => profile.has_ui && profile.ui_smoke.enabled,
        PhaseId::Integration => profile.has_seeds,
    }
}

pub struct PhaseExecution<'a> {
    pub id: PhaseId,
    pub platform: &'a dyn Platform,
    pub profile: &'a ScenarioProfile,
    pub options: &'a RunOptions,
    pub artifact_dir: &'a Path,
}

pub struct ExecutionOutput {
    pub result: PhaseResult,
    /// Present only for the audit phase.
    pub violations: Option<ViolationSet>,
    /// Present only when integration applied seeds successfully.
    pub cleanup: Option<CleanupHandle>,
}

impl ExecutionOutput {
    fn plain(result: PhaseResult) -> Self {
        Self {
            result,
            violations: None,
            cleanup: None,
        }
    }
}

pub fn execute(exec: PhaseExecution<'_>) -> ExecutionOutput {
    match exec.id {
        PhaseId::Existence => ExecutionOutput::plain(run_existence(&exec)),
        PhaseId::Commands => ExecutionOutput::plain(run_commands(&exec)),
        PhaseId::Runtime => ExecutionOutput::plain(run_runtime(&exec)),
        PhaseId::UnitGo => ExecutionOutput::plain(run_unit(&exec, "go")),
        PhaseId::UnitNode => ExecutionOutput::plain(run_unit(&exec, "node")),
        PhaseId::UnitPython => ExecutionOutput::plain(run_unit(&exec, "python")),
        PhaseId::Audit => run_audit(&exec),
        PhaseId::UiSmoke => ExecutionOutput::plain(run_ui(&exec)),
        PhaseId::Integration => run_integration(&exec),
    }
}

/// Existence: required directories and files from the profile, plus the
/// replay of config unknown-key warnings.
fn run_existence(exec: &PhaseExecution<'_>) -> PhaseResult {
    let mut observations = exec.profile.config_warnings.clone();
    let mut missing = Vec::new();

    for requirement in &exec.profile.existence_requirements {
        let path = exec.profile.path.join(&requirement.rel_path);
        let present = match requirement.kind {
            crate::classify::PathKind::Dir => exec.platform.is_dir(&path),
            crate::classify::PathKind::File => exec.platform.is_file(&path),
        };
        if present {
            observations.push(crate::outcome::Observation {
                severity: ObservationSeverity::Success,
                message: format!("{} present", requirement.rel_path),
                evidence: None,
            });
        } else {
            missing.push(requirement.rel_path.clone());
        }
    }

    let mut result = if missing.is_empty() {
        PhaseResult::ok()
    } else {
        PhaseResult::fail(
            FailureClass::Misconfiguration,
            format!("missing required paths: {}", missing.join(", ")),
        )
        .with_remediation("create the listed paths inside the scenario")
    };
    let mut all = observations;
    all.append(&mut result.observations);
    result.observations = all;
    for rel in &missing {
        result.observe(ObservationSeverity::Error, format!("{rel} missing"));
    }
    result
}

/// Commands: report availability of every command later phases will need.
/// Availability problems are warnings here; the owning phase classifies
/// the failure.
fn run_commands(exec: &PhaseExecution<'_>) -> PhaseResult {
    let mut result = PhaseResult::ok();
    for command in required_commands(exec) {
        match exec.platform.look_path(&command) {
            Some(path) => result.observe(
                ObservationSeverity::Info,
                format!("{command}: {}", path.display()),
            ),
            None => result.observe(
                ObservationSeverity::Warn,
                format!("{command}: not found on PATH"),
            ),
        }
    }
    result
}

fn required_commands(exec: &PhaseExecution<'_>) -> Vec<String> {
    let mut commands = vec!["sh".to_string()];
    if exec.profile.has_language(Language::Go) {
        commands.push("go".to_string());
    }
    if exec.profile.has_language(Language::Node) {
        commands.push("node".to_string());
        commands.push(exec.options.node_package_manager.clone());
    }
    if exec.profile.has_language(Language::Python) {
        commands.push("python3".to_string());
        if let Ok(tokens) = shell_words::split(&exec.options.python_test_driver) {
            if let Some(driver) = tokens.first() {
                if !commands.contains(driver) {
                    commands.push(driver.clone());
                }
            }
        }
    }
    commands
}

/// Runtime: capture toolchain versions for the detected languages.
fn run_runtime(exec: &PhaseExecution<'_>) -> PhaseResult {
    let mut result = PhaseResult::ok();
    let probes: &[(Language, &str, &[&str])] = &[
        (Language::Go, "go", &["version"]),
        (Language::Node, "node", &["--version"]),
        (Language::Python, "python3", &["--version"]),
    ];
    for (language, program, args) in probes {
        if !exec.profile.has_language(*language) {
            continue;
        }
        match version_line(exec.platform, program, args) {
            Some(version) => result.observe(ObservationSeverity::Info, version),
            None => result.observe(
                ObservationSeverity::Warn,
                format!("{program}: runtime version unavailable"),
            ),
        }
    }
    if result.observations.is_empty() {
        result.observe(ObservationSeverity::Info, "no language runtimes detected");
    }
    result
}

fn version_line(platform: &dyn Platform, program: &str, args: &[&str]) -> Option<String> {
    let program_path = platform.look_path(program)?;
    let capture = crate::runners::CaptureBuffer::default();
    let spec = SpawnSpec::new(program_path)
        .args(args.iter().map(|arg| arg.to_string()))
        .stdout(Box::new(CaptureWriter(capture.clone())))
        .stderr(discard_sink());
    let mut handle = platform.spawn(spec).ok()?;
    let outcome = handle.wait(
        &crate::platform::CancelToken::new(),
        Some(VERSION_PROBE_TIMEOUT),
    );
    if !matches!(outcome, WaitOutcome::Exited { .. }) {
        return None;
    }
    capture
        .text()
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
}

struct CaptureWriter(crate::runners::CaptureBuffer);

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_unit(exec: &PhaseExecution<'_>, name: &str) -> PhaseResult {
    let runners = all_runners();
    let Some(runner) = runners.iter().find(|runner| runner.name() == name) else {
        return PhaseResult::fail(FailureClass::System, format!("no runner named {name:?}"));
    };
    let ctx = RunnerContext {
        platform: exec.platform,
        profile: exec.profile,
        cancel: &exec.options.cancel,
        artifact_dir: exec.artifact_dir,
        unit_timeout: exec.options.unit_timeout,
        node_package_manager: &exec.options.node_package_manager,
        python_test_driver: &exec.options.python_test_driver,
    };
    runner.run(&ctx)
}

fn run_audit(exec: &PhaseExecution<'_>) -> ExecutionOutput {
    let catalog = default_catalog();
    let violations = match scan(exec.platform, exec.profile, &catalog) {
        Ok(violations) => violations,
        Err(err) => {
            return ExecutionOutput::plain(PhaseResult::fail(
                FailureClass::System,
                format!("audit scan failed: {err:#}"),
            ));
        }
    };

    let floor = exec.options.audit_severity_floor;
    let blocking = violations.at_or_above(floor).count();
    let mut result = if blocking == 0 {
        PhaseResult::ok()
    } else {
        PhaseResult::fail(
            FailureClass::RuleViolation,
            format!("{blocking} violation(s) at or above severity {floor}"),
        )
        .with_remediation("resolve the reported standards violations")
    };
    for violation in &violations.violations {
        let severity = if violation.severity >= floor {
            ObservationSeverity::Error
        } else {
            ObservationSeverity::Warn
        };
        result.observe_with_evidence(
            severity,
            format!(
                "[{}] {} ({}:{})",
                violation.rule_id,
                violation.title,
                relative_to_scenario(violation, exec.profile),
                violation.line
            ),
            violation.description.clone(),
        );
    }
    if violations.is_empty() {
        result.observe(ObservationSeverity::Success, "no standards violations");
    }
    ExecutionOutput {
        result,
        violations: Some(violations),
        cleanup: None,
    }
}

fn run_ui(exec: &PhaseExecution<'_>) -> PhaseResult {
    let args = UiSmokeArgs {
        platform: exec.platform,
        profile: exec.profile,
        cancel: &exec.options.cancel,
        artifact_dir: exec.artifact_dir,
        node_package_manager: &exec.options.node_package_manager,
    };
    run_ui_smoke(&args, &HttpHandshake)
}

fn run_integration(exec: &PhaseExecution<'_>) -> ExecutionOutput {
    let app_root = exec
        .options
        .app_root
        .clone()
        .or_else(|| exec.profile.path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| exec.profile.path.clone());
    let manager = SeedsManager::new(
        exec.platform,
        &exec.profile.path,
        &app_root,
        exec.artifact_dir,
    );
    let apply = manager.apply(&exec.options.cancel);
    if apply.cleanup.is_none() {
        // Apply failed: nothing to clean, the failure stands as recorded.
        return ExecutionOutput::plain(apply.result);
    }

    let mut result = run_playbooks(
        exec.platform,
        &exec.profile.path,
        &app_root,
        exec.artifact_dir,
        &exec.options.cancel,
    );
    // Seed application context leads the phase's observation stream.
    let mut observations = apply.result.observations.clone();
    observations.append(&mut result.observations);
    result.observations = observations;
    for (name, path) in &apply.result.artifacts {
        result.artifacts.insert(name.clone(), path.clone());
    }

    ExecutionOutput {
        result,
        violations: None,
        cleanup: apply.cleanup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::platform::HostPlatform;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, body).expect("write");
    }

    #[test]
    fn existence_fails_on_missing_requirements_dir() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let artifacts = tempfile::tempdir().expect("artifacts");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let options = RunOptions::default();
        let result = run_existence(&PhaseExecution {
            id: PhaseId::Existence,
            platform: &platform,
            profile: &profile,
            options: &options,
            artifact_dir: artifacts.path(),
        });
        assert_eq!(result.failure_class, FailureClass::Misconfiguration);
    }

    #[test]
    fn existence_passes_with_requirements_dir() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let artifacts = tempfile::tempdir().expect("artifacts");
        write(root.path(), "requirements/core.md", "- [REQ-1] One\n");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let options = RunOptions::default();
        let result = run_existence(&PhaseExecution {
            id: PhaseId::Existence,
            platform: &platform,
            profile: &profile,
            options: &options,
            artifact_dir: artifacts.path(),
        });
        assert!(result.success);
    }

    #[test]
    fn commands_phase_never_fails() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let artifacts = tempfile::tempdir().expect("artifacts");
        write(root.path(), "package.json", "{}");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let options = RunOptions {
            node_package_manager: "definitely-not-a-pm-xyz".to_string(),
            ..RunOptions::default()
        };
        let result = run_commands(&PhaseExecution {
            id: PhaseId::Commands,
            platform: &platform,
            profile: &profile,
            options: &options,
            artifact_dir: artifacts.path(),
        });
        assert!(result.success);
        assert!(result
            .observations
            .iter()
            .any(|obs| obs.severity == ObservationSeverity::Warn));
    }

    #[test]
    fn applicability_follows_profile() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "api/go.mod", "module demo\n");
        let profile = classify(&platform, root.path(), None).expect("classify");
        assert!(applicable(PhaseId::UnitGo, &profile));
        assert!(!applicable(PhaseId::UnitNode, &profile));
        assert!(!applicable(PhaseId::UiSmoke, &profile));
        assert!(!applicable(PhaseId::Integration, &profile));
        assert!(applicable(PhaseId::Audit, &profile));
    }

    #[test]
    fn ui_smoke_disabled_by_config() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "ui/package.json", "{}");
        write(
            root.path(),
            ".vrooli/testing.json",
            r#"{"structure": {"ui_smoke": {"enabled": false}}}"#,
        );
        let profile = classify(&platform, root.path(), None).expect("classify");
        assert!(profile.has_ui);
        assert!(!applicable(PhaseId::UiSmoke, &profile));
    }
}
