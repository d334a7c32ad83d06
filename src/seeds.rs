//! Seeds manager: apply/cleanup playbook state for integration runs.
//!
//! `apply` hands back a cleanup handle exactly when it succeeds; the engine
//! registers the handle on its run-scoped resource stack and drains it
//! before the run record freezes. Cleanup always runs under a fresh,
//! non-cancellable token so a caller's cancellation cannot abort teardown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::{seeds_apply_path, seeds_cleanup_path};
use crate::outcome::{FailureClass, Observation, ObservationSeverity, PhaseResult};
use crate::platform::{file_sink, CancelToken, Platform, SpawnError, SpawnSpec, WaitOutcome};

/// Exported into every subprocess the seeds manager spawns.
pub const ENV_SCENARIO_DIR: &str = "TEST_GENIE_SCENARIO_DIR";
pub const ENV_APP_ROOT: &str = "TEST_GENIE_APP_ROOT";

/// Wall clock for one seed script.
const SEED_SCRIPT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Lifecycle of one playbook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedState {
    Idle,
    Applying,
    Applied,
    ApplyFailed,
    Cleaning,
    CleanupFailed,
    Done,
}

pub struct SeedsManager<'a> {
    platform: &'a dyn Platform,
    scenario_root: &'a Path,
    app_root: &'a Path,
    artifact_dir: &'a Path,
}

/// Outcome of `apply`: the phase-facing result plus, on success, the
/// cleanup obligation.
pub struct SeedApply {
    pub state: SeedState,
    pub result: PhaseResult,
    pub cleanup: Option<CleanupHandle>,
}

impl<'a> SeedsManager<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        scenario_root: &'a Path,
        app_root: &'a Path,
        artifact_dir: &'a Path,
    ) -> Self {
        Self {
            platform,
            scenario_root,
            app_root,
            artifact_dir,
        }
    }

    /// Run the apply entrypoint. A zero exit yields `Applied` and a cleanup
    /// handle; anything else yields `ApplyFailed` with `system` class and no
    /// handle (nothing was applied, nothing to clean).
    pub fn apply(&self, cancel: &CancelToken) -> SeedApply {
        let Some(apply_path) = seeds_apply_path(self.platform, self.scenario_root) else {
            return SeedApply {
                state: SeedState::Idle,
                result: PhaseResult::fail(
                    FailureClass::Misconfiguration,
                    "no seeds apply entrypoint under test/playbooks/__seeds/",
                ),
                cleanup: None,
            };
        };

        tracing::info!(script = %apply_path.display(), "applying seeds");
        let outcome = run_seed_script(
            self.platform,
            &apply_path,
            self.scenario_root,
            self.app_root,
            self.artifact_dir,
            "seeds-apply.log",
            cancel,
        );

        match outcome {
            ScriptOutcome::Ok => {
                let mut result = PhaseResult::ok();
                result.observe(ObservationSeverity::Success, "seeds applied");
                result.attach_artifact(
                    "seeds-apply.log",
                    self.artifact_dir.join("seeds-apply.log"),
                );
                let cleanup = CleanupHandle {
                    cleanup_path: seeds_cleanup_path(self.platform, self.scenario_root),
                    scenario_root: self.scenario_root.to_path_buf(),
                    app_root: self.app_root.to_path_buf(),
                    artifact_dir: self.artifact_dir.to_path_buf(),
                    done: false,
                };
                SeedApply {
                    state: SeedState::Applied,
                    result,
                    cleanup: Some(cleanup),
                }
            }
            ScriptOutcome::Failed(message) => SeedApply {
                state: SeedState::ApplyFailed,
                result: PhaseResult::fail(FailureClass::System, format!("seeds apply: {message}"))
                    .with_remediation("inspect seeds-apply.log and fix the apply script"),
                cleanup: None,
            },
            ScriptOutcome::Cancelled => SeedApply {
                state: SeedState::ApplyFailed,
                result: PhaseResult::fail(FailureClass::System, "seeds apply cancelled"),
                cleanup: None,
            },
        }
    }
}

/// Obligation to run the cleanup entrypoint exactly once.
///
/// The engine drains handles LIFO at record freeze. `Drop` is a last-resort
/// path for panics: it invokes the script synchronously without the facade.
pub struct CleanupHandle {
    cleanup_path: Option<PathBuf>,
    scenario_root: PathBuf,
    app_root: PathBuf,
    artifact_dir: PathBuf,
    done: bool,
}

impl CleanupHandle {
    /// Run cleanup under a fresh non-cancellable token. Failures are
    /// reported as observations; they never overwrite the run verdict.
    pub fn run(mut self, platform: &dyn Platform) -> (SeedState, Vec<Observation>) {
        self.done = true;
        let Some(cleanup_path) = self.cleanup_path.clone() else {
            return (
                SeedState::Done,
                vec![Observation {
                    severity: ObservationSeverity::Info,
                    message: "no seeds cleanup entrypoint; nothing to tear down".to_string(),
                    evidence: None,
                }],
            );
        };

        tracing::info!(script = %cleanup_path.display(), "cleaning seeds");
        let background = CancelToken::new();
        let outcome = run_seed_script(
            platform,
            &cleanup_path,
            &self.scenario_root,
            &self.app_root,
            &self.artifact_dir,
            "seeds-cleanup.log",
            &background,
        );
        match outcome {
            ScriptOutcome::Ok => (
                SeedState::Done,
                vec![Observation {
                    severity: ObservationSeverity::Success,
                    message: "seeds cleanup completed".to_string(),
                    evidence: None,
                }],
            ),
            ScriptOutcome::Failed(message) => (
                SeedState::CleanupFailed,
                vec![Observation {
                    severity: ObservationSeverity::Error,
                    message: format!("seeds cleanup failed: {message}"),
                    evidence: None,
                }],
            ),
            ScriptOutcome::Cancelled => (
                SeedState::CleanupFailed,
                vec![Observation {
                    severity: ObservationSeverity::Error,
                    message: "seeds cleanup cancelled".to_string(),
                    evidence: None,
                }],
            ),
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // Panic path: best effort, synchronous, outside the facade.
        if let Some(cleanup_path) = &self.cleanup_path {
            let mut cmd = script_command_raw(cleanup_path);
            let _ = cmd
                .current_dir(&self.scenario_root)
                .env(ENV_SCENARIO_DIR, &self.scenario_root)
                .env(ENV_APP_ROOT, &self.app_root)
                .status();
        }
    }
}

enum ScriptOutcome {
    Ok,
    Failed(String),
    Cancelled,
}

impl ScriptOutcome {
    fn failed(message: impl Into<String>) -> Self {
        ScriptOutcome::Failed(message.into())
    }
}

fn run_seed_script(
    platform: &dyn Platform,
    script: &Path,
    scenario_root: &Path,
    app_root: &Path,
    artifact_dir: &Path,
    log_name: &str,
    cancel: &CancelToken,
) -> ScriptOutcome {
    let log_path = artifact_dir.join(log_name);
    let (program, args) = script_command(script);

    let mut spec = SpawnSpec::new(program)
        .args(args)
        .cwd(scenario_root)
        .env(ENV_SCENARIO_DIR, scenario_root.display().to_string())
        .env(ENV_APP_ROOT, app_root.display().to_string());
    if let Ok(sink) = file_sink(&log_path) {
        spec = spec.stdout(sink);
    }
    if let Ok(sink) = file_sink(&log_path) {
        spec = spec.stderr(sink);
    }

    let mut handle = match platform.spawn(spec) {
        Ok(handle) => handle,
        Err(SpawnError::MissingCommand(name)) => {
            return ScriptOutcome::failed(format!("command not found: {name}"));
        }
        Err(err) => return ScriptOutcome::failed(err.to_string()),
    };
    match handle.wait(cancel, Some(SEED_SCRIPT_TIMEOUT)) {
        WaitOutcome::Exited { code: 0 } => ScriptOutcome::Ok,
        WaitOutcome::Exited { code } => {
            ScriptOutcome::failed(format!("script exited with status {code}"))
        }
        WaitOutcome::Signalled { signal } => {
            ScriptOutcome::failed(format!("script terminated by signal {signal}"))
        }
        WaitOutcome::TimedOut => ScriptOutcome::failed("script exceeded its time budget"),
        WaitOutcome::Cancelled => ScriptOutcome::Cancelled,
    }
}

/// Shell scripts run through `sh`; bare entrypoints run directly.
fn script_command(script: &Path) -> (PathBuf, Vec<String>) {
    if script.extension().is_some_and(|ext| ext == "sh") {
        (
            PathBuf::from("sh"),
            vec![script.display().to_string()],
        )
    } else {
        (script.to_path_buf(), Vec::new())
    }
}

fn script_command_raw(script: &Path) -> std::process::Command {
    if script.extension().is_some_and(|ext| ext == "sh") {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg(script);
        cmd
    } else {
        std::process::Command::new(script)
    }
}

/// Run the scenario's integration playbooks (`test/playbooks/*.sh`,
/// excluding the seeds directory) in lexicographic order.
pub fn run_playbooks(
    platform: &dyn Platform,
    scenario_root: &Path,
    app_root: &Path,
    artifact_dir: &Path,
    cancel: &CancelToken,
) -> PhaseResult {
    let playbook_dir = scenario_root.join("test/playbooks");
    let mut scripts: Vec<PathBuf> = match platform.walk(&playbook_dir) {
        Ok(files) => files
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "sh"))
            .filter(|path| {
                path.parent()
                    .is_some_and(|parent| parent == playbook_dir.as_path())
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    scripts.sort();

    let mut result = PhaseResult::ok();
    if scripts.is_empty() {
        result.observe(
            ObservationSeverity::Info,
            "no integration playbooks beyond seeds",
        );
        return result;
    }

    for (idx, script) in scripts.iter().enumerate() {
        if cancel.is_cancelled() {
            return PhaseResult::fail(FailureClass::Cancelled, "integration cancelled");
        }
        let log_name = format!("playbook-{idx}.log");
        let outcome = run_seed_script(
            platform,
            script,
            scenario_root,
            app_root,
            artifact_dir,
            &log_name,
            cancel,
        );
        let name = script
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        match outcome {
            ScriptOutcome::Ok => {
                result.observe(ObservationSeverity::Success, format!("playbook {name} passed"));
                result.attach_artifact(log_name.clone(), artifact_dir.join(&log_name));
            }
            ScriptOutcome::Failed(message) => {
                let mut failed = PhaseResult::fail(
                    FailureClass::TestFailure,
                    format!("playbook {name}: {message}"),
                )
                .with_remediation("inspect the playbook log and fix the failing step");
                failed.observations = result.observations.clone();
                failed.observe(ObservationSeverity::Error, format!("playbook {name} failed"));
                failed.artifacts = result.artifacts.clone();
                failed.attach_artifact(log_name.clone(), artifact_dir.join(&log_name));
                return failed;
            }
            ScriptOutcome::Cancelled => {
                return PhaseResult::fail(FailureClass::Cancelled, "integration cancelled");
            }
        }
    }
    result
}
