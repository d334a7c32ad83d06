//! Per-language unit test runners.
//!
//! Every runner implements the same capability set: a stable name, profile
//! detection, and a `run` that classifies its own failures into a
//! [`PhaseResult`]. Runners never propagate raw errors upward.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::classify::ScenarioProfile;
use crate::outcome::{FailureClass, ObservationSeverity, PhaseResult};
use crate::platform::{
    file_sink, CancelToken, OutputSink, Platform, SpawnError, SpawnSpec, WaitOutcome,
};
use crate::util::tail_snippet;

pub mod go;
pub mod node;
pub mod python;

/// Bytes of captured combined output kept for observation evidence.
const CAPTURE_CAP_BYTES: usize = 64 * 1024;
/// Evidence snippet bounds attached to runner observations.
const EVIDENCE_MAX_LINES: usize = 60;
const EVIDENCE_MAX_BYTES: usize = 8 * 1024;

/// Default scenario-wide wall clock for one unit-test subprocess.
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Shared inputs for one runner invocation.
pub struct RunnerContext<'a> {
    pub platform: &'a dyn Platform,
    pub profile: &'a ScenarioProfile,
    pub cancel: &'a CancelToken,
    pub artifact_dir: &'a Path,
    pub unit_timeout: Duration,
    pub node_package_manager: &'a str,
    pub python_test_driver: &'a str,
}

/// Capability set of a per-language runner.
pub trait Runner {
    fn name(&self) -> &'static str;
    fn detect(&self, profile: &ScenarioProfile) -> bool;
    fn run(&self, ctx: &RunnerContext<'_>) -> PhaseResult;
}

/// All built-in runners, in stable order.
pub fn all_runners() -> Vec<Box<dyn Runner>> {
    vec![
        Box::new(go::GoRunner),
        Box::new(node::NodeRunner),
        Box::new(python::PythonRunner),
    ]
}

/// In-memory tee with a byte cap, layered over an optional file sink.
#[derive(Clone, Default)]
pub(crate) struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().expect("capture lock")).to_string()
    }

    /// Append bytes, bounded by the capture cap.
    pub(crate) fn push(&self, buf: &[u8]) {
        let mut bytes = self.bytes.lock().expect("capture lock");
        let remaining = CAPTURE_CAP_BYTES.saturating_sub(bytes.len());
        bytes.extend_from_slice(&buf[..buf.len().min(remaining)]);
    }
}

struct TeeSink {
    capture: CaptureBuffer,
    file: Option<OutputSink>,
}

impl Write for TeeSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.capture.push(buf);
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }
}

pub(crate) struct ToolInvocation<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub log_name: &'a str,
    /// Remediation shown when the tool exits non-zero.
    pub failure_remediation: &'a str,
}

/// Resolve, spawn, stream, and classify one test tool invocation.
///
/// Combined stdout/stderr goes to `<artifact_dir>/<log_name>` and, capped,
/// into an evidence observation so downstream requirement enrichment can
/// match ids the tests print.
pub(crate) fn run_tool(ctx: &RunnerContext<'_>, invocation: ToolInvocation<'_>) -> PhaseResult {
    let Some(program_path) = ctx.platform.look_path(invocation.program) else {
        return PhaseResult::fail(
            FailureClass::MissingDependency,
            format!("required command {:?} not found on PATH", invocation.program),
        )
        .with_remediation(format!(
            "install {} and ensure it is on PATH",
            invocation.program
        ));
    };

    let log_path = ctx.artifact_dir.join(invocation.log_name);
    let capture = CaptureBuffer::default();
    let stdout: OutputSink = Box::new(TeeSink {
        capture: capture.clone(),
        file: file_sink(&log_path).ok(),
    });
    let stderr: OutputSink = Box::new(TeeSink {
        capture: capture.clone(),
        file: file_sink(&log_path).ok(),
    });

    let command_line = format!("{} {}", invocation.program, invocation.args.join(" "));
    tracing::debug!(command = %command_line, cwd = %invocation.cwd.display(), "runner spawn");

    let spec = SpawnSpec::new(program_path)
        .args(invocation.args.clone())
        .cwd(invocation.cwd.clone())
        .stdout(stdout)
        .stderr(stderr);

    let mut handle = match ctx.platform.spawn(spec) {
        Ok(handle) => handle,
        Err(SpawnError::MissingCommand(name)) => {
            return PhaseResult::fail(
                FailureClass::MissingDependency,
                format!("required command {name:?} not found on PATH"),
            )
            .with_remediation(format!("install {name} and ensure it is on PATH"));
        }
        Err(err @ SpawnError::Launch { .. }) => {
            return PhaseResult::fail(FailureClass::System, err.to_string());
        }
    };

    let outcome = handle.wait(ctx.cancel, Some(ctx.unit_timeout));
    let evidence = tail_snippet(&capture.text(), EVIDENCE_MAX_LINES, EVIDENCE_MAX_BYTES);

    let mut result = match outcome {
        WaitOutcome::Exited { code: 0 } => {
            let mut result = PhaseResult::ok();
            result.observe_with_evidence(
                ObservationSeverity::Success,
                format!("{command_line} passed"),
                evidence,
            );
            result
        }
        WaitOutcome::Exited { code } => {
            let mut result = PhaseResult::fail(
                FailureClass::TestFailure,
                format!("{command_line} exited with status {code}"),
            )
            .with_remediation(invocation.failure_remediation.to_string());
            result.observe_with_evidence(
                ObservationSeverity::Error,
                format!("{command_line} failed"),
                evidence,
            );
            result
        }
        WaitOutcome::Signalled { signal } => {
            let mut result = PhaseResult::fail(
                FailureClass::TestFailure,
                format!("{command_line} terminated by signal {signal}"),
            )
            .with_remediation(invocation.failure_remediation.to_string());
            result.observe_with_evidence(
                ObservationSeverity::Error,
                format!("{command_line} terminated"),
                evidence,
            );
            result
        }
        WaitOutcome::TimedOut => PhaseResult::fail(
            FailureClass::Timeout,
            format!(
                "{command_line} exceeded the {}s wall-clock budget",
                ctx.unit_timeout.as_secs()
            ),
        ),
        WaitOutcome::Cancelled => {
            PhaseResult::fail(FailureClass::Cancelled, format!("{command_line} cancelled"))
        }
    };
    result.attach_artifact(invocation.log_name.to_string(), log_path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::platform::HostPlatform;

    fn context<'a>(
        platform: &'a HostPlatform,
        profile: &'a ScenarioProfile,
        cancel: &'a CancelToken,
        artifact_dir: &'a Path,
    ) -> RunnerContext<'a> {
        RunnerContext {
            platform,
            profile,
            cancel,
            artifact_dir,
            unit_timeout: Duration::from_secs(60),
            node_package_manager: "npm",
            python_test_driver: "pytest",
        }
    }

    #[test]
    fn missing_tool_maps_to_missing_dependency() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let artifacts = tempfile::tempdir().expect("artifacts");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let cancel = CancelToken::new();
        let ctx = context(&platform, &profile, &cancel, artifacts.path());

        let result = run_tool(
            &ctx,
            ToolInvocation {
                program: "definitely-not-installed-xyz",
                args: vec![],
                cwd: root.path().to_path_buf(),
                log_name: "missing.log",
                failure_remediation: "unused",
            },
        );
        assert!(!result.success);
        assert_eq!(result.failure_class, FailureClass::MissingDependency);
        assert!(result
            .remediation
            .as_deref()
            .is_some_and(|hint| hint.contains("definitely-not-installed-xyz")));
    }

    #[test]
    fn failing_tool_captures_evidence_and_log() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let artifacts = tempfile::tempdir().expect("artifacts");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let cancel = CancelToken::new();
        let ctx = context(&platform, &profile, &cancel, artifacts.path());

        let result = run_tool(
            &ctx,
            ToolInvocation {
                program: "sh",
                args: vec!["-c".to_string(), "echo REQ-404 missing; exit 2".to_string()],
                cwd: root.path().to_path_buf(),
                log_name: "unit-sh.log",
                failure_remediation: "fix the failing tests",
            },
        );
        assert_eq!(result.failure_class, FailureClass::TestFailure);
        let evidence = result.observations[0].evidence.as_deref().expect("evidence");
        assert!(evidence.contains("REQ-404"));
        let log = std::fs::read_to_string(artifacts.path().join("unit-sh.log")).expect("log");
        assert!(log.contains("REQ-404"));
    }

    #[test]
    fn passing_tool_reports_success_observation() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let artifacts = tempfile::tempdir().expect("artifacts");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let cancel = CancelToken::new();
        let ctx = context(&platform, &profile, &cancel, artifacts.path());

        let result = run_tool(
            &ctx,
            ToolInvocation {
                program: "sh",
                args: vec!["-c".to_string(), "echo REQ-101 ok".to_string()],
                cwd: root.path().to_path_buf(),
                log_name: "unit-sh.log",
                failure_remediation: "unused",
            },
        );
        assert!(result.success);
        assert_eq!(result.observations.len(), 1);
        assert_eq!(result.observations[0].severity, ObservationSeverity::Success);
    }
}
