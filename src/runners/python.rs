//! Python unit runner: the configured test driver against the scenario root.

use crate::classify::{Language, ScenarioProfile};
use crate::outcome::{FailureClass, PhaseResult};

use super::{run_tool, Runner, RunnerContext, ToolInvocation};

pub struct PythonRunner;

impl Runner for PythonRunner {
    fn name(&self) -> &'static str {
        "python"
    }

    fn detect(&self, profile: &ScenarioProfile) -> bool {
        profile.has_language(Language::Python)
    }

    fn run(&self, ctx: &RunnerContext<'_>) -> PhaseResult {
        let has_manifest = ctx.platform.is_file(&ctx.profile.path.join("requirements.txt"))
            || ctx.platform.is_file(&ctx.profile.path.join("pyproject.toml"));
        if !has_manifest {
            return PhaseResult::fail(
                FailureClass::Misconfiguration,
                "Python scenario has no requirements.txt or pyproject.toml",
            )
            .with_remediation("add a Python project manifest at the scenario root");
        }

        // The driver is a configured command string, e.g. "pytest" or
        // "python -m pytest".
        let tokens = match shell_words::split(ctx.python_test_driver) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => {
                return PhaseResult::fail(
                    FailureClass::Misconfiguration,
                    "python test driver is empty",
                );
            }
            Err(err) => {
                return PhaseResult::fail(
                    FailureClass::Misconfiguration,
                    format!("python test driver does not parse: {err}"),
                );
            }
        };
        let program = tokens[0].clone();
        let args = tokens[1..].to_vec();

        run_tool(
            ctx,
            ToolInvocation {
                program: &program,
                args,
                cwd: ctx.profile.path.clone(),
                log_name: "unit-python.log",
                failure_remediation:
                    "Fix the failing Python tests before re-running the suite.",
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::platform::{CancelToken, HostPlatform};
    use std::path::Path;
    use std::time::Duration;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, body).expect("write");
    }

    #[test]
    fn missing_driver_is_missing_dependency() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "requirements.txt", "");
        let profile = classify(&platform, root.path(), None).expect("classify");
        assert!(PythonRunner.detect(&profile));

        let artifacts = tempfile::tempdir().expect("artifacts");
        let cancel = CancelToken::new();
        let ctx = RunnerContext {
            platform: &platform,
            profile: &profile,
            cancel: &cancel,
            artifact_dir: artifacts.path(),
            unit_timeout: Duration::from_secs(30),
            node_package_manager: "npm",
            python_test_driver: "not-a-real-test-driver-xyz",
        };
        let result = PythonRunner.run(&ctx);
        assert_eq!(result.failure_class, FailureClass::MissingDependency);
    }

    #[test]
    fn multi_token_driver_is_split() {
        let tokens = shell_words::split("python -m pytest -q").expect("split");
        assert_eq!(tokens, vec!["python", "-m", "pytest", "-q"]);
    }
}
