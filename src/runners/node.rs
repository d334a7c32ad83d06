//! Node unit runner: the manifest's declared test script via the configured
//! package manager.

use crate::classify::{Language, ScenarioProfile};
use crate::outcome::{FailureClass, PhaseResult};

use super::{run_tool, Runner, RunnerContext, ToolInvocation};

pub struct NodeRunner;

impl Runner for NodeRunner {
    fn name(&self) -> &'static str {
        "node"
    }

    fn detect(&self, profile: &ScenarioProfile) -> bool {
        profile.has_language(Language::Node)
    }

    fn run(&self, ctx: &RunnerContext<'_>) -> PhaseResult {
        let manifest_path = ctx.profile.path.join("package.json");
        if !ctx.platform.is_file(&manifest_path) {
            return PhaseResult::fail(
                FailureClass::Misconfiguration,
                "Node scenario has no root package.json",
            )
            .with_remediation("add a package.json with a \"test\" script");
        }
        let manifest = match ctx.platform.read_file(&manifest_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                return PhaseResult::fail(FailureClass::System, err.to_string());
            }
        };
        let manifest: serde_json::Value = match serde_json::from_slice(&manifest) {
            Ok(value) => value,
            Err(err) => {
                return PhaseResult::fail(
                    FailureClass::Misconfiguration,
                    format!("package.json does not parse: {err}"),
                )
                .with_remediation("fix the package.json syntax");
            }
        };
        let has_test_script = manifest
            .get("scripts")
            .and_then(|scripts| scripts.get("test"))
            .and_then(|script| script.as_str())
            .is_some_and(|script| !script.trim().is_empty());
        if !has_test_script {
            return PhaseResult::fail(
                FailureClass::Misconfiguration,
                "package.json declares no test script",
            )
            .with_remediation("add a \"test\" entry under \"scripts\" in package.json");
        }

        if ctx.platform.look_path("node").is_none() {
            return PhaseResult::fail(
                FailureClass::MissingDependency,
                "required command \"node\" not found on PATH",
            )
            .with_remediation("install node and ensure it is on PATH");
        }

        run_tool(
            ctx,
            ToolInvocation {
                program: ctx.node_package_manager,
                args: vec!["test".to_string()],
                cwd: ctx.profile.path.clone(),
                log_name: "unit-node.log",
                failure_remediation: "Fix the failing Node test script before re-running the suite.",
            },
        )
    }
}
