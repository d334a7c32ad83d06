//! Go unit runner: `go test ./...` under the scenario's `api/` module.

use crate::classify::{Language, ScenarioProfile};
use crate::outcome::{FailureClass, PhaseResult};

use super::{run_tool, Runner, RunnerContext, ToolInvocation};

pub struct GoRunner;

impl Runner for GoRunner {
    fn name(&self) -> &'static str {
        "go"
    }

    fn detect(&self, profile: &ScenarioProfile) -> bool {
        profile.has_language(Language::Go)
    }

    fn run(&self, ctx: &RunnerContext<'_>) -> PhaseResult {
        let api_dir = ctx.profile.path.join("api");
        if !ctx.platform.is_dir(&api_dir) {
            return PhaseResult::fail(
                FailureClass::Misconfiguration,
                "Go scenario has no api/ directory",
            )
            .with_remediation("create api/ with a go.mod module, or remove the Go sources");
        }
        if !ctx.platform.is_file(&api_dir.join("go.mod")) {
            return PhaseResult::fail(
                FailureClass::Misconfiguration,
                "api/ is missing its go.mod module definition",
            )
            .with_remediation("run `go mod init` under api/");
        }

        run_tool(
            ctx,
            ToolInvocation {
                program: "go",
                args: vec!["test".to_string(), "./...".to_string()],
                cwd: api_dir,
                log_name: "unit-go.log",
                failure_remediation: "Fix failing Go tests under api/ before re-running the suite.",
            },
        )
    }
}
