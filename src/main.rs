use clap::Parser;
use std::time::Duration;

use test_genie::cli::{AuditArgs, ClassifyArgs, Command, RootArgs, RunArgs};
use test_genie::config::ConfigError;
use test_genie::engine::{PhaseOutcome, RunError, RunOptions};
use test_genie::outcome::ObservationSeverity;
use test_genie::store::{JsonlStore, Store};
use test_genie::{AuditOptions, CancelToken};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    let code = match args.command {
        Command::Run(run) => cmd_run(run),
        Command::Audit(audit) => cmd_audit(audit),
        Command::Classify(classify) => cmd_classify(classify),
    };
    std::process::exit(code);
}

fn cmd_run(args: RunArgs) -> i32 {
    let options = RunOptions {
        cancel: CancelToken::new(),
        artifact_root: args.artifact_root.clone(),
        config_override: args.config.clone(),
        app_root: None,
        unit_timeout: Duration::from_secs(args.timeout_minutes * 60),
        node_package_manager: args.package_manager.clone(),
        python_test_driver: args.python_driver.clone(),
        audit_severity_floor: args.severity_floor,
    };

    let record = match test_genie::run(&args.scenario, &options) {
        Ok(record) => record,
        Err(RunError::Config(err)) => {
            eprintln!("configuration error: {err}");
            return 2;
        }
        Err(RunError::CancelledEarly) => {
            eprintln!("cancelled before any phase started");
            return 1;
        }
        Err(RunError::Artifacts(reason)) => {
            eprintln!("configuration error: {reason}");
            return 2;
        }
    };

    if let Some(artifact_root) = &args.artifact_root {
        let mut store = JsonlStore::new(artifact_root);
        if let Err(err) = store
            .append_run(&record)
            .and_then(|()| store.append_snapshot(&record.requirement_snapshot))
        {
            eprintln!("warning: could not persist run record: {err:#}");
        }
    }

    if args.json {
        match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("serialize run record: {err}");
                return 2;
            }
        }
    } else {
        print_run_summary(&record);
    }

    match record.verdict {
        test_genie::Verdict::Passed => 0,
        test_genie::Verdict::Failed => 1,
    }
}

fn print_run_summary(record: &test_genie::RunRecord) {
    println!("scenario {}", record.profile.name);
    for phase in &record.phases {
        match &phase.outcome {
            PhaseOutcome::Executed { result } if result.success => {
                println!("  {:<12} ok", phase.id.as_str());
            }
            PhaseOutcome::Executed { result } => {
                println!(
                    "  {:<12} failed ({})",
                    phase.id.as_str(),
                    result.failure_class
                );
                if let Some(error) = &result.error {
                    println!("    error: {}", error.message);
                }
                if let Some(remediation) = &result.remediation {
                    println!("    remediation: {remediation}");
                }
                for observation in &result.observations {
                    if observation.severity == ObservationSeverity::Error {
                        println!("    {}", observation.message);
                    }
                }
            }
            PhaseOutcome::SkippedNotApplicable => {
                println!("  {:<12} skipped (not applicable)", phase.id.as_str());
            }
            PhaseOutcome::SkippedBlocked { blocked_on } => {
                println!(
                    "  {:<12} skipped (blocked on {})",
                    phase.id.as_str(),
                    blocked_on.as_str()
                );
            }
        }
    }
    for observation in &record.run_observations {
        println!("  note: {}", observation.message);
    }
    let summary = &record.requirement_snapshot.summary;
    println!(
        "requirements: {} total, {} complete ({:.1}% completion, {:.1}% pass rate)",
        summary.total, summary.complete, summary.completion_rate, summary.pass_rate
    );
    println!(
        "verdict: {}",
        match record.verdict {
            test_genie::Verdict::Passed => "passed",
            test_genie::Verdict::Failed => "failed",
        }
    );
}

fn cmd_audit(args: AuditArgs) -> i32 {
    let options = AuditOptions {
        config_override: args.config.clone(),
        auto_apply: args.fix,
        include_patches: args.include_patches,
    };
    let output = match test_genie::audit(&args.scenario, &options) {
        Ok(output) => output,
        Err(err) => {
            if let Some(config_err) = err.downcast_ref::<ConfigError>() {
                eprintln!("configuration error: {config_err}");
            } else {
                eprintln!("audit failed: {err:#}");
            }
            return 2;
        }
    };

    if args.json {
        let report = serde_json::json!({
            "violations": output.violations,
            "fixes": output.fixes,
        });
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("serialize audit report: {err}");
                return 2;
            }
        }
    } else {
        if output.violations.is_empty() {
            println!("no violations");
        }
        for violation in &output.violations.violations {
            println!(
                "{} [{}] {} at {}:{}",
                violation.severity,
                violation.rule_id,
                violation.title,
                violation.file_path.display(),
                violation.line
            );
            println!("    {}", violation.recommendation);
        }
        for entry in &output.fixes.entries {
            println!(
                "fix {:?} {} ({})",
                entry.status,
                entry.file_path.display(),
                entry.description
            );
        }
    }

    if output.has_blocking(args.severity_floor) {
        1
    } else {
        0
    }
}

fn cmd_classify(args: ClassifyArgs) -> i32 {
    let profile = match test_genie::classify(&args.scenario) {
        Ok(profile) => profile,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return 2;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&profile) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("serialize profile: {err}");
                return 2;
            }
        }
    } else {
        let languages: Vec<&str> = profile
            .languages
            .iter()
            .map(|language| language.label())
            .collect();
        println!("scenario {}", profile.name);
        println!(
            "  languages: {}",
            if languages.is_empty() {
                "none".to_string()
            } else {
                languages.join(", ")
            }
        );
        println!("  api: {}  cli: {}", profile.has_api, profile.has_cli);
        println!("  ui: {}  seeds: {}", profile.has_ui, profile.has_seeds);
        println!("  ui smoke enabled: {}", profile.ui_smoke.enabled);
    }
    0
}
