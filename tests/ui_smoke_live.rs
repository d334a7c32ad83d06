//! Live UI smoke run against a real HTTP server, guarded on python3.

use std::path::{Path, PathBuf};

use test_genie::engine::{PhaseId, PhaseOutcome, RunOptions};

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, body).expect("write");
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).expect("stat").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod");
}

#[cfg(unix)]
#[test]
fn ui_smoke_passes_against_live_server() {
    if find_in_path("python3").is_none() {
        return;
    }
    let root = tempfile::tempdir().expect("temp root");
    let artifacts = tempfile::tempdir().expect("artifacts");

    write(root.path(), "requirements/core.md", "- [REQ-1] One\n");
    // The manifest pins an uncommon port; the stand-in package manager
    // serves the ui/ directory on $PORT, so the directory listing contains
    // the configured handshake signal.
    write(
        root.path(),
        "ui/package.json",
        r#"{"name": "ui", "scripts": {"dev": "serve"}, "config": {"port": 38473}}"#,
    );
    write(
        root.path(),
        ".vrooli/testing.json",
        r#"{"structure": {"ui_smoke": {"timeout_ms": 20000, "handshake_timeout_ms": 10000, "handshake_signals": ["package.json"]}}}"#,
    );
    let fake_pm = root.path().join("fake-pm.sh");
    std::fs::write(
        &fake_pm,
        "#!/bin/sh\nexec python3 -m http.server \"$PORT\" --bind 127.0.0.1\n",
    )
    .expect("write fake pm");
    make_executable(&fake_pm);

    let options = RunOptions {
        artifact_root: Some(artifacts.path().to_path_buf()),
        node_package_manager: fake_pm.display().to_string(),
        ..RunOptions::default()
    };
    let record = test_genie::run(root.path(), &options).expect("run");

    let ui = match record.phase(PhaseId::UiSmoke) {
        Some(PhaseOutcome::Executed { result }) => result,
        other => panic!("expected executed ui_smoke, got {other:?}"),
    };
    assert!(ui.success, "ui smoke failed: {:?}", ui.error);
    assert!(ui
        .observations
        .iter()
        .any(|obs| obs.message.contains("handshake signal")));
    assert!(ui
        .observations
        .iter()
        .any(|obs| obs.message.contains("listening on port 38473")));
    assert!(ui.artifacts.contains_key("ui-smoke.log"));
}

#[cfg(unix)]
#[test]
fn ui_smoke_times_out_when_nothing_listens() {
    let root = tempfile::tempdir().expect("temp root");
    let artifacts = tempfile::tempdir().expect("artifacts");

    write(root.path(), "requirements/core.md", "- [REQ-1] One\n");
    write(
        root.path(),
        "ui/package.json",
        r#"{"name": "ui", "scripts": {"dev": "serve"}, "config": {"port": 38474}}"#,
    );
    // Short listen budget so the phase times out quickly.
    write(
        root.path(),
        ".vrooli/testing.json",
        r#"{"structure": {"ui_smoke": {"timeout_ms": 1500}}}"#,
    );
    let fake_pm = root.path().join("fake-pm.sh");
    std::fs::write(&fake_pm, "#!/bin/sh\nsleep 60\n").expect("write fake pm");
    make_executable(&fake_pm);

    let options = RunOptions {
        artifact_root: Some(artifacts.path().to_path_buf()),
        node_package_manager: fake_pm.display().to_string(),
        ..RunOptions::default()
    };
    let record = test_genie::run(root.path(), &options).expect("run");

    let ui = match record.phase(PhaseId::UiSmoke) {
        Some(PhaseOutcome::Executed { result }) => result,
        other => panic!("expected executed ui_smoke, got {other:?}"),
    };
    assert_eq!(
        ui.failure_class,
        test_genie::outcome::FailureClass::Timeout
    );
}
