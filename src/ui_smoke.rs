//! UI smoke phase: bring the UI up, prove it listens, serves, and hands
//! the application shell over.
//!
//! The headless-browser collaborator is the [`HandshakeProbe`] trait; the
//! built-in [`HttpHandshake`] polls the served document and treats a signal
//! as truthy when its text occurs in the page.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ScenarioProfile;
use crate::outcome::{FailureClass, ObservationSeverity, PhaseResult};
use crate::platform::{file_sink, CancelToken, Platform, ProcessHandle, SpawnError, SpawnSpec};

/// Default UI port when the manifest declares none.
pub const DEFAULT_UI_PORT: u16 = 3000;

/// TCP dial attempt budget during the listen poll.
const DIAL_TIMEOUT: Duration = Duration::from_millis(500);
/// Listen poll backoff bounds.
const BACKOFF_START: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(2);
/// Handshake poll interval.
const HANDSHAKE_POLL: Duration = Duration::from_millis(250);
/// HTTP probe budget.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a handshake wait concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The named signal evaluated truthy in the page.
    Signal(String),
    TimedOut,
    Cancelled,
}

/// External collaborator that evaluates handshake signals in the page.
pub trait HandshakeProbe {
    fn await_signal(
        &self,
        platform: &dyn Platform,
        url: &str,
        signals: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> HandshakeOutcome;
}

/// Built-in probe: poll the document over HTTP and match signal text.
pub struct HttpHandshake;

impl HandshakeProbe for HttpHandshake {
    fn await_signal(
        &self,
        platform: &dyn Platform,
        url: &str,
        signals: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> HandshakeOutcome {
        let deadline = platform.now_epoch_ms() + timeout.as_millis();
        loop {
            if cancel.is_cancelled() {
                return HandshakeOutcome::Cancelled;
            }
            if let Ok(probe) = platform.http_get(url, PROBE_TIMEOUT) {
                if let Some(signal) = signals.iter().find(|signal| probe.body.contains(*signal)) {
                    return HandshakeOutcome::Signal(signal.clone());
                }
            }
            if platform.now_epoch_ms() >= deadline {
                return HandshakeOutcome::TimedOut;
            }
            platform.sleep(HANDSHAKE_POLL);
        }
    }
}

pub struct UiSmokeArgs<'a> {
    pub platform: &'a dyn Platform,
    pub profile: &'a ScenarioProfile,
    pub cancel: &'a CancelToken,
    pub artifact_dir: &'a Path,
    pub node_package_manager: &'a str,
}

/// Execute the smoke procedure. The UI subprocess is always terminated
/// before this returns, on every path.
pub fn run_ui_smoke(args: &UiSmokeArgs<'_>, probe: &dyn HandshakeProbe) -> PhaseResult {
    let entry = match resolve_entry(args) {
        Ok(entry) => entry,
        Err(result) => return *result,
    };

    let log_path = args.artifact_dir.join("ui-smoke.log");
    let mut spec = SpawnSpec::new(&entry.program)
        .args(entry.args.clone())
        .cwd(args.profile.path.join("ui"))
        .env("PORT", entry.port.to_string());
    if let Ok(sink) = file_sink(&log_path) {
        spec = spec.stdout(sink);
    }
    if let Ok(sink) = file_sink(&log_path) {
        spec = spec.stderr(sink);
    }

    let mut handle = match args.platform.spawn(spec) {
        Ok(handle) => handle,
        Err(SpawnError::MissingCommand(name)) => {
            return PhaseResult::fail(
                FailureClass::MissingDependency,
                format!("UI entry command {name:?} not found on PATH"),
            )
            .with_remediation(format!("install {name} and ensure it is on PATH"));
        }
        Err(err) => return PhaseResult::fail(FailureClass::System, err.to_string()),
    };

    let mut result = smoke_against(args, probe, &entry);
    stop_ui(args.platform, handle.as_mut());
    result.attach_artifact("ui-smoke.log", log_path);
    result
}

struct UiEntry {
    program: PathBuf,
    args: Vec<String>,
    port: u16,
    script: String,
}

fn resolve_entry(args: &UiSmokeArgs<'_>) -> Result<UiEntry, Box<PhaseResult>> {
    let manifest_path = args.profile.path.join("ui/package.json");
    if !args.platform.is_file(&manifest_path) {
        return Err(Box::new(
            PhaseResult::fail(
                FailureClass::Misconfiguration,
                "UI present but ui/package.json is missing",
            )
            .with_remediation("add ui/package.json with a dev or start script"),
        ));
    }
    let manifest = args
        .platform
        .read_file(&manifest_path)
        .map_err(|err| Box::new(PhaseResult::fail(FailureClass::System, err.to_string())))?;
    let manifest: serde_json::Value = serde_json::from_slice(&manifest).map_err(|err| {
        Box::new(
            PhaseResult::fail(
                FailureClass::Misconfiguration,
                format!("ui/package.json does not parse: {err}"),
            )
            .with_remediation("fix the manifest syntax"),
        )
    })?;

    let scripts = manifest.get("scripts");
    let script = ["dev", "start"]
        .iter()
        .find(|name| {
            scripts
                .and_then(|scripts| scripts.get(**name))
                .and_then(|script| script.as_str())
                .is_some_and(|script| !script.trim().is_empty())
        })
        .copied();
    let Some(script) = script else {
        // A declared UI with no way to start it is a scenario defect, not
        // a skip.
        return Err(Box::new(
            PhaseResult::fail(
                FailureClass::Misconfiguration,
                "ui/package.json declares no dev or start script",
            )
            .with_remediation("declare a dev or start script for the UI entrypoint"),
        ));
    };

    let port = manifest
        .get("config")
        .and_then(|config| config.get("port"))
        .and_then(|port| port.as_u64())
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(DEFAULT_UI_PORT);

    let program = resolve_program(args, args.node_package_manager)?;
    Ok(UiEntry {
        program,
        args: vec!["run".to_string(), script.to_string()],
        port,
        script: script.to_string(),
    })
}

fn resolve_program(
    args: &UiSmokeArgs<'_>,
    command: &str,
) -> Result<PathBuf, Box<PhaseResult>> {
    // Absolute/relative command paths bypass PATH resolution.
    if command.contains('/') {
        let path = PathBuf::from(command);
        if args.platform.is_file(&path) {
            return Ok(path);
        }
        return Err(Box::new(PhaseResult::fail(
            FailureClass::MissingDependency,
            format!("UI entry command {command:?} does not exist"),
        )));
    }
    args.platform.look_path(command).ok_or_else(|| {
        Box::new(
            PhaseResult::fail(
                FailureClass::MissingDependency,
                format!("required command {command:?} not found on PATH"),
            )
            .with_remediation(format!("install {command} and ensure it is on PATH")),
        )
    })
}

fn smoke_against(
    args: &UiSmokeArgs<'_>,
    probe: &dyn HandshakeProbe,
    entry: &UiEntry,
) -> PhaseResult {
    let platform = args.platform;
    let config = &args.profile.ui_smoke;
    let started_ms = platform.now_epoch_ms();

    // Step 2: poll for a listening socket with exponential backoff.
    let listen_deadline = started_ms + config.effective_timeout().as_millis();
    let mut backoff = BACKOFF_START;
    loop {
        if args.cancel.is_cancelled() {
            return PhaseResult::fail(FailureClass::Cancelled, "UI smoke cancelled");
        }
        if platform.dial_tcp("127.0.0.1", entry.port, DIAL_TIMEOUT) {
            break;
        }
        if platform.now_epoch_ms() >= listen_deadline {
            return PhaseResult::fail(
                FailureClass::Timeout,
                format!(
                    "UI process never reached listening on port {} within {}ms",
                    entry.port,
                    config.effective_timeout().as_millis()
                ),
            )
            .with_remediation("check ui-smoke.log for startup errors");
        }
        platform.sleep(backoff);
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
    let listening_ms = platform.now_epoch_ms().saturating_sub(started_ms);

    let mut result = PhaseResult::ok();
    result.observe(
        ObservationSeverity::Info,
        format!(
            "UI `{}` listening on port {} after {listening_ms}ms",
            entry.script, entry.port
        ),
    );

    // Step 3: one HTTP probe must complete.
    let url = format!("http://127.0.0.1:{}/", entry.port);
    match platform.http_get(&url, PROBE_TIMEOUT) {
        Ok(probe_response) => {
            result.observe(
                ObservationSeverity::Info,
                format!("HTTP probe completed with status {}", probe_response.status),
            );
        }
        Err(err) => {
            return PhaseResult::fail(
                FailureClass::TestFailure,
                format!("HTTP probe failed: {err}"),
            )
            .with_remediation("the UI accepted the connection but did not answer HTTP");
        }
    }

    // Step 4: wait for any handshake signal to evaluate truthy.
    let signals = config.effective_signals();
    let handshake_started_ms = platform.now_epoch_ms();
    match probe.await_signal(
        platform,
        &url,
        &signals,
        config.effective_handshake_timeout(),
        args.cancel,
    ) {
        HandshakeOutcome::Signal(signal) => {
            let waited = platform.now_epoch_ms().saturating_sub(handshake_started_ms);
            result.observe(
                ObservationSeverity::Success,
                format!("handshake signal {signal:?} observed after {waited}ms"),
            );
            result
        }
        HandshakeOutcome::TimedOut => PhaseResult::fail(
            FailureClass::TestFailure,
            format!(
                "no handshake signal appeared within {}ms (checked: {})",
                config.effective_handshake_timeout().as_millis(),
                signals.join(", ")
            ),
        )
        .with_remediation("ensure the UI shell renders one of the handshake signals"),
        HandshakeOutcome::Cancelled => {
            PhaseResult::fail(FailureClass::Cancelled, "UI smoke cancelled")
        }
    }
}

/// Terminate the UI process: graceful signal, bounded grace, forced kill.
fn stop_ui(_platform: &dyn Platform, handle: &mut dyn ProcessHandle) {
    let stop = CancelToken::new();
    stop.cancel();
    let _ = handle.wait(&stop, None);
}
