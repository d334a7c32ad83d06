//! Subprocess lifecycle: spawn, streamed output, bounded wait, termination.
//!
//! Children are placed in their own process group so termination reliably
//! reaches descendants. Two launch failures are distinguished: the command
//! not existing at all, and the OS refusing the spawn. A child that ran and
//! exited non-zero is not an error here; callers classify the exit status.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::{discard_sink, CancelToken, OutputSink};

/// Grace period between the graceful signal and the forced kill.
const TERM_GRACE: Duration = Duration::from_secs(5);
/// Poll interval while waiting on a child.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Launch failure: no child process exists.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("command not found: {0}")]
    MissingCommand(String),
    #[error("launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a wait concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited { code: i32 },
    Signalled { signal: i32 },
    TimedOut,
    Cancelled,
}

impl WaitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, WaitOutcome::Exited { code: 0 })
    }
}

/// Everything needed to launch one subprocess.
///
/// `env` entries are additions on top of the inherited environment. Output
/// is streamed into the sinks from pump threads; nothing is buffered here.
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub stdout: OutputSink,
    pub stderr: OutputSink,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            stdout: discard_sink(),
            stderr: discard_sink(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }
}

/// A running (or finished) subprocess owned by exactly one caller.
pub trait ProcessHandle {
    fn pid(&self) -> u32;

    /// Wait for exit, honoring cancellation and an optional wall-clock
    /// budget. On cancel or timeout the child is signalled gracefully, then
    /// killed after the grace period. Output pumps are drained before
    /// returning.
    fn wait(&mut self, cancel: &CancelToken, timeout: Option<Duration>) -> WaitOutcome;

    /// Graceful stop signal to the process group.
    fn terminate(&mut self);

    /// Forced kill of the process group.
    fn kill(&mut self);
}

pub(crate) fn spawn_host(spec: SpawnSpec) -> Result<Box<dyn ProcessHandle>, SpawnError> {
    let SpawnSpec {
        program,
        args,
        env,
        cwd,
        stdout,
        stderr,
    } = spec;

    let mut cmd = Command::new(&program);
    cmd.args(&args);
    for (key, value) in &env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // New process group so group signals reach descendants.
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().map_err(|source| {
        let name = program.display().to_string();
        if source.kind() == std::io::ErrorKind::NotFound {
            SpawnError::MissingCommand(name)
        } else {
            SpawnError::Launch {
                program: name,
                source,
            }
        }
    })?;

    let mut pumps = Vec::with_capacity(2);
    if let Some(mut out) = child.stdout.take() {
        let mut sink = stdout;
        pumps.push(std::thread::spawn(move || {
            let _ = std::io::copy(&mut out, &mut sink);
        }));
    }
    if let Some(mut err) = child.stderr.take() {
        let mut sink = stderr;
        pumps.push(std::thread::spawn(move || {
            let _ = std::io::copy(&mut err, &mut sink);
        }));
    }

    Ok(Box::new(HostProcess { child, pumps }))
}

struct HostProcess {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
}

impl HostProcess {
    fn drain_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }

    /// Signal, wait out the grace period, then kill. Returns once the child
    /// is gone and output is drained.
    fn shutdown(&mut self, outcome: WaitOutcome) -> WaitOutcome {
        self.terminate();
        let grace_deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < grace_deadline {
            if matches!(self.child.try_wait(), Ok(Some(_))) {
                self.drain_pumps();
                return outcome;
            }
            std::thread::sleep(WAIT_POLL);
        }
        self.kill();
        let _ = self.child.wait();
        self.drain_pumps();
        outcome
    }

    fn signal_group(&self, signal: i32) {
        #[cfg(unix)]
        {
            let pid = self.child.id() as libc::pid_t;
            if pid > 0 {
                unsafe {
                    libc::kill(-pid, signal);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
        }
    }
}

impl ProcessHandle for HostProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn wait(&mut self, cancel: &CancelToken, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|budget| Instant::now() + budget);
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.drain_pumps();
                    return exit_outcome(&status);
                }
                Ok(None) => {}
                Err(_) => {
                    self.kill();
                    let _ = self.child.wait();
                    self.drain_pumps();
                    return WaitOutcome::Exited { code: -1 };
                }
            }
            if cancel.is_cancelled() {
                tracing::debug!(pid = self.child.id(), "cancelling subprocess");
                return self.shutdown(WaitOutcome::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::debug!(pid = self.child.id(), "subprocess exceeded budget");
                    return self.shutdown(WaitOutcome::TimedOut);
                }
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
        let _ = self.child.kill();
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        // Last-resort cleanup if a caller leaked the handle mid-run.
        if let Ok(None) = self.child.try_wait() {
            self.kill();
            let _ = self.child.wait();
        }
        self.drain_pumps();
    }
}

#[cfg(unix)]
fn exit_outcome(status: &std::process::ExitStatus) -> WaitOutcome {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        WaitOutcome::Exited { code }
    } else {
        WaitOutcome::Signalled {
            signal: status.signal().unwrap_or(0),
        }
    }
}

#[cfg(not(unix))]
fn exit_outcome(status: &std::process::ExitStatus) -> WaitOutcome {
    WaitOutcome::Exited {
        code: status.code().unwrap_or(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("sink lock")).to_string()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("sink lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn spawn_streams_stdout_and_reports_exit() {
        let sink = SharedSink::default();
        let spec = SpawnSpec::new("sh")
            .args(["-c", "echo streamed"])
            .stdout(Box::new(sink.clone()));
        let mut handle = spawn_host(spec).expect("spawn sh");
        let outcome = handle.wait(&CancelToken::new(), Some(Duration::from_secs(10)));
        assert!(outcome.success());
        assert_eq!(sink.contents().trim(), "streamed");
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let spec = SpawnSpec::new("sh").args(["-c", "exit 3"]);
        let mut handle = spawn_host(spec).expect("spawn sh");
        let outcome = handle.wait(&CancelToken::new(), Some(Duration::from_secs(10)));
        assert_eq!(outcome, WaitOutcome::Exited { code: 3 });
    }

    #[test]
    fn missing_command_is_distinguished_from_launch_failure() {
        let spec = SpawnSpec::new("definitely-not-a-real-command-xyz");
        match spawn_host(spec) {
            Err(SpawnError::MissingCommand(name)) => {
                assert!(name.contains("definitely-not-a-real-command"));
            }
            Err(other) => panic!("expected MissingCommand, got {other:?}"),
            Ok(_) => panic!("expected MissingCommand, got Ok(_)"),
        }
    }

    #[test]
    fn timeout_terminates_the_child() {
        let spec = SpawnSpec::new("sh").args(["-c", "sleep 30"]);
        let mut handle = spawn_host(spec).expect("spawn sh");
        let started = Instant::now();
        let outcome = handle.wait(&CancelToken::new(), Some(Duration::from_millis(200)));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // sleep dies on SIGTERM, so the grace period is not exhausted.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancel_terminates_the_child() {
        let cancel = CancelToken::new();
        let spec = SpawnSpec::new("sh").args(["-c", "sleep 30"]);
        let mut handle = spawn_host(spec).expect("spawn sh");
        cancel.cancel();
        let outcome = handle.wait(&cancel, None);
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}
