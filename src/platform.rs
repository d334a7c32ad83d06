//! Platform facade: every side-effectful operation the engine performs.
//!
//! All filesystem, environment, clock, subprocess, and network access flows
//! through [`Platform`] so the rest of the core is deterministically testable
//! by substitution. Operations return typed errors and never panic.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub mod process;
pub mod probe;

pub use process::{ProcessHandle, SpawnError, SpawnSpec, WaitOutcome};
pub use probe::HttpProbe;

/// Directory names never descended into during scenario walks.
const WALK_PRUNE: &[&str] = &[".git", "node_modules", "target", "__pycache__", "dist", ".venv"];

/// Typed error for facade operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("http {url}: {reason}")]
    Http { url: String, reason: String },
}

impl PlatformError {
    fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Cooperative cancellation token, one per run.
///
/// Cloning shares the underlying flag; cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Abstraction over OS interaction. The engine depends on this and nothing
/// else for side effects.
pub trait Platform {
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, PlatformError>;
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), PlatformError>;
    fn mkdir_all(&self, path: &Path) -> Result<(), PlatformError>;
    fn remove(&self, path: &Path) -> Result<(), PlatformError>;

    /// All regular files under `root`, pruned of VCS/build directories,
    /// sorted for deterministic iteration.
    fn walk(&self, root: &Path) -> Result<Vec<PathBuf>, PlatformError>;

    /// Files under `root` whose name ends with `suffix` (e.g. `.go`),
    /// same pruning and ordering as `walk`.
    fn glob(&self, root: &Path, suffix: &str) -> Result<Vec<PathBuf>, PlatformError> {
        Ok(self
            .walk(root)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().ends_with(suffix))
            })
            .collect())
    }

    fn env(&self, key: &str) -> Option<String>;
    fn environ(&self) -> Vec<(String, String)>;

    fn now_epoch_ms(&self) -> u128;
    fn sleep(&self, duration: Duration);

    fn look_path(&self, name: &str) -> Option<PathBuf>;

    fn spawn(&self, spec: SpawnSpec) -> Result<Box<dyn ProcessHandle>, SpawnError>;

    fn dial_tcp(&self, host: &str, port: u16, timeout: Duration) -> bool;
    fn http_get(&self, url: &str, timeout: Duration) -> Result<HttpProbe, PlatformError>;
}

/// Production facade backed by the host OS.
#[derive(Debug, Clone, Default)]
pub struct HostPlatform;

impl HostPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for HostPlatform {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, PlatformError> {
        std::fs::read(path).map_err(|err| PlatformError::io("read", path, err))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), PlatformError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| PlatformError::io("create dir for", path, err))?;
        }
        std::fs::write(path, contents).map_err(|err| PlatformError::io("write", path, err))
    }

    fn mkdir_all(&self, path: &Path) -> Result<(), PlatformError> {
        std::fs::create_dir_all(path).map_err(|err| PlatformError::io("mkdir", path, err))
    }

    fn remove(&self, path: &Path) -> Result<(), PlatformError> {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        result.map_err(|err| PlatformError::io("remove", path, err))
    }

    fn walk(&self, root: &Path) -> Result<Vec<PathBuf>, PlatformError> {
        let mut files = Vec::new();
        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && WALK_PRUNE.contains(&name.as_ref()))
            });
        for entry in walker {
            let entry = entry.map_err(|err| PlatformError::Io {
                op: "walk",
                path: root.to_path_buf(),
                source: err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk loop")),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn environ(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }

    fn now_epoch_ms(&self) -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn look_path(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn spawn(&self, spec: SpawnSpec) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        process::spawn_host(spec)
    }

    fn dial_tcp(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(_) => return false,
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                return true;
            }
        }
        false
    }

    fn http_get(&self, url: &str, timeout: Duration) -> Result<HttpProbe, PlatformError> {
        probe::http_get_host(url, timeout)
    }
}

/// A write sink for streamed subprocess output.
pub type OutputSink = Box<dyn Write + Send>;

/// Sink that discards everything written to it.
pub fn discard_sink() -> OutputSink {
    Box::new(std::io::sink())
}

/// Sink appending to a file, creating parent directories on first write.
pub fn file_sink(path: &Path) -> Result<OutputSink, PlatformError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| PlatformError::io("create dir for", path, err))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| PlatformError::io("open", path, err))?;
    Ok(Box::new(file))
}
