//! Append-only sink for run records and snapshots.
//!
//! The engine itself never persists history; callers hand it a `Store`
//! implementation (or none). The bundled [`JsonlStore`] appends one JSON
//! document per line under a caller-chosen directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::engine::RunRecord;
use crate::snapshot::Snapshot;

pub trait Store {
    fn append_run(&mut self, record: &RunRecord) -> Result<()>;
    fn append_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// File-backed reference store: `runs.jsonl` and `snapshots.jsonl`.
pub struct JsonlStore {
    runs_path: PathBuf,
    snapshots_path: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            runs_path: dir.join("runs.jsonl"),
            snapshots_path: dir.join("snapshots.jsonl"),
        }
    }

    fn append_line(path: &Path, line: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store dir {}", parent.display()))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open store file {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("append to {}", path.display()))?;
        Ok(())
    }
}

impl Store for JsonlStore {
    fn append_run(&mut self, record: &RunRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serialize run record")?;
        Self::append_line(&self.runs_path, &line)
    }

    fn append_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let line = serde_json::to_string(snapshot).context("serialize snapshot")?;
        Self::append_line(&self.snapshots_path, &line)
    }
}
