//! Uniform outcome model shared by phases, runners, and the auditor.
//!
//! Every unit of scheduled work reports through [`PhaseResult`] so callers
//! can classify failures without parsing text. The constructors are the only
//! way to build a result, which keeps `success`, `failure_class`, and `error`
//! consistent by construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Machine-readable failure discriminant attached to every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    None,
    Misconfiguration,
    MissingDependency,
    TestFailure,
    RuleViolation,
    Timeout,
    Cancelled,
    System,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureClass::None => "none",
            FailureClass::Misconfiguration => "misconfiguration",
            FailureClass::MissingDependency => "missing_dependency",
            FailureClass::TestFailure => "test_failure",
            FailureClass::RuleViolation => "rule_violation",
            FailureClass::Timeout => "timeout",
            FailureClass::Cancelled => "cancelled",
            FailureClass::System => "system",
        };
        f.write_str(label)
    }
}

/// Severity of a single observation within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSeverity {
    Info,
    Success,
    Warn,
    Error,
}

/// A time-ordered structured note produced during a phase.
///
/// Observations are append-only; callers rely on insertion order surviving
/// serialization round trips.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Observation {
    pub severity: ObservationSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Structured error: human message, machine code, and optional cause chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineError {
    pub message: String,
    pub code: FailureClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<EngineError>>,
}

impl EngineError {
    pub fn new(code: FailureClass, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: EngineError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Flatten an `anyhow` chain into a cause chain, all tagged `code`.
    pub fn from_error_chain(code: FailureClass, err: &anyhow::Error) -> Self {
        let mut links: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        let mut current = None;
        while let Some(message) = links.pop() {
            let mut link = EngineError::new(code, message);
            link.cause = current.map(Box::new);
            current = Some(link);
        }
        current.unwrap_or_else(|| EngineError::new(code, "unknown error"))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        let mut cause = self.cause.as_deref();
        while let Some(link) = cause {
            write!(f, ": {}", link.message)?;
            cause = link.cause.as_deref();
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Uniform outcome record for every phase, runner, and validator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseResult {
    pub success: bool,
    pub failure_class: FailureClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<Observation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, PathBuf>,
}

impl PhaseResult {
    /// Successful result. `failure_class` is pinned to `none` and no error
    /// can be attached afterwards.
    pub fn ok() -> Self {
        Self {
            success: true,
            failure_class: FailureClass::None,
            error: None,
            remediation: None,
            observations: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Failed result with a single-message error.
    pub fn fail(class: FailureClass, message: impl Into<String>) -> Self {
        Self::fail_with(class, EngineError::new(class, message))
    }

    /// Failed result wrapping a pre-built error chain.
    pub fn fail_with(class: FailureClass, error: EngineError) -> Self {
        debug_assert!(class != FailureClass::None, "failed result needs a class");
        Self {
            success: false,
            failure_class: class,
            error: Some(error),
            remediation: None,
            observations: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// Append an observation. Order is preserved.
    pub fn observe(&mut self, severity: ObservationSeverity, message: impl Into<String>) {
        self.observations.push(Observation {
            severity,
            message: message.into(),
            evidence: None,
        });
    }

    /// Append an observation carrying evidence text.
    pub fn observe_with_evidence(
        &mut self,
        severity: ObservationSeverity,
        message: impl Into<String>,
        evidence: impl Into<String>,
    ) {
        self.observations.push(Observation {
            severity,
            message: message.into(),
            evidence: Some(evidence.into()),
        });
    }

    pub fn attach_artifact(&mut self, name: impl Into<String>, path: PathBuf) {
        self.artifacts.insert(name.into(), path);
    }

    /// Check the success/failure-class/error consistency of a
    /// deserialized result.
    pub fn is_consistent(&self) -> bool {
        if self.success {
            self.failure_class == FailureClass::None && self.error.is_none()
        } else {
            self.failure_class != FailureClass::None && self.error.is_some()
        }
    }
}
