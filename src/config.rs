//! Scenario testing configuration from `.vrooli/testing.json`.
//!
//! Absent files yield defaults. Malformed JSON is a hard configuration
//! error (the CLI maps it to exit code 2). Unrecognized keys are collected
//! and surfaced as warning observations, never silently dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::outcome::{Observation, ObservationSeverity};
use crate::platform::Platform;

/// Relative location of the testing config inside a scenario.
pub const TESTING_CONFIG_REL: &str = ".vrooli/testing.json";

/// Built-in UI smoke timeout when the config holds zero.
pub const DEFAULT_UI_SMOKE_TIMEOUT_MS: u64 = 30_000;
/// Built-in handshake timeout when the config holds zero.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Built-in handshake signals when the config declares none.
pub fn default_handshake_signals() -> Vec<String> {
    vec![
        "window.__APP_READY__".to_string(),
        "data-app-ready".to_string(),
        "id=\"root\"".to_string(),
    ]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("malformed testing config {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Top-level shape of `testing.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestingConfig {
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StructureConfig {
    /// Require `requirements/index.json` to exist.
    #[serde(default)]
    pub index_required: bool,
    #[serde(default)]
    pub ui_smoke: UiSmokeConfig,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// UI smoke knobs. Zero timeouts and an empty signal list mean "use the
/// built-in defaults"; the `effective_*` accessors apply them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiSmokeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub handshake_signals: Vec<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl Default for UiSmokeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 0,
            handshake_timeout_ms: 0,
            handshake_signals: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl UiSmokeConfig {
    pub fn effective_timeout(&self) -> Duration {
        let ms = if self.timeout_ms == 0 {
            DEFAULT_UI_SMOKE_TIMEOUT_MS
        } else {
            self.timeout_ms
        };
        Duration::from_millis(ms)
    }

    pub fn effective_handshake_timeout(&self) -> Duration {
        let ms = if self.handshake_timeout_ms == 0 {
            DEFAULT_HANDSHAKE_TIMEOUT_MS
        } else {
            self.handshake_timeout_ms
        };
        Duration::from_millis(ms)
    }

    pub fn effective_signals(&self) -> Vec<String> {
        if self.handshake_signals.is_empty() {
            default_handshake_signals()
        } else {
            self.handshake_signals.clone()
        }
    }
}

/// A parsed config together with unknown-key warnings.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: TestingConfig,
    pub warnings: Vec<Observation>,
}

/// Load the scenario's testing config, or defaults when the file is absent.
///
/// `override_path` replaces the conventional location when set (the CLI's
/// `--config` flag); in that case the file must exist.
pub fn load_testing_config(
    platform: &dyn Platform,
    scenario_root: &Path,
    override_path: Option<&Path>,
) -> Result<LoadedConfig, ConfigError> {
    let path = match override_path {
        Some(path) => path.to_path_buf(),
        None => scenario_root.join(TESTING_CONFIG_REL),
    };
    if !platform.is_file(&path) {
        if override_path.is_some() {
            return Err(ConfigError::Unreadable {
                path,
                reason: "config override does not exist".to_string(),
            });
        }
        return Ok(LoadedConfig::default());
    }

    let bytes = platform
        .read_file(&path)
        .map_err(|err| ConfigError::Unreadable {
            path: path.clone(),
            reason: err.to_string(),
        })?;
    let config: TestingConfig =
        serde_json::from_slice(&bytes).map_err(|err| ConfigError::Malformed {
            path: path.clone(),
            reason: err.to_string(),
        })?;

    let warnings = unknown_key_warnings(&config);
    Ok(LoadedConfig { config, warnings })
}

fn unknown_key_warnings(config: &TestingConfig) -> Vec<Observation> {
    let mut warnings = Vec::new();
    let mut warn = |key: String| {
        warnings.push(Observation {
            severity: ObservationSeverity::Warn,
            message: format!("testing.json: unrecognized key {key:?} ignored"),
            evidence: None,
        });
    };
    for key in config.extra.keys() {
        warn(key.clone());
    }
    for key in config.structure.extra.keys() {
        warn(format!("structure.{key}"));
    }
    for key in config.structure.ui_smoke.extra.keys() {
        warn(format!("structure.ui_smoke.{key}"));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostPlatform;

    fn write_config(root: &Path, body: &str) {
        let path = root.join(TESTING_CONFIG_REL);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, body).expect("write config");
    }

    #[test]
    fn missing_config_yields_defaults() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let loaded =
            load_testing_config(&platform, root.path(), None).expect("load defaults");
        assert!(loaded.config.structure.ui_smoke.enabled);
        assert!(!loaded.config.structure.index_required);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn zero_timeouts_fall_back_to_builtins() {
        let config = UiSmokeConfig::default();
        assert_eq!(
            config.effective_timeout(),
            Duration::from_millis(DEFAULT_UI_SMOKE_TIMEOUT_MS)
        );
        assert_eq!(
            config.effective_handshake_timeout(),
            Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)
        );
        assert_eq!(config.effective_signals(), default_handshake_signals());
    }

    #[test]
    fn recognized_keys_parse_without_warnings() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write_config(
            root.path(),
            r#"{"structure": {"index_required": true, "ui_smoke": {"enabled": false, "timeout_ms": 5000, "handshake_signals": ["ready"]}}}"#,
        );
        let loaded = load_testing_config(&platform, root.path(), None).expect("load");
        assert!(loaded.config.structure.index_required);
        assert!(!loaded.config.structure.ui_smoke.enabled);
        assert_eq!(
            loaded.config.structure.ui_smoke.effective_timeout(),
            Duration::from_millis(5000)
        );
        assert_eq!(
            loaded.config.structure.ui_smoke.effective_signals(),
            vec!["ready".to_string()]
        );
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn unknown_keys_warn_but_do_not_fail() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write_config(
            root.path(),
            r#"{"structure": {"ui_smoke": {"enabled": true, "colour": "blue"}, "depth": 3}, "legacy": {}}"#,
        );
        let loaded = load_testing_config(&platform, root.path(), None).expect("load");
        let messages: Vec<_> = loaded
            .warnings
            .iter()
            .map(|warning| warning.message.clone())
            .collect();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|msg| msg.contains("\"legacy\"")));
        assert!(messages.iter().any(|msg| msg.contains("structure.depth")));
        assert!(messages
            .iter()
            .any(|msg| msg.contains("structure.ui_smoke.colour")));
    }

    #[test]
    fn malformed_config_is_a_hard_error() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write_config(root.path(), "{not json");
        let result = load_testing_config(&platform, root.path(), None);
        assert!(matches!(result, Err(ConfigError::Malformed { .. })));
    }

    #[test]
    fn missing_override_path_is_an_error() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let missing = root.path().join("elsewhere.json");
        let result = load_testing_config(&platform, root.path(), Some(&missing));
        assert!(matches!(result, Err(ConfigError::Unreadable { .. })));
    }
}
