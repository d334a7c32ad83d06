//! Scenario classification: decide what a scenario is before running it.
//!
//! Classification is pure over the platform facade; rerunning on unchanged
//! inputs yields identical profiles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{self, ConfigError, UiSmokeConfig};
use crate::outcome::Observation;
use crate::platform::Platform;

/// Relative location of the seeds playbook entrypoint directory.
pub const SEEDS_DIR_REL: &str = "test/playbooks/__seeds";

/// Language runtimes a scenario may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Node,
    Python,
}

impl Language {
    pub fn label(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Node => "node",
            Language::Python => "python",
        }
    }
}

/// What an existence requirement must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Dir,
    File,
}

/// One required path inside the scenario, checked by the existence phase.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExistenceRequirement {
    pub rel_path: String,
    pub kind: PathKind,
}

/// The classifier's determination of what a scenario is. Immutable after
/// construction; the engine and every phase receive shared references.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioProfile {
    pub path: PathBuf,
    pub name: String,
    pub languages: BTreeSet<Language>,
    pub has_api: bool,
    pub has_cli: bool,
    pub has_ui: bool,
    pub has_seeds: bool,
    pub ui_smoke: UiSmokeConfig,
    pub existence_requirements: Vec<ExistenceRequirement>,
    /// Unknown-key warnings from the testing config, replayed into the
    /// existence phase's observations.
    #[serde(skip)]
    pub config_warnings: Vec<Observation>,
}

impl ScenarioProfile {
    pub fn has_language(&self, language: Language) -> bool {
        self.languages.contains(&language)
    }
}

/// Build a [`ScenarioProfile`] for the directory at `scenario_path`.
///
/// Fails only when the scenario root is not a directory or the testing
/// config is malformed; both are startup configuration errors.
pub fn classify(
    platform: &dyn Platform,
    scenario_path: &Path,
    config_override: Option<&Path>,
) -> Result<ScenarioProfile, ConfigError> {
    if !platform.is_dir(scenario_path) {
        return Err(ConfigError::Unreadable {
            path: scenario_path.to_path_buf(),
            reason: "scenario directory does not exist".to_string(),
        });
    }

    let loaded = config::load_testing_config(platform, scenario_path, config_override)?;
    let structure = &loaded.config.structure;

    let mut languages = BTreeSet::new();
    if detect_go(platform, scenario_path) {
        languages.insert(Language::Go);
    }
    if detect_node(platform, scenario_path) {
        languages.insert(Language::Node);
    }
    if detect_python(platform, scenario_path) {
        languages.insert(Language::Python);
    }

    let mut existence_requirements = vec![ExistenceRequirement {
        rel_path: "requirements".to_string(),
        kind: PathKind::Dir,
    }];
    if structure.index_required {
        existence_requirements.push(ExistenceRequirement {
            rel_path: "requirements/index.json".to_string(),
            kind: PathKind::File,
        });
    }

    let name = scenario_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| scenario_path.display().to_string());

    Ok(ScenarioProfile {
        path: scenario_path.to_path_buf(),
        name,
        languages,
        has_api: platform.is_dir(&scenario_path.join("api")),
        has_cli: platform.is_dir(&scenario_path.join("cli")),
        has_ui: detect_ui(platform, scenario_path),
        has_seeds: detect_seeds(platform, scenario_path),
        ui_smoke: structure.ui_smoke.clone(),
        existence_requirements,
        config_warnings: loaded.warnings,
    })
}

fn detect_go(platform: &dyn Platform, root: &Path) -> bool {
    for part in ["api", "cli"] {
        if platform.is_file(&root.join(part).join("go.mod")) {
            return true;
        }
    }
    // Fall back to loose .go sources under api/ or cli/.
    for part in ["api", "cli"] {
        let dir = root.join(part);
        if !platform.is_dir(&dir) {
            continue;
        }
        if let Ok(files) = platform.glob(&dir, ".go") {
            if !files.is_empty() {
                return true;
            }
        }
    }
    false
}

fn detect_node(platform: &dyn Platform, root: &Path) -> bool {
    platform.is_file(&root.join("package.json")) || platform.is_file(&root.join("ui/package.json"))
}

fn detect_python(platform: &dyn Platform, root: &Path) -> bool {
    platform.is_file(&root.join("requirements.txt")) || platform.is_file(&root.join("pyproject.toml"))
}

fn detect_ui(platform: &dyn Platform, root: &Path) -> bool {
    let ui = root.join("ui");
    if !platform.is_dir(&ui) {
        return false;
    }
    if platform.is_file(&ui.join("package.json")) {
        return true;
    }
    // Build manifests count as a UI even without a package manifest.
    ["vite.config.js", "vite.config.ts", "webpack.config.js"]
        .iter()
        .any(|manifest| platform.is_file(&ui.join(manifest)))
}

fn detect_seeds(platform: &dyn Platform, root: &Path) -> bool {
    let seeds = root.join(SEEDS_DIR_REL);
    if !platform.is_dir(&seeds) {
        return false;
    }
    ["apply", "apply.sh"]
        .iter()
        .any(|entry| platform.is_file(&seeds.join(entry)))
}

/// Resolve the seeds apply entrypoint, preferring the bare `apply` name.
pub fn seeds_apply_path(platform: &dyn Platform, root: &Path) -> Option<PathBuf> {
    let seeds = root.join(SEEDS_DIR_REL);
    ["apply", "apply.sh"]
        .iter()
        .map(|entry| seeds.join(entry))
        .find(|path| platform.is_file(path))
}

/// Resolve the optional seeds cleanup entrypoint.
pub fn seeds_cleanup_path(platform: &dyn Platform, root: &Path) -> Option<PathBuf> {
    let seeds = root.join(SEEDS_DIR_REL);
    ["cleanup", "cleanup.sh"]
        .iter()
        .map(|entry| seeds.join(entry))
        .find(|path| platform.is_file(path))
}
