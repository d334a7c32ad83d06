//! Config rule family: scenario configuration files must be well-formed
//! and complete enough for the harness to run.

use std::path::Path;

use crate::audit::fix::Patch;
use crate::audit::{RuleCategory, RuleSeverity, Violation};
use crate::classify::{Language, ScenarioProfile};

use super::{violation_at, Rule};

/// `.vrooli/testing.json` must parse as a JSON object.
pub struct TestingJsonParses;

impl Rule for TestingJsonParses {
    fn id(&self) -> &'static str {
        "config.testing-json-parses"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Config
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::High
    }

    fn applies(&self, path: &Path, _profile: &ScenarioProfile) -> bool {
        path.ends_with(".vrooli/testing.json")
    }

    fn check(&self, content: &[u8], path: &Path) -> Vec<Violation> {
        match serde_json::from_slice::<serde_json::Value>(content) {
            Ok(value) if value.is_object() => Vec::new(),
            Ok(_) => vec![violation_at(
                self,
                path,
                0,
                "testing.json is not an object",
                "testing.json parses but the top level is not a JSON object",
                "wrap the configuration in a top-level object",
            )],
            Err(err) => {
                let line = u32::try_from(err.line()).unwrap_or(0);
                vec![violation_at(
                    self,
                    path,
                    line,
                    "testing.json does not parse",
                    format!("testing.json is not valid JSON: {err}"),
                    "fix the JSON syntax so the harness can read the config",
                )]
            }
        }
    }
}

/// Node scenarios must declare a test script in the root `package.json`.
pub struct PackageTestScript;

impl Rule for PackageTestScript {
    fn id(&self) -> &'static str {
        "config.package-test-script"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Config
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Medium
    }

    fn applies(&self, path: &Path, profile: &ScenarioProfile) -> bool {
        profile.has_language(Language::Node) && path == profile.path.join("package.json")
    }

    fn check(&self, content: &[u8], path: &Path) -> Vec<Violation> {
        let Ok(manifest) = serde_json::from_slice::<serde_json::Value>(content) else {
            return vec![violation_at(
                self,
                path,
                0,
                "package.json does not parse",
                "package.json is not valid JSON",
                "fix the manifest syntax",
            )];
        };
        let has_test = manifest
            .get("scripts")
            .and_then(|scripts| scripts.get("test"))
            .and_then(|script| script.as_str())
            .is_some_and(|script| !script.trim().is_empty());
        if has_test {
            Vec::new()
        } else {
            vec![violation_at(
                self,
                path,
                0,
                "package.json lacks a test script",
                "no scripts.test entry; the Node unit phase cannot run",
                "add a \"test\" entry under \"scripts\"",
            )]
        }
    }

    fn fix(&self, violation: &Violation, content: &[u8]) -> Option<Patch> {
        if violation.title.contains("does not parse") {
            return None;
        }
        let mut manifest: serde_json::Value = serde_json::from_slice(content).ok()?;
        let object = manifest.as_object_mut()?;
        let scripts = object
            .entry("scripts")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        let scripts = scripts.as_object_mut()?;
        if scripts.contains_key("test") {
            return None;
        }
        scripts.insert(
            "test".to_string(),
            serde_json::Value::String("node --test".to_string()),
        );
        let replacement = format!("{}\n", serde_json::to_string_pretty(&manifest).ok()?);
        Some(Patch {
            file_path: violation.file_path.clone(),
            description: "add a default node --test script".to_string(),
            expected: String::from_utf8_lossy(content).to_string(),
            replacement,
        })
    }
}

/// `requirements/index.json` must be an object with a string-array
/// `modules` key.
pub struct RequirementsIndexShape;

impl Rule for RequirementsIndexShape {
    fn id(&self) -> &'static str {
        "config.requirements-index-shape"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Config
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Medium
    }

    fn applies(&self, path: &Path, profile: &ScenarioProfile) -> bool {
        path == profile.path.join("requirements/index.json")
    }

    fn check(&self, content: &[u8], path: &Path) -> Vec<Violation> {
        let Ok(index) = serde_json::from_slice::<serde_json::Value>(content) else {
            return vec![violation_at(
                self,
                path,
                0,
                "requirements index does not parse",
                "requirements/index.json is not valid JSON",
                "fix the index syntax",
            )];
        };
        let modules_ok = index
            .get("modules")
            .and_then(|modules| modules.as_array())
            .is_some_and(|modules| modules.iter().all(serde_json::Value::is_string));
        if modules_ok {
            Vec::new()
        } else {
            vec![violation_at(
                self,
                path,
                0,
                "requirements index has the wrong shape",
                "index.json must hold a \"modules\" array of file names",
                "declare {\"modules\": [\"<module file>\", ...]}",
            )]
        }
    }
}
