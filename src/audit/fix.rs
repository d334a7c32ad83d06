//! Fix generation and application for auditor violations.
//!
//! A rule may offer a patch for a violation it produced. Patches carry the
//! exact pre-image they were computed against; application validates the
//! target file still matches byte-for-byte and otherwise skips the patch as
//! stale. No patch is ever retried.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::platform::Platform;

use super::rules::RuleCatalog;
use super::ViolationSet;

/// A whole-file replacement proposed by a rule's fixer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Patch {
    pub file_path: PathBuf,
    pub description: String,
    /// Exact content the patch expects to find.
    pub expected: String,
    pub replacement: String,
}

/// What happened to one generated patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    /// Written to disk.
    Applied,
    /// Pre-image no longer matched; skipped.
    Stale,
    /// Generated but not applied (`auto_apply` off).
    ReportOnly,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixEntry {
    pub rule_id: String,
    pub file_path: PathBuf,
    pub description: String,
    pub status: PatchStatus,
    /// Full patch text; present only when `include_patches` was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FixReport {
    pub entries: Vec<FixEntry>,
}

impl FixReport {
    pub fn applied(&self) -> usize {
        self.count(PatchStatus::Applied)
    }

    pub fn stale(&self) -> usize {
        self.count(PatchStatus::Stale)
    }

    fn count(&self, status: PatchStatus) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixOptions {
    pub auto_apply: bool,
    pub include_patches: bool,
}

/// Generate patches for every fixable violation and, when `auto_apply` is
/// set, apply those whose pre-image still matches. Partial success is
/// normal: stale patches are reported and skipped, never retried.
pub fn plan_fixes(
    platform: &dyn Platform,
    catalog: &RuleCatalog,
    violations: &ViolationSet,
    options: FixOptions,
) -> Result<FixReport> {
    let mut entries = Vec::new();
    for violation in &violations.violations {
        let Some(rule) = catalog.rule_by_id(&violation.rule_id) else {
            continue;
        };
        let content = platform
            .read_file(&violation.file_path)
            .with_context(|| format!("read {}", violation.file_path.display()))?;
        let Some(patch) = rule.fix(violation, &content) else {
            continue;
        };

        let status = if options.auto_apply {
            apply_patch(platform, &patch)?
        } else {
            PatchStatus::ReportOnly
        };
        if status == PatchStatus::Applied {
            tracing::info!(
                rule = %violation.rule_id,
                file = %patch.file_path.display(),
                "applied audit fix"
            );
        }
        entries.push(FixEntry {
            rule_id: violation.rule_id.clone(),
            file_path: patch.file_path.clone(),
            description: patch.description.clone(),
            status,
            patch: options.include_patches.then(|| patch.clone()),
        });
    }
    Ok(FixReport { entries })
}

fn apply_patch(platform: &dyn Platform, patch: &Patch) -> Result<PatchStatus> {
    let current = platform
        .read_file(&patch.file_path)
        .with_context(|| format!("read {}", patch.file_path.display()))?;
    if current != patch.expected.as_bytes() {
        return Ok(PatchStatus::Stale);
    }
    platform
        .write_file(&patch.file_path, patch.replacement.as_bytes())
        .with_context(|| format!("write {}", patch.file_path.display()))?;
    Ok(PatchStatus::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::rules::default_catalog;
    use crate::classify::classify;
    use crate::platform::HostPlatform;
    use std::path::Path;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, body).expect("write");
    }

    #[test]
    fn report_only_generates_without_writing() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "package.json", "{\n  \"name\": \"demo\"\n}\n");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let catalog = default_catalog();
        let violations = crate::audit::scan(&platform, &profile, &catalog).expect("scan");
        assert!(!violations.is_empty());

        let report = plan_fixes(
            &platform,
            &catalog,
            &violations,
            FixOptions {
                auto_apply: false,
                include_patches: true,
            },
        )
        .expect("plan fixes");
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].status, PatchStatus::ReportOnly);
        assert!(report.entries[0].patch.is_some());

        let untouched =
            std::fs::read_to_string(root.path().join("package.json")).expect("read back");
        assert_eq!(untouched, "{\n  \"name\": \"demo\"\n}\n");
    }

    #[test]
    fn auto_apply_writes_matching_patches() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "package.json", "{\n  \"name\": \"demo\"\n}\n");
        let profile = classify(&platform, root.path(), None).expect("classify");
        let catalog = default_catalog();
        let violations = crate::audit::scan(&platform, &profile, &catalog).expect("scan");

        let report = plan_fixes(
            &platform,
            &catalog,
            &violations,
            FixOptions {
                auto_apply: true,
                include_patches: false,
            },
        )
        .expect("plan fixes");
        assert_eq!(report.applied(), 1);
        assert!(report.entries[0].patch.is_none());

        let fixed = std::fs::read_to_string(root.path().join("package.json")).expect("read back");
        assert!(fixed.contains("\"test\""));
    }

    #[test]
    fn stale_pre_image_is_skipped() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let patch = Patch {
            file_path: root.path().join("f.json"),
            description: "d".to_string(),
            expected: "old".to_string(),
            replacement: "new".to_string(),
        };
        std::fs::write(&patch.file_path, "drifted").expect("write");
        let status = apply_patch(&platform, &patch).expect("apply");
        assert_eq!(status, PatchStatus::Stale);
        let content = std::fs::read_to_string(&patch.file_path).expect("read");
        assert_eq!(content, "drifted");
    }
}
