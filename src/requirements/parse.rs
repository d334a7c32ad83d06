//! Requirement module parsing: markdown bullets and JSON modules.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::platform::Platform;

use super::{
    Criticality, DeclaredStatus, LiveStatus, ModuleIndex, Requirement, RequirementModule,
};

/// Bullet grammar: `- [REQ-1] Title {status=complete, criticality=high, prd=PRD-3}`.
fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*-\s*\[([A-Za-z0-9._:-]+)\]\s*([^{]+?)\s*(?:\{([^}]*)\})?\s*$")
            .expect("bullet regex")
    })
}

#[derive(Deserialize)]
struct IndexFile {
    modules: Vec<String>,
}

#[derive(Deserialize)]
struct JsonModule {
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    requirements: Vec<JsonRequirement>,
}

#[derive(Deserialize)]
struct JsonRequirement {
    id: String,
    title: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    criticality: Option<String>,
    #[serde(default)]
    prd_ref: Option<String>,
}

/// Load every requirement module for a scenario.
///
/// With `requirements/index.json` present, only listed files are parsed in
/// listed order; otherwise all `*.md`/`*.json` files in lexicographic order.
pub fn load_module_index(platform: &dyn Platform, scenario_root: &Path) -> Result<ModuleIndex> {
    let requirements_dir = scenario_root.join("requirements");
    if !platform.is_dir(&requirements_dir) {
        return Ok(ModuleIndex::default());
    }

    let module_paths = module_paths(platform, &requirements_dir)?;
    let mut modules = Vec::new();
    for path in module_paths {
        let bytes = platform
            .read_file(&path)
            .with_context(|| format!("read requirement module {}", path.display()))?;
        let module = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => parse_json_module(&bytes, &path)
                .with_context(|| format!("parse {}", path.display()))?,
            _ => parse_md_module(&bytes, &path),
        };
        modules.push(module);
    }
    Ok(ModuleIndex { modules })
}

fn module_paths(platform: &dyn Platform, requirements_dir: &Path) -> Result<Vec<PathBuf>> {
    let index_path = requirements_dir.join("index.json");
    if platform.is_file(&index_path) {
        let bytes = platform
            .read_file(&index_path)
            .context("read requirements/index.json")?;
        let index: IndexFile =
            serde_json::from_slice(&bytes).context("parse requirements/index.json")?;
        return Ok(index
            .modules
            .iter()
            .map(|name| requirements_dir.join(name))
            .filter(|path| platform.is_file(path))
            .collect());
    }

    let mut paths: Vec<PathBuf> = platform
        .walk(requirements_dir)
        .context("walk requirements dir")?
        .into_iter()
        .filter(|path| {
            path.parent()
                .is_some_and(|parent| parent == requirements_dir)
        })
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "md" | "json"))
        })
        .filter(|path| path.file_name().is_some_and(|name| name != "index.json"))
        .collect();
    paths.sort();
    Ok(paths)
}

fn parse_json_module(bytes: &[u8], path: &Path) -> Result<RequirementModule> {
    let module: JsonModule = serde_json::from_slice(bytes)?;
    let effective_name = module
        .module
        .unwrap_or_else(|| file_stem(path));
    let requirements = module
        .requirements
        .into_iter()
        .map(|requirement| Requirement {
            id: requirement.id,
            title: requirement.title,
            prd_ref: requirement.prd_ref,
            criticality: requirement
                .criticality
                .as_deref()
                .and_then(Criticality::parse)
                .unwrap_or(Criticality::Medium),
            declared_status: requirement
                .status
                .as_deref()
                .and_then(DeclaredStatus::parse)
                .unwrap_or(DeclaredStatus::Pending),
            live_status: LiveStatus::Unknown,
        })
        .collect();
    Ok(RequirementModule {
        file_path: path.to_path_buf(),
        effective_name,
        requirements,
    })
}

/// Markdown modules: the first `# ` heading names the module; each
/// requirement is one bullet. Unparsable bullets are ignored, and malformed
/// attribute values fall back to defaults.
fn parse_md_module(bytes: &[u8], path: &Path) -> RequirementModule {
    let text = String::from_utf8_lossy(bytes);
    let mut effective_name = None;
    let mut requirements = Vec::new();

    for line in text.lines() {
        if effective_name.is_none() {
            if let Some(heading) = line.strip_prefix("# ") {
                let heading = heading.trim();
                if !heading.is_empty() {
                    effective_name = Some(heading.to_string());
                }
                continue;
            }
        }
        let Some(captures) = bullet_re().captures(line) else {
            continue;
        };
        let id = captures[1].to_string();
        let title = captures[2].trim().to_string();
        let mut declared_status = DeclaredStatus::Pending;
        let mut criticality = Criticality::Medium;
        let mut prd_ref = None;
        if let Some(attrs) = captures.get(3) {
            for attr in attrs.as_str().split(',') {
                let Some((key, value)) = attr.split_once('=') else {
                    continue;
                };
                match key.trim() {
                    "status" => {
                        if let Some(parsed) = DeclaredStatus::parse(value) {
                            declared_status = parsed;
                        }
                    }
                    "criticality" => {
                        if let Some(parsed) = Criticality::parse(value) {
                            criticality = parsed;
                        }
                    }
                    "prd" => {
                        let value = value.trim();
                        if !value.is_empty() {
                            prd_ref = Some(value.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        requirements.push(Requirement {
            id,
            title,
            prd_ref,
            criticality,
            declared_status,
            live_status: LiveStatus::Unknown,
        });
    }

    RequirementModule {
        file_path: path.to_path_buf(),
        effective_name: effective_name.unwrap_or_else(|| file_stem(path)),
        requirements,
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostPlatform;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, body).expect("write");
    }

    #[test]
    fn md_module_parses_heading_and_bullets() {
        let module = parse_md_module(
            br#"# Core auth

Notes about the module.

- [REQ-101] Login works {status=complete, criticality=high, prd=PRD-1}
- [REQ-102] Logout works {status=pending}
- not a requirement bullet
- [REQ-103] Default attributes
"#,
            Path::new("/s/requirements/auth.md"),
        );
        assert_eq!(module.effective_name, "Core auth");
        assert_eq!(module.requirements.len(), 3);
        let first = &module.requirements[0];
        assert_eq!(first.id, "REQ-101");
        assert_eq!(first.title, "Login works");
        assert_eq!(first.declared_status, DeclaredStatus::Complete);
        assert_eq!(first.criticality, Criticality::High);
        assert_eq!(first.prd_ref.as_deref(), Some("PRD-1"));
        let third = &module.requirements[2];
        assert_eq!(third.declared_status, DeclaredStatus::Pending);
        assert_eq!(third.criticality, Criticality::Medium);
    }

    #[test]
    fn malformed_attribute_values_fall_back() {
        let module = parse_md_module(
            b"- [REQ-1] Thing {status=bogus, criticality=extreme, prd=}\n",
            Path::new("/s/requirements/m.md"),
        );
        let requirement = &module.requirements[0];
        assert_eq!(requirement.declared_status, DeclaredStatus::Pending);
        assert_eq!(requirement.criticality, Criticality::Medium);
        assert!(requirement.prd_ref.is_none());
    }

    #[test]
    fn json_module_parses() {
        let module = parse_json_module(
            br#"{"module": "billing", "requirements": [
                {"id": "REQ-201", "title": "Invoices render", "status": "in_progress", "criticality": "critical", "prd_ref": "PRD-2"}
            ]}"#,
            Path::new("/s/requirements/billing.json"),
        )
        .expect("parse json module");
        assert_eq!(module.effective_name, "billing");
        assert_eq!(module.requirements[0].declared_status, DeclaredStatus::InProgress);
        assert_eq!(module.requirements[0].criticality, Criticality::Critical);
    }

    #[test]
    fn index_json_restricts_and_orders_modules() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "requirements/b.md", "- [REQ-B] B\n");
        write(root.path(), "requirements/a.md", "- [REQ-A] A\n");
        write(root.path(), "requirements/ignored.md", "- [REQ-X] X\n");
        write(
            root.path(),
            "requirements/index.json",
            r#"{"modules": ["b.md", "a.md"]}"#,
        );
        let index = load_module_index(&platform, root.path()).expect("load");
        let names: Vec<_> = index
            .modules
            .iter()
            .map(|module| module.effective_name.clone())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn without_index_all_modules_load_sorted() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        write(root.path(), "requirements/z.md", "- [REQ-Z] Z\n");
        write(root.path(), "requirements/a.md", "- [REQ-A] A\n");
        write(root.path(), "requirements/notes.txt", "not a module\n");
        let index = load_module_index(&platform, root.path()).expect("load");
        let names: Vec<_> = index
            .modules
            .iter()
            .map(|module| module.effective_name.clone())
            .collect();
        assert_eq!(names, vec!["a", "z"]);
    }

    #[test]
    fn missing_requirements_dir_is_empty_index() {
        let platform = HostPlatform::new();
        let root = tempfile::tempdir().expect("temp root");
        let index = load_module_index(&platform, root.path()).expect("load");
        assert_eq!(index.total(), 0);
    }
}
