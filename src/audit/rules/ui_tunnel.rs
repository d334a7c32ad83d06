//! UI secure-tunnel rule: server-side UI code must route API traffic
//! through a `proxyToApi` helper instead of calling the API directly.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::audit::{RuleCategory, RuleSeverity, Violation};
use crate::classify::ScenarioProfile;

use super::{violation_at, Rule};

/// Lines on each side of a client call inspected for API references.
const CONTEXT_WINDOW: usize = 3;

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];
const ENTRY_BASENAMES: &[&str] = &["server.", "app.", "index.", "main.", "dev.", "proxy."];

fn definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:function\s+proxyToApi\b|(?:const|let|var)\s+proxyToApi\b|proxyToApi\s*=)")
            .expect("definition regex")
    })
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"proxyToApi\s*\(").expect("call regex"))
}

fn client_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:fetch\s*\(|axios|http\.request|http\.get)").expect("client regex")
    })
}

fn api_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:API_PORT|localhost|https?://)").expect("reference regex"))
}

pub struct UiSecureTunnel;

impl Rule for UiSecureTunnel {
    fn id(&self) -> &'static str {
        "ui.secure-tunnel"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Ui
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::High
    }

    fn applies(&self, path: &Path, _profile: &ScenarioProfile) -> bool {
        let is_js = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| JS_EXTENSIONS.contains(&ext));
        if !is_js {
            return false;
        }
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let looks_like_entry = ENTRY_BASENAMES
            .iter()
            .any(|prefix| basename.starts_with(prefix));
        let full = path.to_string_lossy().to_ascii_lowercase();
        looks_like_entry || full.contains("/server") || full.contains("/proxy")
    }

    fn check(&self, content: &[u8], path: &Path) -> Vec<Violation> {
        let text = String::from_utf8_lossy(content);
        if !text.contains("API_PORT") {
            return Vec::new();
        }
        let uses_express = text.contains("express");
        let mentions_proxy = text.contains("proxyToApi");
        if !uses_express && !mentions_proxy {
            return Vec::new();
        }

        let lines: Vec<&str> = text.lines().collect();
        let definition = find_definition(&lines);
        let direct_calls = direct_client_calls(&lines, definition.as_ref());

        let mut violations = Vec::new();
        match &definition {
            None => {
                // Mode 1: talking to the API with no tunnel defined at all.
                let line = direct_calls
                    .first()
                    .map(|call| call.line)
                    .or_else(|| first_line_containing(&lines, "API_PORT"))
                    .unwrap_or(0);
                violations.push(violation_at(
                    self,
                    path,
                    line,
                    "API traffic without proxyToApi",
                    "file talks to the API but defines no proxyToApi tunnel",
                    "define a proxyToApi helper and route all API traffic through it",
                ));
            }
            Some(definition) => {
                let called = lines.iter().enumerate().any(|(idx, line)| {
                    idx != definition.line_idx
                        && call_re().is_match(line)
                        && !definition_re().is_match(line)
                });
                if !called {
                    if let Some(call) = direct_calls.iter().find(|call| call.outside_scope) {
                        // Mode 2: tunnel exists, route handlers bypass it.
                        violations.push(violation_at(
                            self,
                            path,
                            call.line,
                            "proxyToApi defined but unused",
                            "proxyToApi is defined but never called; route handlers reach the API directly",
                            "call proxyToApi from route handlers instead of issuing direct requests",
                        ));
                    }
                }
                // Mode 3: direct client calls outside the tunnel's scope that
                // reference the API within the surrounding window.
                for call in direct_calls
                    .iter()
                    .filter(|call| call.outside_scope && call.references_api)
                {
                    violations.push(violation_at(
                        self,
                        path,
                        call.line,
                        "direct API call bypasses proxyToApi",
                        format!(
                            "direct HTTP client call on line {} bypasses proxyToApi",
                            call.line
                        ),
                        "route this request through proxyToApi",
                    ));
                }
            }
        }
        violations
    }
}

struct Definition {
    line_idx: usize,
    /// Inclusive line range of the definition's textual scope.
    scope: (usize, usize),
}

struct DirectCall {
    /// 1-based line number.
    line: u32,
    outside_scope: bool,
    references_api: bool,
}

fn find_definition(lines: &[&str]) -> Option<Definition> {
    let line_idx = lines.iter().position(|line| definition_re().is_match(line))?;
    Some(Definition {
        line_idx,
        scope: scope_of(lines, line_idx),
    })
}

/// Textual scope: from the definition line to the line where its opening
/// brace closes. Definitions with no body (aliases) scope to their own line.
fn scope_of(lines: &[&str], start: usize) -> (usize, usize) {
    let mut depth: i32 = 0;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return (start, start + offset);
        }
    }
    if opened {
        (start, lines.len().saturating_sub(1))
    } else {
        (start, start)
    }
}

fn direct_client_calls(lines: &[&str], definition: Option<&Definition>) -> Vec<DirectCall> {
    let mut calls = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        // Logging is not API traffic.
        if line.contains("console.") {
            continue;
        }
        if !client_re().is_match(line) {
            continue;
        }
        let outside_scope = definition
            .map(|definition| idx < definition.scope.0 || idx > definition.scope.1)
            .unwrap_or(true);
        let window_start = idx.saturating_sub(CONTEXT_WINDOW);
        let window_end = (idx + CONTEXT_WINDOW).min(lines.len().saturating_sub(1));
        let references_api = lines[window_start..=window_end]
            .iter()
            .any(|nearby| api_reference_re().is_match(nearby));
        calls.push(DirectCall {
            line: (idx + 1) as u32,
            outside_scope,
            references_api,
        });
    }
    calls
}

fn first_line_containing(lines: &[&str], needle: &str) -> Option<u32> {
    lines
        .iter()
        .position(|line| line.contains(needle))
        .map(|idx| (idx + 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ViolationSet;
    use std::path::PathBuf;

    fn check(source: &str) -> Vec<Violation> {
        let rule = UiSecureTunnel;
        rule.check(source.as_bytes(), Path::new("ui/server.js"))
    }

    fn profile_stub() -> ScenarioProfile {
        ScenarioProfile {
            path: PathBuf::from("/s"),
            name: "s".to_string(),
            languages: Default::default(),
            has_api: true,
            has_cli: false,
            has_ui: true,
            has_seeds: false,
            ui_smoke: Default::default(),
            existence_requirements: Vec::new(),
            config_warnings: Vec::new(),
        }
    }

    #[test]
    fn applies_to_server_like_js_only() {
        let rule = UiSecureTunnel;
        let profile = profile_stub();
        assert!(rule.applies(Path::new("ui/server.js"), &profile));
        assert!(rule.applies(Path::new("ui/src/proxy/setup.ts"), &profile));
        assert!(rule.applies(Path::new("ui/main.tsx"), &profile));
        assert!(!rule.applies(Path::new("ui/components/button.jsx"), &profile));
        assert!(!rule.applies(Path::new("ui/server.py"), &profile));
    }

    #[test]
    fn missing_tunnel_fires_once() {
        let source = r#"
const express = require('express');
const app = express();
app.get('/api/x', async (req, res) => {
  const data = await fetch(`http://localhost:${API_PORT}/api/x`);
  res.json(await data.json());
});
"#;
        let violations = check(source);
        let set = ViolationSet::from_raw(violations);
        assert_eq!(set.len(), 1);
        let violation = &set.violations[0];
        assert_eq!(violation.severity, RuleSeverity::High);
        assert_eq!(violation.line, 5);
    }

    #[test]
    fn no_api_port_reference_is_clean() {
        let source = r#"
const express = require('express');
fetch('https://example.com/feed');
"#;
        assert!(check(source).is_empty());
    }

    #[test]
    fn tunnel_defined_and_used_is_clean() {
        let source = r#"
const express = require('express');
function proxyToApi(req, path) {
  return fetch(`http://localhost:${API_PORT}${path}`);
}
app.get('/api/x', (req, res) => proxyToApi(req, '/api/x'));
"#;
        assert!(check(source).is_empty());
    }

    #[test]
    fn tunnel_defined_but_bypassed_fires_unused_and_direct() {
        let source = r#"
const express = require('express');
function proxyToApi(req, path) {
  return fetch(`http://localhost:${API_PORT}${path}`);
}
app.get('/api/y', async (req, res) => {
  const data = await fetch(`http://localhost:${API_PORT}/api/y`);
  res.json(await data.json());
});
"#;
        let violations = check(source);
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .any(|violation| violation.title.contains("unused")));
        assert!(violations
            .iter()
            .any(|violation| violation.title.contains("bypasses")));
    }

    #[test]
    fn console_log_lines_are_ignored() {
        let source = r#"
const express = require('express');
function proxyToApi(req, path) {
  return fetch(`http://localhost:${API_PORT}${path}`);
}
app.get('/api/x', (req, res) => proxyToApi(req, '/api/x'));
console.log(`api at http.get http://localhost:${API_PORT}`);
"#;
        assert!(check(source).is_empty());
    }

    #[test]
    fn call_inside_tunnel_scope_is_not_flagged() {
        let source = r#"
const express = require('express');
const proxyToApi = async (path) => {
  const url = `http://localhost:${API_PORT}${path}`;
  return http.request(url);
};
app.get('/api/z', (req, res) => proxyToApi('/api/z'));
"#;
        assert!(check(source).is_empty());
    }
}
