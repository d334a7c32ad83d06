use std::path::Path;

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_bytes(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    truncate_string(&text, max_bytes)
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Last `max_lines` lines of `text`, bounded by `max_bytes`.
pub fn tail_snippet(text: &str, max_lines: usize, max_bytes: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let tail = lines[start..].join("\n");
    truncate_string(&tail, max_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_string(text, 3);
        assert!(truncated.len() <= 3);
        assert!(text.starts_with(&truncated));
    }

    #[test]
    fn tail_snippet_keeps_last_lines() {
        let text = "one\ntwo\nthree\nfour";
        assert_eq!(tail_snippet(text, 2, 1024), "three\nfour");
    }

    #[test]
    fn display_path_relativizes_under_base() {
        let base = Path::new("/scenarios/demo");
        let path = Path::new("/scenarios/demo/api/go.mod");
        assert_eq!(display_path(path, Some(base)), "api/go.mod");
        assert_eq!(
            display_path(path, Some(Path::new("/other"))),
            path.display().to_string()
        );
    }
}
