//! Content classification used by `ctx.utils` and the default providers.

use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Json,
    Diff,
    Logs,
    Code,
    Markdown,
    Text,
}

/// Compression strategies exposed under `ctx.compress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressMode {
    Auto,
    Logs,
    Diff,
    Semantic,
}

impl CompressMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Logs => "logs",
            Self::Diff => "diff",
            Self::Semantic => "semantic",
        }
    }
}

/// Structure operations exposed under `ctx.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOperation {
    Parse,
    Extract,
    Skeleton,
}

impl CodeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Extract => "extract",
            Self::Skeleton => "skeleton",
        }
    }
}

const LOG_LEVELS: &[&str] = &["ERROR", "WARN", "INFO", "DEBUG", "TRACE", "FATAL"];

pub fn detect_type(content: &str) -> ContentType {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return ContentType::Text;
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return ContentType::Json;
    }

    let lines: Vec<&str> = content.lines().take(200).collect();
    if lines
        .iter()
        .any(|line| line.starts_with("diff --git ") || line.starts_with("@@ "))
        || (lines.iter().any(|line| line.starts_with("--- "))
            && lines.iter().any(|line| line.starts_with("+++ ")))
    {
        return ContentType::Diff;
    }

    let log_lines = lines
        .iter()
        .filter(|line| LOG_LEVELS.iter().any(|level| line.contains(level)))
        .count();
    if log_lines * 2 >= lines.len() && log_lines >= 2 {
        return ContentType::Logs;
    }

    if lines.iter().any(|line| line.starts_with("# ") || line.starts_with("## "))
        || trimmed.starts_with("---\n")
    {
        return ContentType::Markdown;
    }

    let code_markers = ["fn ", "function ", "class ", "def ", "import ", "const ", "pub ", "=> "];
    let code_lines = lines
        .iter()
        .filter(|line| {
            let line = line.trim_start();
            code_markers.iter().any(|marker| line.starts_with(marker))
                || line.ends_with('{')
                || line.ends_with(';')
        })
        .count();
    if code_lines * 3 >= lines.len() && code_lines > 0 {
        return ContentType::Code;
    }

    ContentType::Text
}

/// Language id from a file path's extension or well-known file name.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let path = Path::new(path);
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    match name.as_str() {
        "dockerfile" => return Some("dockerfile"),
        "makefile" => return Some("make"),
        _ => {}
    }

    let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
    let language = match extension.as_str() {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "tsx",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "py" | "pyi" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" | "zsh" => "bash",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" | "markdown" => "markdown",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        "sql" => "sql",
        _ => return None,
    };
    Some(language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_content() {
        assert_eq!(detect_type(r#"{"a": 1}"#), ContentType::Json);
        assert_eq!(
            detect_type("diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n"),
            ContentType::Diff
        );
        assert_eq!(
            detect_type("2024-01-01 INFO start\n2024-01-01 ERROR boom\n2024-01-01 INFO done\n"),
            ContentType::Logs
        );
        assert_eq!(detect_type("# Title\n\nSome prose.\n"), ContentType::Markdown);
        assert_eq!(detect_type("fn main() {\n    let x = 1;\n}\n"), ContentType::Code);
        assert_eq!(detect_type("just some words"), ContentType::Text);
    }

    #[test]
    fn detects_languages() {
        assert_eq!(detect_language("src/lib.rs"), Some("rust"));
        assert_eq!(detect_language("web/App.tsx"), Some("tsx"));
        assert_eq!(detect_language("Dockerfile"), Some("dockerfile"));
        assert_eq!(detect_language("notes"), None);
    }
}
