//! Static scan of guest source before it reaches the isolate.
//!
//! This is a lexical pass and can be evaded by sufficiently obfuscated code.
//! The isolate is the security boundary; the analyzer exists to reject
//! obviously hostile input early and cheaply.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Outcome of [`analyze`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAnalysis {
    pub safe: bool,
    pub blocked_patterns: Vec<String>,
    pub warnings: Vec<String>,
}

impl SecurityAnalysis {
    /// No blocked patterns and no warnings.
    pub fn is_clean(&self) -> bool {
        self.safe && self.warnings.is_empty()
    }

    /// Host-facing rejection message.
    pub fn rejection_message(&self) -> String {
        format!("Blocked patterns: [{}]", self.blocked_patterns.join(", "))
    }
}

/// Guest source that passed [`analyze`] without blocked patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedCode {
    source: String,
    warnings: Vec<String>,
}

impl SanitizedCode {
    /// Analyze `code` and keep it only when no blocked pattern matched.
    pub fn new(code: &str) -> Result<Self, SecurityAnalysis> {
        let analysis = analyze(code);
        if !analysis.safe {
            return Err(analysis);
        }
        Ok(Self {
            source: code.to_string(),
            warnings: analysis.warnings,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

struct Rule {
    regex: Regex,
    reason: &'static str,
}

fn rule(pattern: &str, reason: &'static str) -> Rule {
    Rule {
        regex: compile_regex(pattern),
        reason,
    }
}

static BLOCKED_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // dynamic evaluation
        rule(r"\beval\s*\(", "eval() dynamic evaluation"),
        rule(r"\bnew\s+Function\b|\bFunction\s*\(", "Function constructor"),
        rule(
            r#"\b(setTimeout|setInterval)\s*\(\s*['"`]"#,
            "string-evaluating timer",
        ),
        // module loading
        rule(r"\brequire\s*\(", "require() module loading"),
        rule(r"\bimport\s*\(", "dynamic import()"),
        rule(r#"(?m)^\s*import\s+[\w{*'"]"#, "static import"),
        // host process and environment
        rule(r"\bprocess\s*(\.|\[|\?\.)", "process access"),
        rule(r"\b(Deno|Bun)\s*(\.|\[|\?\.)", "runtime namespace access"),
        rule(r"\bWebAssembly\b", "WebAssembly compilation"),
        rule(r"\b__(bootstrap|infra)\b", "runtime internals access"),
        // global object identity
        rule(r"\bglobalThis\b", "globalThis access"),
        rule(r"\b(global|window|self)\s*(\.|\[|\?\.)", "global object access"),
        // prototype tampering
        rule(r"__proto__", "__proto__ access"),
        rule(
            r#"\.\s*constructor\s*(\.|\[|\()|\[\s*['"`]constructor['"`]\s*\]"#,
            "constructor chain access",
        ),
        rule(r"\bsetPrototypeOf\b", "prototype mutation"),
        rule(r"\.\s*prototype\s*=[^=]", "prototype overwrite"),
        // reflection that can bypass freezing
        rule(r"\bReflect\s*\.", "Reflect API"),
        rule(r"\bProxy\b", "Proxy construction"),
        rule(
            r"\bObject\s*\.\s*(defineProperty|defineProperties|getOwnPropertyDescriptors?)\b",
            "property descriptor manipulation",
        ),
    ]
});

static WARNING_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r"\bwhile\s*\(\s*(true|1)\s*\)",
            "unconditional while loop; relies on the execution deadline",
        ),
        rule(
            r"\bfor\s*\(\s*;\s*;\s*\)",
            "unconditional for loop; relies on the execution deadline",
        ),
    ]
});

/// Joins of adjacent string literals, e.g. `'ev' + 'al'`.
static LITERAL_CONCAT: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r#"(['"`])\s*\+\s*(['"`])"#));

/// Forbidden identifiers spelled out inside a string literal.
static QUOTED_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(
        r#"['"`](eval|Function|require|import|process|Deno|globalThis|global|constructor|__proto__|Reflect|Proxy)['"`]"#,
    )
});

/// Scan guest source for blocked constructs and suspicious patterns.
///
/// Never fails. `safe` is false exactly when `blocked_patterns` is non-empty.
pub fn analyze(code: &str) -> SecurityAnalysis {
    let mut blocked_patterns = Vec::new();
    let collapsed = LITERAL_CONCAT.replace_all(code, "");

    for rule in BLOCKED_RULES.iter() {
        if rule.regex.is_match(code) || rule.regex.is_match(&collapsed) {
            push_unique(&mut blocked_patterns, rule.reason.to_string());
        }
    }

    for capture in QUOTED_IDENTIFIER.captures_iter(&collapsed) {
        if let Some(name) = capture.get(1) {
            push_unique(
                &mut blocked_patterns,
                format!("string reference to {}", name.as_str()),
            );
        }
    }

    let mut warnings = Vec::new();
    for rule in WARNING_RULES.iter() {
        if rule.regex.is_match(code) {
            push_unique(&mut warnings, rule.reason.to_string());
        }
    }

    SecurityAnalysis {
        safe: blocked_patterns.is_empty(),
        blocked_patterns,
        warnings,
    }
}

fn push_unique(list: &mut Vec<String>, entry: String) {
    if !list.contains(&entry) {
        list.push(entry);
    }
}

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Panic is acceptable thanks to the `load_regex` test
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}
