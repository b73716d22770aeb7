//! Confinement of guest-supplied paths and glob patterns.
//!
//! Every file-shaped capability argument passes through here before any
//! filesystem call. Nothing is cached: symlink targets can change between
//! calls, so each call revalidates from scratch.

use std::fs;
use std::path::{Component, Path, PathBuf};

use ctxopt_commons::{canonicalize_allow_missing, canonicalize_workspace, is_within, normalize_path};
use tracing::warn;

use crate::errors::FileError;

/// Directory names whose whole subtree is off limits.
const SENSITIVE_DIRS: &[&str] = &[".ssh", ".aws", ".gnupg"];

/// Exact file names that hold credentials.
const SENSITIVE_FILES: &[&str] = &[
    "credentials.json",
    ".git-credentials",
    ".npmrc",
    ".pypirc",
    ".netrc",
    ".envrc",
];

/// Private-key file name stems. `id_rsa.pub` is blocked too.
const PRIVATE_KEY_STEMS: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

/// Extensions that almost always carry key material.
const SENSITIVE_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx"];

/// Upper bound on the alternatives a `{a,b}` pattern may expand to.
const MAX_BRACE_ALTERNATIVES: usize = 64;

/// Absolute path inside the working directory that passed [`validate_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath(PathBuf);

impl ValidatedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

/// Relative glob pattern that passed [`validate_glob_pattern`], anchored at
/// the canonical working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePattern {
    pattern: String,
    alternatives: Vec<String>,
    root: PathBuf,
}

impl SafePattern {
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// The brace-free patterns `{a,b}` expands to, each validated on its own.
    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Why a file name is on the denylist, if it is.
pub fn sensitive_reason(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_ascii_lowercase();
    let env_file = lower == ".env" || lower.starts_with(".env.") || lower.ends_with(".env");
    if env_file || SENSITIVE_FILES.contains(&lower.as_str()) {
        return Some(if env_file {
            "environment file"
        } else {
            "credentials file"
        });
    }
    if PRIVATE_KEY_STEMS
        .iter()
        .any(|stem| lower == *stem || lower.starts_with(&format!("{stem}.")))
    {
        return Some("private key");
    }
    match lower.rsplit_once('.') {
        Some((_, extension)) if SENSITIVE_EXTENSIONS.contains(&extension) => Some("key material"),
        _ => None,
    }
}

/// Whether any component of `relative` is sensitive.
pub fn is_sensitive_path(relative: &Path) -> Option<&'static str> {
    for component in relative.components() {
        if let Component::Normal(part) = component {
            let part = part.to_string_lossy();
            if SENSITIVE_DIRS.contains(&part.as_ref()) {
                return Some("credential directory");
            }
        }
    }
    relative
        .file_name()
        .and_then(|name| sensitive_reason(&name.to_string_lossy()))
}

/// Resolve `candidate` against `working_dir` and confine it there.
///
/// Lexical containment is checked first, then symlinks are resolved and
/// containment is checked again against the canonical working directory.
/// The resolved path must not be on the sensitive-file denylist.
pub fn validate_path(candidate: &str, working_dir: &Path) -> Result<ValidatedPath, FileError> {
    if candidate.trim().is_empty() {
        return Err(FileError::invalid(candidate, "path is empty"));
    }
    if candidate.contains('\0') {
        return Err(FileError::invalid(candidate, "path contains a NUL byte"));
    }

    let lexical_root = normalize_path(working_dir);
    let canonical_root = canonicalize_workspace(working_dir);
    let lexical = normalize_path(&lexical_root.join(candidate));

    if !is_within(&lexical_root, &lexical) && !is_within(&canonical_root, &lexical) {
        return Err(FileError::traversal(candidate));
    }

    let resolved = canonicalize_allow_missing(&lexical)
        .map_err(|err| FileError::invalid(candidate, &err.to_string()))?;
    if !is_within(&canonical_root, &resolved) {
        warn!(candidate, "path resolves outside the working directory");
        return Err(FileError::traversal(candidate));
    }

    // A dangling link is not followed by canonicalize; check where it points.
    if let Some(target) = dangling_link_target(&resolved) {
        let parent = resolved.parent().unwrap_or(canonical_root.as_path());
        let target = normalize_path(&parent.join(target));
        if !is_within(&canonical_root, &target) {
            warn!(candidate, "dangling symlink points outside the working directory");
            return Err(FileError::traversal(candidate));
        }
    }

    let relative = resolved.strip_prefix(&canonical_root).unwrap_or(&resolved);
    if let Some(reason) = is_sensitive_path(relative) {
        return Err(FileError::blocked(candidate, reason));
    }

    Ok(ValidatedPath(resolved))
}

/// Check a glob pattern without touching the filesystem.
///
/// `{a,b}` alternatives are expanded first and each one is checked. Rejects
/// absolute patterns, `..` segments and patterns whose only possible matches
/// are sensitive files (`**/credentials.json`, `*.pem`, `.env*`).
pub fn validate_glob_pattern(
    candidate: &str,
    working_dir: &Path,
) -> Result<SafePattern, FileError> {
    let pattern = candidate.trim();
    if pattern.is_empty() {
        return Err(FileError::invalid(candidate, "pattern is empty"));
    }
    if pattern.contains('\0') {
        return Err(FileError::invalid(candidate, "pattern contains a NUL byte"));
    }

    let mut alternatives = Vec::new();
    expand_braces(pattern, &mut alternatives)
        .map_err(|reason| FileError::invalid(candidate, reason))?;
    for alternative in &alternatives {
        check_glob_alternative(candidate, alternative)?;
    }

    Ok(SafePattern {
        pattern: pattern.to_string(),
        alternatives,
        root: canonicalize_workspace(working_dir),
    })
}

fn check_glob_alternative(candidate: &str, pattern: &str) -> Result<(), FileError> {
    if pattern.starts_with(['/', '\\', '~'])
        || has_drive_prefix(pattern)
        || Path::new(pattern).is_absolute()
    {
        return Err(FileError::traversal(candidate));
    }

    let segments: Vec<&str> = pattern.split(['/', '\\']).collect();
    if segments.iter().any(|segment| *segment == "..") {
        return Err(FileError::traversal(candidate));
    }

    glob::Pattern::new(pattern).map_err(|err| FileError::invalid(candidate, err.msg))?;

    if segments
        .iter()
        .any(|segment| SENSITIVE_DIRS.contains(segment))
    {
        return Err(FileError::blocked(candidate, "credential directory"));
    }
    if let Some(reason) = segments.last().and_then(|last| sensitive_only_reason(last)) {
        return Err(FileError::blocked(candidate, reason));
    }
    Ok(())
}

/// Expand the first top-level `{a,b,...}` group and recurse on each result.
fn expand_braces(pattern: &str, out: &mut Vec<String>) -> Result<(), &'static str> {
    let Some(open) = pattern.find('{') else {
        if pattern.contains('}') {
            return Err("unbalanced `}` in pattern");
        }
        if out.len() >= MAX_BRACE_ALTERNATIVES {
            return Err("too many brace alternatives");
        }
        out.push(pattern.to_string());
        return Ok(());
    };
    if pattern[..open].contains('}') {
        return Err("unbalanced `}` in pattern");
    }

    let mut depth = 0usize;
    let mut close = None;
    let mut commas = Vec::new();
    for (offset, ch) in pattern[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + offset);
                    break;
                }
            }
            ',' if depth == 1 => commas.push(open + offset),
            _ => {}
        }
    }
    let close = close.ok_or("unbalanced `{` in pattern")?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let starts = std::iter::once(open).chain(commas.iter().copied());
    let ends = commas.iter().copied().chain(std::iter::once(close));
    for (start, end) in starts.zip(ends) {
        let option = &pattern[start + 1..end];
        expand_braces(&format!("{prefix}{option}{suffix}"), out)?;
    }
    Ok(())
}

fn dangling_link_target(path: &Path) -> Option<PathBuf> {
    let meta = fs::symlink_metadata(path).ok()?;
    if !meta.file_type().is_symlink() {
        return None;
    }
    fs::read_link(path).ok()
}

/// `C:` style prefixes, which are absolute on Windows hosts.
fn has_drive_prefix(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

/// Reason when every name matching `segment` is sensitive.
fn sensitive_only_reason(segment: &str) -> Option<&'static str> {
    if !has_wildcard(segment) {
        return sensitive_reason(segment);
    }

    // `*.pem` style: the literal suffix fixes the extension.
    let fixed_extension = segment
        .strip_prefix('*')
        .filter(|suffix| !has_wildcard(suffix))
        .and_then(|suffix| suffix.strip_prefix('.'))
        .map(str::to_ascii_lowercase);
    if let Some(extension) = fixed_extension {
        if extension == "env" {
            return Some("environment file");
        }
        if SENSITIVE_EXTENSIONS.contains(&extension.as_str()) {
            return Some("key material");
        }
    }

    // `.env*` / `id_rsa*` style: the literal prefix fixes the family.
    let prefix_end = segment.find(['*', '?', '[', '{']).unwrap_or(segment.len());
    let prefix = segment[..prefix_end].to_ascii_lowercase();
    if prefix.starts_with(".env") {
        return Some("environment file");
    }
    if PRIVATE_KEY_STEMS.iter().any(|stem| prefix.starts_with(stem)) {
        return Some("private key");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FileErrorCode;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "fn main() {}").unwrap();
        dir
    }

    #[test]
    fn accepts_descendants_and_returns_resolved_path() {
        let dir = workspace();
        let root = fs::canonicalize(dir.path()).unwrap();

        let validated = validate_path("src/lib.rs", dir.path()).unwrap();
        assert_eq!(validated.as_path(), root.join("src/lib.rs"));

        let validated = validate_path("./src/../notes.txt", dir.path()).unwrap();
        assert_eq!(validated.as_path(), root.join("notes.txt"));

        // Missing files still validate; existence is the collaborator's concern.
        let validated = validate_path("src/new.rs", dir.path()).unwrap();
        assert_eq!(validated.as_path(), root.join("src/new.rs"));
    }

    #[test]
    fn rejects_traversal_and_absolute_escapes() {
        let dir = workspace();
        for candidate in ["../outside.txt", "src/../../etc/passwd", "/etc/passwd"] {
            let err = validate_path(candidate, dir.path()).unwrap_err();
            assert_eq!(err.code(), FileErrorCode::PathTraversal, "{candidate}");
        }
    }

    #[test]
    fn absolute_path_inside_workspace_is_allowed() {
        let dir = workspace();
        let absolute = dir.path().join("notes.txt");
        assert!(validate_path(&absolute.to_string_lossy(), dir.path()).is_ok());
    }

    #[test]
    fn rejects_sensitive_files() {
        let dir = workspace();
        for candidate in [
            ".env",
            ".env.local",
            "deploy/prod.env",
            "config/credentials.json",
            "id_rsa",
            ".ssh/config",
            "certs/server.pem",
            "deploy.key",
        ] {
            let err = validate_path(candidate, dir.path()).unwrap_err();
            assert_eq!(err.code(), FileErrorCode::Blocked, "{candidate}");
        }
    }

    #[test]
    fn rejects_empty_and_nul() {
        let dir = workspace();
        assert_eq!(validate_path("", dir.path()).unwrap_err().code(), FileErrorCode::InvalidPath);
        assert_eq!(
            validate_path("a\0b", dir.path()).unwrap_err().code(),
            FileErrorCode::InvalidPath
        );
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escapes() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "s3cr3t").unwrap();
        let dir = workspace();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("leak.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path().join("missing"), dir.path().join("dangling"))
            .unwrap();

        for candidate in ["linked/secret.txt", "leak.txt", "dangling"] {
            let err = validate_path(candidate, dir.path()).unwrap_err();
            assert_eq!(err.code(), FileErrorCode::PathTraversal, "{candidate}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_to_sensitive_file_is_blocked() {
        let dir = workspace();
        fs::write(dir.path().join(".env"), "KEY=1").unwrap();
        std::os::unix::fs::symlink(dir.path().join(".env"), dir.path().join("innocent.txt"))
            .unwrap();
        let err = validate_path("innocent.txt", dir.path()).unwrap_err();
        assert_eq!(err.code(), FileErrorCode::Blocked);
    }

    #[test]
    fn glob_patterns() {
        let dir = workspace();
        for ok in ["**/*.rs", "src/*.ts", "*.{json,toml}", "docs/**/*.md"] {
            let pattern = validate_glob_pattern(ok, dir.path()).unwrap();
            assert_eq!(pattern.as_str(), ok);
        }

        for traversal in ["../*.rs", "src/../../x", "/etc/*", "~/notes/*", "C:/Windows/*"] {
            let err = validate_glob_pattern(traversal, dir.path()).unwrap_err();
            assert_eq!(err.code(), FileErrorCode::PathTraversal, "{traversal}");
        }

        for blocked in [
            "**/credentials.json",
            ".env*",
            "**/*.env",
            "**/*.pem",
            ".ssh/*",
            "**/id_rsa",
        ] {
            let err = validate_glob_pattern(blocked, dir.path()).unwrap_err();
            assert_eq!(err.code(), FileErrorCode::Blocked, "{blocked}");
        }

        assert_eq!(
            validate_glob_pattern("[", dir.path()).unwrap_err().code(),
            FileErrorCode::InvalidPath
        );
    }

    #[test]
    fn brace_patterns_expand_into_checked_alternatives() {
        let dir = workspace();

        let pattern = validate_glob_pattern("*.{json,toml}", dir.path()).unwrap();
        assert_eq!(pattern.alternatives(), ["*.json", "*.toml"]);

        let nested = validate_glob_pattern("{src,docs}/**/*.{ts,tsx}", dir.path()).unwrap();
        assert_eq!(
            nested.alternatives(),
            ["src/**/*.ts", "src/**/*.tsx", "docs/**/*.ts", "docs/**/*.tsx"]
        );

        let inner = validate_glob_pattern("*.{j{s,sx},md}", dir.path()).unwrap();
        assert_eq!(inner.alternatives(), ["*.js", "*.jsx", "*.md"]);

        assert_eq!(
            validate_glob_pattern("{src,../outside}/*", dir.path()).unwrap_err().code(),
            FileErrorCode::PathTraversal
        );
        assert_eq!(
            validate_glob_pattern("{src,/etc}/*", dir.path()).unwrap_err().code(),
            FileErrorCode::PathTraversal
        );
        assert_eq!(
            validate_glob_pattern("**/*.{rs,pem}", dir.path()).unwrap_err().code(),
            FileErrorCode::Blocked
        );
        for unbalanced in ["*.{json", "*.json}", "}{"] {
            assert_eq!(
                validate_glob_pattern(unbalanced, dir.path()).unwrap_err().code(),
                FileErrorCode::InvalidPath,
                "{unbalanced}"
            );
        }

        let explosive = "{a,b,c,d,e}{f,g,h,i}{j,k,l,m}/*";
        assert_eq!(
            validate_glob_pattern(explosive, dir.path()).unwrap_err().code(),
            FileErrorCode::InvalidPath
        );
    }
}
