//! Host-native filesystem provider.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use super::CapabilityProvider;
use crate::errors::FileError;
use crate::security::{SafePattern, ValidatedPath, is_sensitive_path};

/// Directories never descended into by glob or grep.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Reads files with `std::fs` and expands globs with `walkdir`. Compression
/// and code parsing fall back to the trait's unsupported defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCapabilities;

impl CapabilityProvider for DefaultCapabilities {
    fn read_file(&self, path: &ValidatedPath) -> Result<String, FileError> {
        let display = path.as_path().to_string_lossy();
        match fs::read(path.as_path()) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(FileError::not_found(&display)),
            Err(err) => Err(FileError::read_failed(&display, err)),
        }
    }

    fn file_exists(&self, path: &ValidatedPath) -> bool {
        path.as_path().is_file()
    }

    fn glob(&self, pattern: &SafePattern, limit: usize) -> Result<Vec<String>, FileError> {
        let matchers = pattern
            .alternatives()
            .iter()
            .map(|alternative| Pattern::new(alternative))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| FileError::glob_failed(pattern.as_str(), err.msg))?;
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };

        let mut matches = Vec::new();
        for relative in walk_files(pattern.root()) {
            if matchers
                .iter()
                .any(|matcher| matcher.matches_with(&relative, options))
            {
                matches.push(relative);
                if matches.len() >= limit {
                    break;
                }
            }
        }
        matches.sort();
        Ok(matches)
    }
}

/// Regular, non-sensitive files under `root` as `/`-separated relative paths.
/// Symlinks are not followed.
pub(crate) fn walk_files(root: &Path) -> impl Iterator<Item = String> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            if is_sensitive_path(relative).is_some() {
                return None;
            }
            Some(
                relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        })
}
