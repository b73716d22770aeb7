use std::path::Path;

use regex::RegexBuilder;
use serde::Serialize;

use super::CapabilityProvider;
use crate::errors::CapabilityError;
use crate::security::{SafePattern, validate_path};

const MAX_MATCHES: usize = 500;
const MAX_LINE_CHARS: usize = 400;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrepMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

/// Line-oriented regex search over the files matching `files`.
///
/// Every candidate is revalidated before reading; files that fail validation
/// or cannot be read are skipped rather than failing the whole search.
pub fn grep(
    provider: &dyn CapabilityProvider,
    working_dir: &Path,
    pattern: &str,
    files: &SafePattern,
    max_files: usize,
) -> Result<Vec<GrepMatch>, CapabilityError> {
    let regex = RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|err| CapabilityError::invalid_arguments("search.grep", err.to_string()))?;

    let mut matches = Vec::new();
    for file in provider.glob(files, max_files)? {
        let Ok(path) = validate_path(&file, working_dir) else {
            continue;
        };
        let Ok(content) = provider.read_file(&path) else {
            continue;
        };
        for (index, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(GrepMatch {
                    file: file.clone(),
                    line: index + 1,
                    text: line.chars().take(MAX_LINE_CHARS).collect(),
                });
                if matches.len() >= MAX_MATCHES {
                    return Ok(matches);
                }
            }
        }
    }
    Ok(matches)
}
