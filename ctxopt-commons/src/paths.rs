use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Normalize a path by resolving `.` and `..` components lexically.
///
/// `..` never climbs above the root of an absolute path, so
/// `/work/../../etc` normalizes to `/etc`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Canonicalize the working directory with fallback to its normalized form if
/// canonicalization fails.
pub fn canonicalize_workspace(workspace_root: &Path) -> PathBuf {
    std::fs::canonicalize(workspace_root).unwrap_or_else(|error| {
        warn!(
            path = %workspace_root.display(),
            %error,
            "Failed to canonicalize working directory; falling back to normalized path"
        );
        normalize_path(workspace_root)
    })
}

/// Canonicalize `normalized`, tolerating a missing tail.
///
/// The longest existing ancestor is canonicalized (resolving any symlinks on
/// the way) and the missing remainder is re-attached verbatim. The input is
/// expected to be absolute and already free of `.`/`..` components.
pub fn canonicalize_allow_missing(normalized: &Path) -> io::Result<PathBuf> {
    if normalized.try_exists()? {
        return std::fs::canonicalize(normalized);
    }

    let mut current = normalized.to_path_buf();
    while let Some(parent) = current.parent() {
        if parent.try_exists()? {
            let canonical_parent = std::fs::canonicalize(parent)?;
            let remainder = normalized
                .strip_prefix(parent)
                .unwrap_or_else(|_| Path::new(""));
            return if remainder.as_os_str().is_empty() {
                Ok(canonical_parent)
            } else {
                Ok(canonical_parent.join(remainder))
            };
        }
        current = parent.to_path_buf();
    }

    Ok(normalized.to_path_buf())
}

/// Component-wise containment check: `/work-other` is not inside `/work`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}
