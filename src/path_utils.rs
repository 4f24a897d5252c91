//! Path validation, blacklist matching, and common-ancestor helpers.

use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::error::{FsalError, FsalResult};

/// Lexically normalise a path: resolve `.` and `..` components without
/// touching the filesystem (no symlink resolution, no existence check).
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validate a user-supplied path against a base directory: trim
/// whitespace, strip leading/trailing separators, join with `base`,
/// canonicalise lexically. Valid iff the canonical form is still inside
/// `base`. Returns the canonical `rel_path` (no leading separator).
pub fn validate_internal_path(base: &Path, input: &str) -> FsalResult<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FsalError::InvalidPath(input.to_string()));
    }
    let stripped = trimmed.trim_matches('/');
    let joined = base.join(stripped);
    let normalized = normalize_lexically(&joined);
    let base_normalized = normalize_lexically(base);
    match normalized.strip_prefix(&base_normalized) {
        Ok(rel) if normalized.starts_with(&base_normalized) => {
            Ok(rel.to_string_lossy().replace('\\', "/"))
        }
        _ => Err(FsalError::InvalidPath(input.to_string())),
    }
}

/// Validate an externally-supplied absolute path (used by `transfer`'s
/// `src` argument): trim and canonicalise lexically, no containment
/// check.
pub fn validate_external_path(input: &str) -> FsalResult<PathBuf> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FsalError::InvalidPath(input.to_string()));
    }
    Ok(normalize_lexically(Path::new(trimmed)))
}

/// A compiled blacklist of case-insensitive regex patterns. A path is
/// blacklisted iff any pattern matches starting at the beginning of the
/// path.
#[derive(Debug, Clone)]
pub struct Blacklist {
    patterns: Vec<Regex>,
}

impl Blacklist {
    pub fn compile(patterns: &[String]) -> FsalResult<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}"))
                    .map_err(|e| FsalError::Protocol(format!("invalid blacklist pattern {p:?}: {e}")))
            })
            .collect::<FsalResult<Vec<_>>>()?;
        Ok(Blacklist { patterns: compiled })
    }

    pub fn is_blacklisted(&self, rel_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|re| re.find(rel_path).is_some_and(|m| m.start() == 0))
    }
}

/// Longest shared prefix of a set of rel-paths, split on `/`.
pub fn common_ancestor<S: AsRef<str>>(paths: &[S]) -> String {
    let mut components: Option<Vec<&str>> = None;
    for path in paths {
        let parts: Vec<&str> = path.as_ref().split('/').collect();
        components = Some(match components {
            None => parts,
            Some(prev) => {
                let n = prev.iter().zip(parts.iter()).take_while(|(a, b)| a == b).count();
                prev[..n].to_vec()
            }
        });
    }
    components.unwrap_or_default().join("/")
}

/// Yield `rel_path` then each ancestor directory, up to (not including)
/// the virtual root, nearest first.
pub fn ancestors(rel_path: &str) -> impl Iterator<Item = String> + '_ {
    let mut current = Some(rel_path.to_string());
    std::iter::from_fn(move || {
        let path = current.take()?;
        let parent = match path.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => Some(parent.to_string()),
            _ => None,
        };
        current = parent;
        Some(path)
    })
}
