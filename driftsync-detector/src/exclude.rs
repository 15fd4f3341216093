//! Exclude pattern matching.
//!
//! Decides whether a path participates in sync at all. The rule, in order:
//! (1) the compiled glob set matches the relative path, its file name, or any
//! normal path component; (2) any path segment starts with `.` — the hidden
//! rule applies even when no exclude pattern is configured.

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::DetectorError;

/// Compiled exclusion rule set for one mapping. Pure; no I/O.
#[derive(Debug, Clone)]
pub struct ExcludeMatcher {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeMatcher {
    /// Compile a pattern list. An invalid glob is a configuration error,
    /// fatal at start-up.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DetectorError> {
        let mut builder = GlobSetBuilder::new();
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|source| DetectorError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            builder.add(glob);
            compiled.push(pattern.to_string());
        }
        Ok(Self {
            glob_set: builder.build().map_err(|source| DetectorError::InvalidPattern {
                pattern: compiled.join(", "),
                source,
            })?,
            patterns: compiled,
        })
    }

    /// A matcher with no patterns; only the hidden rule applies.
    pub fn empty() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `true` when `path` (relative to its root) must not be synced.
    pub fn should_ignore(&self, path: &Path) -> bool {
        if self.glob_set.is_match(path) {
            return true;
        }

        for component in path.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    return true;
                }
                if self.glob_set.is_match(name.as_ref()) {
                    return true;
                }
            }
        }

        false
    }
}
