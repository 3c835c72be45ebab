//! Gitignore-compatible ignore rules
//!
//! Two rule sets are consulted: the built-in set from
//! [`ALWAYS_IGNORED`](crate::constants::ALWAYS_IGNORED), which can never be
//! negated, and the patterns from the project ignore file.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;

use crate::constants::ALWAYS_IGNORED;
use crate::{Error, Result};

/// Compiled ignore rules for one project root.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    builtins: Gitignore,
    project: Gitignore,
}

impl IgnoreRules {
    /// Rules containing only the built-in set.
    pub fn builtin(root: &Path) -> Result<Self> {
        Self::from_patterns(root, "")
    }

    /// Compile the built-in set plus the given gitignore-formatted patterns.
    pub fn from_patterns(root: &Path, patterns: &str) -> Result<Self> {
        let builtins = compile(root, None, ALWAYS_IGNORED.iter().copied())?;
        let project = compile(root, None, patterns.lines())?;
        Ok(Self { builtins, project })
    }

    /// Compile the built-in set plus the patterns from `ignore_file`.
    ///
    /// A missing ignore file yields the built-in set only.
    pub fn load(root: &Path, ignore_file: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(ignore_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %ignore_file.display(), "no ignore file, using built-in rules");
                String::new()
            }
            Err(e) => return Err(Error::io(ignore_file, e)),
        };

        let builtins = compile(root, None, ALWAYS_IGNORED.iter().copied())?;
        let project = compile(root, Some(ignore_file.to_path_buf()), content.lines())?;
        Ok(Self { builtins, project })
    }

    /// Whether a project-relative canonical path is ignored.
    ///
    /// Directory paths carry a trailing slash, which is what makes
    /// directory-only patterns apply to them.
    pub fn matches(&self, relative: &str) -> bool {
        let is_dir = relative.ends_with('/');
        let trimmed = relative.trim_end_matches('/');
        if trimmed.is_empty() {
            return false;
        }

        self.builtins
            .matched_path_or_any_parents(trimmed, is_dir)
            .is_ignore()
            || self
                .project
                .matched_path_or_any_parents(trimmed, is_dir)
                .is_ignore()
    }
}

fn compile<'a>(
    root: &Path,
    source: Option<PathBuf>,
    lines: impl Iterator<Item = &'a str>,
) -> Result<Gitignore> {
    let origin = source.clone().unwrap_or_else(|| root.to_path_buf());
    let mut builder = GitignoreBuilder::new(root);
    for line in lines {
        builder
            .add_line(source.clone(), line)
            .map_err(|e| Error::IgnorePattern {
                path: origin.clone(),
                message: e.to_string(),
            })?;
    }
    builder.build().map_err(|e| Error::IgnorePattern {
        path: origin,
        message: e.to_string(),
    })
}
