//! The synchronized project directory
//!
//! [`Directory`] owns the project root and its ignore rules. Every path that
//! crosses the sync boundary goes through [`Directory::normalize`] first, so
//! the rest of the system only ever sees canonical project-relative paths:
//! forward slashes, no leading `./`, a trailing `/` on directories.

use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::checksum::{self, DIRECTORY_FINGERPRINT, HashSnapshot};
use crate::constants::ProjectPath;
use crate::path::is_within;
use crate::{Error, IgnoreRules, NormalizedPath, Result};

/// A local project root with its ignore rules.
#[derive(Debug)]
pub struct Directory {
    root: NormalizedPath,
    rules: RwLock<IgnoreRules>,
}

impl Directory {
    /// Open (creating if needed) the directory at `root` and load its
    /// ignore file.
    pub fn init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        let canonical = dunce::canonicalize(root).map_err(|e| Error::io(root, e))?;
        let root = NormalizedPath::new(canonical);

        let rules = IgnoreRules::load(
            root.as_ref(),
            root.join(ProjectPath::IgnoreFile.as_str()).as_ref(),
        )?;

        Ok(Self {
            root,
            rules: RwLock::new(rules),
        })
    }

    /// The canonical absolute root path.
    pub fn root(&self) -> &NormalizedPath {
        &self.root
    }

    /// Absolute location of a project-relative path.
    pub fn absolute(&self, relative: &str) -> NormalizedPath {
        self.root.join(relative)
    }

    /// Convert an absolute or relative, possibly OS-specific, path to its
    /// canonical project-relative form.
    ///
    /// Paths outside the root keep their leading `../` components; the root
    /// itself normalizes to the empty string.
    pub fn normalize(&self, path: impl AsRef<Path>, is_dir: bool) -> String {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");
        let absolute = if path.as_ref().is_absolute() || raw.starts_with('/') {
            NormalizedPath::new(&raw)
        } else {
            self.root.join(&raw)
        };

        let mut relative = absolute.relative_to(&self.root);
        if is_dir && !relative.is_empty() {
            relative.push('/');
        }
        relative
    }

    /// Whether a path should be left out of synchronization.
    ///
    /// Accepts absolute or relative paths; a trailing slash marks a
    /// directory. Paths outside the root are always ignored and the root
    /// itself never is.
    pub fn ignores(&self, path: impl AsRef<Path>) -> bool {
        let is_dir = path.as_ref().to_string_lossy().ends_with(['/', '\\']);
        let relative = self.normalize(path, is_dir);

        if relative.is_empty() {
            return false;
        }
        if relative == ".." || relative.starts_with("../") {
            return true;
        }

        self.rules().matches(&relative)
    }

    /// Reload the project ignore file.
    ///
    /// A missing or emptied file leaves only the built-in rules in effect.
    pub fn load_ignore_file(&self) -> Result<()> {
        let ignore_file = self.absolute(ProjectPath::IgnoreFile.as_str());
        let rules = IgnoreRules::load(self.root.as_ref(), ignore_file.as_ref())?;
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
        info!(path = %ignore_file, "reloaded ignore rules");
        Ok(())
    }

    /// Recursively list the tree as `(path, is_dir)` pairs.
    ///
    /// Only files are listed individually; a directory appears as its own
    /// entry when it is empty or all of its entries were skipped, so empty
    /// directories survive synchronization. Symlinks are listed only when
    /// they resolve to a file.
    pub fn walk(&self, skip_ignored: bool) -> Result<Vec<(String, bool)>> {
        let rules = self.rules();
        let mut entries = Vec::new();
        walk_dir(
            self.root.to_native().as_path(),
            "",
            skip_ignored.then_some(&*rules),
            &mut entries,
        )?;
        Ok(entries)
    }

    /// Fingerprint every non-ignored entry of the tree.
    pub fn hashes(&self) -> Result<HashSnapshot> {
        let mut hashes = HashSnapshot::new();
        for (path, is_dir) in self.walk(true)? {
            if is_dir {
                hashes.insert(path, DIRECTORY_FINGERPRINT.to_string());
                continue;
            }

            let absolute = self.absolute(&path);
            match checksum::compute_file_checksum(absolute.as_ref()) {
                Ok(fingerprint) => {
                    hashes.insert(path, fingerprint);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(%path, "file disappeared while hashing");
                }
                Err(e) if e.kind() == std::io::ErrorKind::IsADirectory => {
                    debug!(%path, "file became a directory while hashing");
                }
                Err(e) => return Err(Error::io(absolute.to_native(), e)),
            }
        }
        Ok(hashes)
    }

    /// Whether the tree holds any non-ignored entry outside `reserved`.
    pub fn has_entries_outside(&self, reserved: &str) -> Result<bool> {
        Ok(self
            .walk(true)?
            .iter()
            .any(|(path, _)| !is_within(path, reserved)))
    }

    fn rules(&self) -> RwLockReadGuard<'_, IgnoreRules> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn walk_dir(
    dir: &Path,
    relative_dir: &str,
    rules: Option<&IgnoreRules>,
    out: &mut Vec<(String, bool)>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io(dir, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    let listed_before = out.len();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
        if file_type.is_symlink() && !links_to_file(&entry.path()) {
            debug!(path = %format!("{relative_dir}{name}"), "skipping symlink that does not point at a file");
            continue;
        }
        let is_dir = file_type.is_dir();
        let relative = if is_dir {
            format!("{relative_dir}{name}/")
        } else {
            format!("{relative_dir}{name}")
        };

        if rules.is_some_and(|rules| rules.matches(&relative)) {
            continue;
        }

        if is_dir {
            walk_dir(&entry.path(), &relative, rules, out)?;
        } else {
            out.push((relative, false));
        }
    }

    if out.len() == listed_before && !relative_dir.is_empty() {
        out.push((relative_dir.to_string(), true));
    }

    Ok(())
}

/// Symlinks to files are synced by content. Links to directories are never
/// followed, which also keeps link cycles out of the walk.
fn links_to_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file())
}
