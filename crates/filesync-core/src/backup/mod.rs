//! Backups of local files displaced by remote changes
//!
//! Before a local file is deleted or overwritten on behalf of the remote
//! side it is moved to `.gadget/backup/<path>`. Only the latest copy of a
//! path is kept; a newer backup replaces the previous one.

use filesync_fs::{NormalizedPath, ProjectPath, io};
use tracing::debug;

use crate::Result;

/// Single-slot-per-path backup area under the project root.
#[derive(Debug, Clone)]
pub struct BackupStore {
    /// Root of the project
    root: NormalizedPath,
    /// `.gadget/backup` under the root
    backups_dir: NormalizedPath,
}

impl BackupStore {
    pub fn new(root: NormalizedPath) -> Self {
        let backups_dir = root.join(ProjectPath::BackupDir.as_str());
        Self { root, backups_dir }
    }

    /// Where the backup of `relative` lives.
    ///
    /// Returns `None` for paths that resolve outside the project root.
    pub fn backup_path(&self, relative: &str) -> Option<NormalizedPath> {
        let backup = self.backups_dir.join(relative);
        backup
            .relative_to(&self.backups_dir)
            .split('/')
            .next()
            .is_some_and(|first| first != ".." && !first.is_empty())
            .then_some(backup)
    }

    /// Move `relative` into the backup area.
    ///
    /// Returns `Ok(false)` when there was nothing to move.
    pub fn stash(&self, relative: &str) -> Result<bool> {
        let Some(backup) = self.backup_path(relative) else {
            return Err(filesync_fs::Error::OutsideRoot {
                path: relative.to_string(),
            }
            .into());
        };
        let moved = io::move_replacing(&self.root.join(relative), &backup)?;
        if moved {
            debug!(path = relative, backup = %backup, "moved to backup");
        }
        Ok(moved)
    }
}
