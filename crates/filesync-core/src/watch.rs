//! Local file events and their translation into changes
//!
//! The watcher itself is an external collaborator; it feeds [`FsEvent`]s
//! with absolute (or root-relative) paths into the live loop, which turns
//! them into [`Change`]s here.

use std::path::PathBuf;

use filesync_fs::Directory;
use tracing::trace;

use crate::changes::Change;
use crate::recent::RecentWrites;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created { path: PathBuf, is_dir: bool },
    Modified { path: PathBuf },
    Removed { path: PathBuf, is_dir: bool },
    Renamed { from: PathBuf, to: PathBuf, is_dir: bool },
}

/// Map a watcher event to the change it stands for.
///
/// Returns `None` for ignored paths, for paths the engine wrote itself a
/// moment ago, and for directory modifications.
pub fn translate(
    event: FsEvent,
    directory: &Directory,
    recent: &RecentWrites,
) -> Option<(String, Change)> {
    let accept = |path: &str| {
        if path.is_empty() || directory.ignores(path) {
            trace!(path, "dropping ignored event");
            return false;
        }
        if recent.contains(path) {
            trace!(path, "dropping echo of our own write");
            return false;
        }
        true
    };

    match event {
        FsEvent::Created { path, is_dir } => {
            let path = directory.normalize(path, is_dir);
            accept(&path).then(|| (path, Change::create()))
        }
        FsEvent::Modified { path } => {
            let path = directory.normalize(path, false);
            if directory.absolute(&path).is_dir() {
                return None;
            }
            accept(&path).then_some((path, Change::Update))
        }
        FsEvent::Removed { path, is_dir } => {
            let path = directory.normalize(path, is_dir);
            accept(&path).then_some((path, Change::Delete))
        }
        FsEvent::Renamed { from, to, is_dir } => {
            let from = directory.normalize(from, is_dir);
            let to = directory.normalize(to, is_dir);
            let from_tracked = accept(&from);
            if !accept(&to) {
                // Moved out of view: the old path is simply gone
                return from_tracked.then_some((from, Change::Delete));
            }
            let old_path = from_tracked.then_some(from);
            Some((to, Change::Create { old_path }))
        }
    }
}
