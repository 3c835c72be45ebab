//! Writing remote changes to disk

use filesync_fs::{ProjectPath, io};
use tracing::{debug, info, warn};

use super::FileSync;
use super::live::RemoteHooks;
use crate::changes::Changes;
use crate::install::run_install;
use crate::remote::{FilePayload, RemoteChangeBatch};
use crate::state::SyncState;
use crate::{Error, Result};

impl FileSync {
    /// Write remote `files` and remove `deletes` locally, then record
    /// `new_version`.
    ///
    /// Deleted paths are moved into the backup directory; deleting a path
    /// that is already gone is fine. The version is recorded even when
    /// there is nothing to write.
    pub async fn apply_to_local(
        &self,
        new_version: u64,
        files: Vec<FilePayload>,
        deletes: Vec<String>,
        force_version: bool,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.apply_locked(&mut state, new_version, files, deletes, force_version)
            .await
    }

    /// Apply one batch from the subscription, skipping it when it is not
    /// newer than what we already reflect.
    pub(super) async fn handle_remote_batch(
        &self,
        mut batch: RemoteChangeBatch,
        hooks: &dyn RemoteHooks,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let recorded = state.files_version();
        let version = batch.remote_files_version;

        if version < recorded {
            warn!(version, recorded, "skipping remote batch older than the local tree");
            return Ok(());
        }
        if version == recorded {
            debug!(version, "skipping remote batch we already reflect");
            return Ok(());
        }

        self.apply_ignore_file_first(&batch)?;
        batch.reject(|path| self.inner.directory.ignores(path));
        hooks.before_apply(&batch);
        self.apply_locked(&mut state, version, batch.changed, batch.deleted, false)
            .await
    }

    /// Write a new `.ignore` from `batch` ahead of the rest, so the batch's
    /// other paths are filtered with the rules it brings.
    fn apply_ignore_file_first(&self, batch: &RemoteChangeBatch) -> Result<()> {
        let ignore_file = ProjectPath::IgnoreFile.as_str();
        let Some(file) = batch.changed.iter().find(|file| file.path == ignore_file) else {
            return Ok(());
        };
        if self.inner.directory.ignores(ignore_file) {
            return Ok(());
        }

        self.inner.recent.record(ignore_file);
        io::write_file(
            &self.inner.directory.absolute(ignore_file),
            &file.decode()?,
            effective_mode(file.mode),
        )?;
        self.inner.directory.load_ignore_file()?;
        Ok(())
    }

    /// Fetch the written paths of `changes` at `version` and apply them.
    pub(super) async fn pull_changes(
        &self,
        state: &mut SyncState,
        version: u64,
        changes: &Changes,
        force_version: bool,
    ) -> Result<()> {
        let written: Vec<String> = changes.written().map(str::to_string).collect();
        let files = if written.is_empty() {
            Vec::new()
        } else {
            self.inner.remote.files_at(version, &written).await?
        };
        let deletes = changes.deleted().map(str::to_string).collect();
        self.apply_locked(state, version, files, deletes, force_version)
            .await
    }

    pub(super) async fn apply_locked(
        &self,
        state: &mut SyncState,
        new_version: u64,
        files: Vec<FilePayload>,
        deletes: Vec<String>,
        force_version: bool,
    ) -> Result<()> {
        let recorded = state.files_version();
        if new_version < recorded && !force_version {
            return Err(Error::VersionRegression {
                recorded,
                received: new_version,
            });
        }

        let directory = &self.inner.directory;
        let inside = |path: &str| {
            let normalized = directory.normalize(path, path.ends_with('/'));
            let ok = !normalized.is_empty() && normalized != ".." && !normalized.starts_with("../");
            if !ok {
                warn!(path, "refusing to touch a path outside the project");
            }
            ok
        };
        let deletes: Vec<String> = deletes.into_iter().filter(|path| inside(path.as_str())).collect();
        let files: Vec<FilePayload> = files.into_iter().filter(|file| inside(file.path.as_str())).collect();

        for path in deletes.iter().chain(files.iter().map(|file| &file.path)) {
            self.inner.recent.record(path);
        }

        for path in &deletes {
            if self.inner.backups.stash(path)? {
                debug!(path = %path, "deleted");
            } else {
                debug!(path = %path, "already deleted");
            }
        }

        let mut reload_ignore = deletes.iter().any(|path| path == ProjectPath::IgnoreFile.as_str());
        let mut install = false;
        for file in &files {
            let absolute = directory.absolute(&file.path);
            if file.is_directory() {
                io::create_dir(&absolute)?;
                continue;
            }

            io::write_file(&absolute, &file.decode()?, effective_mode(file.mode))?;
            debug!(path = %file.path, "wrote");

            if file.path == ProjectPath::IgnoreFile.as_str() {
                reload_ignore = true;
            } else if file.path == ProjectPath::LockFile.as_str() {
                install = true;
            }
        }

        self.record_version(state, new_version)?;
        if !files.is_empty() || !deletes.is_empty() {
            info!(
                version = new_version,
                written = files.len(),
                deleted = deletes.len(),
                "applied remote changes"
            );
        }

        if reload_ignore {
            directory.load_ignore_file()?;
        }
        if install {
            run_install(&self.inner.config.install_command, directory.root()).await;
        }
        Ok(())
    }
}

fn effective_mode(mode: u32) -> u32 {
    match mode {
        0 => io::DEFAULT_FILE_MODE,
        mode => mode,
    }
}
