//! The sync engine
//!
//! [`FileSync`] keeps one local [`Directory`] and one remote project
//! filesystem consistent. Every operation that reads or moves the recorded
//! files version runs under a single async mutex, which doubles as the work
//! queue shared by local publishes and remote applies.
//!
//! Three snapshots drive every decision:
//!
//! - `local`: what is on disk now
//! - `origin`: the remote tree at the recorded files version, i.e. the
//!   common ancestor of both sides
//! - `remote`: the remote tree at its latest files version
//!
//! Changes from `origin` to each side are compared; paths both sides
//! changed differently are conflicts.

mod apply;
mod live;
mod publish;

use std::sync::Arc;

use filesync_fs::{Directory, HashSnapshot, ProjectPath};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::backup::BackupStore;
use crate::changes::{Changes, changes_needed, diff};
use crate::config::SyncConfig;
use crate::conflicts::Conflicts;
use crate::prompt::{ConflictChoice, Prompter};
use crate::recent::RecentWrites;
use crate::remote::RemoteFiles;
use crate::state::SyncState;
use crate::{Error, Result};

pub use live::{NoHooks, RemoteHooks, RemoteSubscription};

const RESERVED: &str = ProjectPath::ReservedDir.as_str();

/// Options for [`FileSync::sync`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Resolve conflicts this way instead of asking.
    pub prefer: Option<ConflictChoice>,
}

/// Options for [`FileSync::push`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Overwrite remote changes without asking.
    pub force: bool,
}

/// Options for [`FileSync::pull`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Overwrite local changes without asking.
    pub force: bool,
}

/// Read-only comparison of both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub files_version: u64,
    pub remote_files_version: u64,
    pub in_sync: bool,
    pub local_changes: Changes,
    pub remote_changes: Changes,
    pub conflicts: Conflicts,
}

/// Bidirectional sync between a local directory and a remote project.
#[derive(Clone)]
pub struct FileSync {
    inner: Arc<Inner>,
}

struct Inner {
    directory: Directory,
    state: Mutex<SyncState>,
    version: watch::Sender<u64>,
    remote: Arc<dyn RemoteFiles>,
    prompter: Arc<dyn Prompter>,
    recent: RecentWrites,
    backups: BackupStore,
    config: SyncConfig,
}

struct Comparison {
    local: HashSnapshot,
    remote: HashSnapshot,
    remote_version: u64,
    local_changes: Changes,
    remote_changes: Changes,
    conflicts: Conflicts,
}

impl Comparison {
    /// Equal up to directories that only one side lists explicitly while
    /// both hold something beneath them.
    fn in_sync(&self) -> bool {
        diff(&self.remote, &self.local).is_empty()
    }
}

impl FileSync {
    pub fn new(
        directory: Directory,
        state: SyncState,
        remote: Arc<dyn RemoteFiles>,
        prompter: Arc<dyn Prompter>,
        config: SyncConfig,
    ) -> Self {
        let (version, _) = watch::channel(state.files_version());
        let backups = BackupStore::new(directory.root().clone());
        let recent = RecentWrites::new(config.recent_write_ttl());
        Self {
            inner: Arc::new(Inner {
                directory,
                state: Mutex::new(state),
                version,
                remote,
                prompter,
                recent,
                backups,
                config,
            }),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.inner.directory
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn recent_writes(&self) -> &RecentWrites {
        &self.inner.recent
    }

    /// The recorded files version of the active environment.
    pub fn files_version(&self) -> u64 {
        *self.inner.version.borrow()
    }

    /// Follow the recorded files version as it advances.
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Compare both sides without changing anything.
    pub async fn status(&self) -> Result<SyncStatus> {
        let state = self.inner.state.lock().await;
        let files_version = state.files_version();
        let comparison = self.compare(files_version).await?;
        Ok(SyncStatus {
            files_version,
            remote_files_version: comparison.remote_version,
            in_sync: comparison.in_sync(),
            local_changes: comparison.local_changes,
            remote_changes: comparison.remote_changes,
            conflicts: comparison.conflicts,
        })
    }

    /// Reconcile both sides until their hashes match.
    pub async fn sync(&self, options: SyncOptions) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.sync_locked(&mut state, options).await
    }

    /// Make the remote side match the local tree, except for `.gadget/`,
    /// which is pulled from the remote side first.
    pub async fn push(&self, options: PushOptions) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let mut confirmed = options.force;

        for attempt in 1..=self.inner.config.max_sync_attempts {
            let comparison = self.compare(state.files_version()).await?;
            let (reserved, diverged) = comparison.remote_changes.partition_within(RESERVED);

            if !diverged.is_empty() && !confirmed {
                let message = format!(
                    "{} remote change(s) since the last sync will be overwritten. Push anyway?",
                    diverged.len()
                );
                if !self.inner.prompter.confirm(&message).await {
                    return Err(Error::Cancelled);
                }
                confirmed = true;
            }

            self.pull_changes(&mut state, comparison.remote_version, &reserved, false)
                .await?;

            let outgoing = changes_needed(
                &comparison.remote,
                &comparison.local,
                &comparison.remote,
                Some(RESERVED),
            );
            if outgoing.is_empty() {
                info!(version = state.files_version(), "nothing to push");
                return Ok(());
            }

            debug!(attempt, changes = outgoing.len(), "pushing local tree");
            if self.publish_locked(&mut state, &outgoing).await?.is_recorded() {
                return Ok(());
            }
        }

        Err(Error::TooManySyncAttempts {
            attempts: self.inner.config.max_sync_attempts,
        })
    }

    /// Make the local tree match the remote side. Local changes are moved
    /// to the backup directory before they are replaced.
    pub async fn pull(&self, options: PullOptions) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let comparison = self.compare(state.files_version()).await?;
        let (_, local_only) = comparison.local_changes.partition_within(RESERVED);

        if !local_only.is_empty() && !options.force {
            let message = format!(
                "{} local change(s) will be moved to {} and replaced. Pull anyway?",
                local_only.len(),
                ProjectPath::BackupDir
            );
            if !self.inner.prompter.confirm(&message).await {
                return Err(Error::Cancelled);
            }
        }

        for path in local_only.written().filter(|path| !path.ends_with('/')) {
            self.inner.recent.record(path);
            self.inner.backups.stash(path)?;
        }

        let incoming = diff(&comparison.local, &comparison.remote);
        self.pull_changes(&mut state, comparison.remote_version, &incoming, false)
            .await
    }

    async fn sync_locked(&self, state: &mut SyncState, options: SyncOptions) -> Result<()> {
        let max_attempts = self.inner.config.max_sync_attempts;

        for attempt in 1..=max_attempts {
            let comparison = self.compare(state.files_version()).await?;
            if comparison.in_sync() {
                if comparison.remote_version > state.files_version() {
                    self.record_version(state, comparison.remote_version)?;
                }
                info!(version = state.files_version(), "in sync");
                return Ok(());
            }

            let Comparison {
                remote_version,
                mut local_changes,
                mut remote_changes,
                mut conflicts,
                ..
            } = comparison;
            debug!(
                attempt,
                local = local_changes.len(),
                remote = remote_changes.len(),
                conflicts = conflicts.len(),
                "reconciling"
            );

            for path in conflicts.take_within(RESERVED).paths() {
                debug!(path, "conflict under reserved directory, keeping remote");
                local_changes.remove(path);
            }

            if !conflicts.is_empty() {
                let choice = match options.prefer {
                    Some(choice) => choice,
                    None => self.inner.prompter.resolve_conflicts(&conflicts).await,
                };
                info!(?choice, conflicts = conflicts.len(), "resolving conflicts");
                match choice {
                    ConflictChoice::Cancel => return Err(Error::Cancelled),
                    ConflictChoice::KeepLocal => conflicts.paths().for_each(|path| {
                        remote_changes.remove(path);
                    }),
                    ConflictChoice::KeepRemote => conflicts.paths().for_each(|path| {
                        local_changes.remove(path);
                    }),
                }
            }

            self.pull_changes(state, remote_version, &remote_changes, false)
                .await?;
            if !local_changes.is_empty() {
                self.publish_locked(state, &local_changes).await?;
            }
        }

        Err(Error::TooManySyncAttempts {
            attempts: max_attempts,
        })
    }

    async fn compare(&self, files_version: u64) -> Result<Comparison> {
        let local = self.inner.directory.hashes()?;
        let origin = self.visible(self.inner.remote.hashes_at(files_version).await?);
        let (remote_version, remote) = self.inner.remote.latest_hashes().await?;
        let remote = self.visible(remote);

        let local_changes = changes_needed(&origin, &local, &remote, None);
        let remote_changes = changes_needed(&origin, &remote, &local, None);
        let conflicts = Conflicts::find(&local_changes, &remote_changes, &local, &remote);

        Ok(Comparison {
            local,
            remote,
            remote_version,
            local_changes,
            remote_changes,
            conflicts,
        })
    }

    /// Drop remote entries the local side ignores.
    fn visible(&self, mut snapshot: HashSnapshot) -> HashSnapshot {
        snapshot.retain(|path, _| !self.inner.directory.ignores(path));
        snapshot
    }

    fn record_version(&self, state: &mut SyncState, version: u64) -> Result<()> {
        let previous = state.files_version();
        state.save(version)?;
        self.inner.version.send_replace(version);
        if version != previous {
            info!(from = previous, to = version, "files version advanced");
        }
        Ok(())
    }
}
