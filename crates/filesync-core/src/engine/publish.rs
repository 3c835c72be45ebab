//! Sending local changes to the remote side

use std::sync::Arc;

use filesync_fs::io;
use tracing::{debug, info, warn};

use super::{FileSync, SyncOptions};
use crate::changes::{Change, Changes};
use crate::remote::{FilePayload, RemoteError};
use crate::state::SyncState;
use crate::Result;

/// Result of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Published {
    /// The remote side moved exactly one version ahead and it was recorded
    Recorded(u64),
    /// The version token was stale or the remote side moved further than
    /// our own change explains; only a reconciliation can tell what happened
    Stale,
}

impl Published {
    pub(super) fn is_recorded(self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

impl FileSync {
    /// Send local changes with the recorded version as optimistic token.
    ///
    /// Network failures are retried with exponential backoff. A stale token
    /// or an unexpected resulting version falls back to a full
    /// reconciliation.
    pub async fn publish(&self, mut changes: Changes) -> Result<()> {
        changes.retain(|path, _| !self.inner.directory.ignores(path));
        if changes.is_empty() {
            return Ok(());
        }

        let mut state = self.inner.state.lock().await;
        match self.publish_locked(&mut state, &changes).await? {
            Published::Recorded(_) => Ok(()),
            Published::Stale => self.sync_locked(&mut state, SyncOptions::default()).await,
        }
    }

    pub(super) async fn publish_locked(
        &self,
        state: &mut SyncState,
        changes: &Changes,
    ) -> Result<Published> {
        let expected = state.files_version();
        let (changed, deleted) = self.collect_payloads(changes)?;
        if changed.is_empty() && deleted.is_empty() {
            debug!("nothing left to publish");
            return Ok(Published::Recorded(expected));
        }

        info!(
            expected,
            changed = changed.len(),
            deleted = deleted.len(),
            "publishing local changes"
        );
        match self.send_with_retry(expected, changed, deleted).await {
            Ok(version) if Some(version) == expected.checked_add(1) => {
                self.record_version(state, version)?;
                Ok(Published::Recorded(version))
            }
            Ok(version) => {
                warn!(expected, received = version, "remote files version moved unexpectedly");
                Ok(Published::Stale)
            }
            Err(RemoteError::VersionMismatch { actual }) => {
                info!(expected, ?actual, "remote files changed, reconciling");
                Ok(Published::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send_with_retry(
        &self,
        expected: u64,
        changed: Vec<FilePayload>,
        deleted: Vec<String>,
    ) -> std::result::Result<u64, RemoteError> {
        let retries = self.inner.config.publish_retries;
        let mut attempt = 0u32;

        backoff::future::retry(self.inner.config.publish_backoff(), || {
            attempt += 1;
            let current = attempt;
            let remote = Arc::clone(&self.inner.remote);
            let changed = changed.clone();
            let deleted = deleted.clone();
            async move {
                remote
                    .publish(expected, changed, deleted)
                    .await
                    .map_err(|e| {
                        if e.is_retryable() && current <= retries {
                            warn!(attempt = current, error = %e, "publish failed, retrying");
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
            }
        })
        .await
    }

    /// Read the current content of every written path. Paths that vanished
    /// since the change was observed are skipped.
    fn collect_payloads(&self, changes: &Changes) -> Result<(Vec<FilePayload>, Vec<String>)> {
        let mut changed = Vec::new();
        let mut deleted = Vec::new();

        for (path, change) in changes.iter() {
            let old_path = match change {
                Change::Delete => {
                    deleted.push(path.to_string());
                    continue;
                }
                Change::Create { old_path } => old_path.clone(),
                Change::Update => None,
            };

            let absolute = self.inner.directory.absolute(path);
            let mut payload = if path.ends_with('/') {
                if !absolute.is_dir() {
                    debug!(path, "directory vanished before publish");
                    continue;
                }
                FilePayload::directory(path, io::mode_of(&absolute)?)
            } else {
                match io::read_bytes(&absolute) {
                    Ok(bytes) => FilePayload::from_bytes(path, bytes, io::mode_of(&absolute)?),
                    Err(e) if e.is_not_found() => {
                        debug!(path, "file vanished before publish");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            payload.old_path = old_path;
            changed.push(payload);
        }

        Ok((changed, deleted))
    }
}
