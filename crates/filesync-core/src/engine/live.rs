//! Live mode: local watcher events out, remote subscription batches in

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::FileSync;
use crate::{Error, Result};
use crate::changes::{Change, Changes};
use crate::remote::RemoteChangeBatch;
use crate::subscription::{
    SubscriptionClient, SubscriptionHandle, SubscriptionMessage, SubscriptionTransport,
    SubscriptionVariables, VariablesProvider, fire,
};
use crate::watch::{FsEvent, translate};

/// Callbacks around remote batch application.
pub trait RemoteHooks: Send + Sync {
    /// Called with the filtered batch right before it is written.
    fn before_apply(&self, _batch: &RemoteChangeBatch) {}

    /// Called for every error the background tasks cannot return.
    fn on_error(&self, _error: &Error) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RemoteHooks for NoHooks {}

/// A running remote subscription feeding the engine.
#[derive(Debug)]
pub struct RemoteSubscription {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl RemoteSubscription {
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Wait for the consuming task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            log_join_error(&e);
        }
    }
}

impl FileSync {
    /// Apply remote change batches as they arrive.
    ///
    /// Each (re)subscribe asks for changes since the version recorded at
    /// that moment. Batches run through the same work queue as publishes.
    pub fn subscribe_to_remote_changes(
        &self,
        transport: Arc<dyn SubscriptionTransport>,
        hooks: Arc<dyn RemoteHooks>,
    ) -> RemoteSubscription {
        let version = self.inner.version.subscribe();
        let variables: VariablesProvider = Arc::new(move || SubscriptionVariables {
            local_files_version: *version.borrow(),
        });
        let (handle, mut messages) =
            SubscriptionClient::subscribe(transport, variables, self.inner.config.retry_policy());

        let engine = self.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match message {
                    SubscriptionMessage::Batch(batch) => {
                        if let Err(e) = engine.handle_remote_batch(batch, hooks.as_ref()).await {
                            error!(error = %e, "failed to apply remote changes");
                            hooks.on_error(&e);
                        }
                    }
                    SubscriptionMessage::Transient(e) => {
                        debug!(error = %e, "waiting for the subscription to recover");
                    }
                    SubscriptionMessage::Fatal(e) => {
                        hooks.on_error(&Error::Subscription(e));
                        break;
                    }
                    SubscriptionMessage::Completed => break,
                }
            }
            debug!("remote subscription finished");
        });

        RemoteSubscription { handle, task }
    }

    /// Run until `shutdown` resolves or `events` closes: publish debounced
    /// local changes and apply remote batches.
    ///
    /// On shutdown, intake stops, the pending batch is flushed, in-flight
    /// publishes get `shutdown_timeout` to finish and the subscription is
    /// closed.
    pub async fn run_live(
        &self,
        mut events: mpsc::Receiver<FsEvent>,
        transport: Arc<dyn SubscriptionTransport>,
        hooks: Arc<dyn RemoteHooks>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let config = &self.inner.config;
        let subscription = self.subscribe_to_remote_changes(transport, Arc::clone(&hooks));

        let mut pending = Changes::new();
        let mut window = None;
        let mut publishes = JoinSet::new();
        let mut purge = interval(config.recent_write_ttl());
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(root = %self.inner.directory.root(), "watching for changes");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("file event stream closed");
                        break;
                    };
                    let Some((path, change)) =
                        translate(event, &self.inner.directory, &self.inner.recent)
                    else {
                        continue;
                    };
                    trace!(%path, ?change, "local change");
                    coalesce(&mut pending, path, change);
                    // Every accepted event restarts the quiet period
                    window = Some(Box::pin(sleep(config.debounce())));
                }
                () = fire(&mut window) => {
                    window = None;
                    self.spawn_publish(&mut publishes, pending.take());
                }
                _ = purge.tick() => {
                    let purged = self.inner.recent.purge_expired();
                    if purged > 0 {
                        trace!(purged, "expired recent writes");
                    }
                }
                Some(joined) = publishes.join_next(), if !publishes.is_empty() => {
                    report(joined, hooks.as_ref());
                }
            }
        }

        drop(events);
        if !pending.is_empty() {
            self.spawn_publish(&mut publishes, pending.take());
        }

        let drain = async {
            while let Some(joined) = publishes.join_next().await {
                report(joined, hooks.as_ref());
            }
        };
        if timeout(config.shutdown_timeout(), drain).await.is_err() {
            warn!("publishes still running at shutdown timeout, aborting them");
            publishes.abort_all();
        }

        subscription.unsubscribe();
        if timeout(config.shutdown_timeout(), subscription.join()).await.is_err() {
            warn!("remote subscription did not stop in time");
        }
        info!("stopped");
        Ok(())
    }

    fn spawn_publish(&self, publishes: &mut JoinSet<Result<()>>, changes: Changes) {
        if changes.is_empty() {
            return;
        }
        debug!(changes = changes.len(), "flushing local changes");
        let engine = self.clone();
        publishes.spawn(async move { engine.publish(changes).await });
    }
}

/// Merge a new event into the pending batch. A write after a create is
/// still a create, so a rename's `old_path` survives later edits.
fn coalesce(pending: &mut Changes, path: String, change: Change) {
    if matches!(pending.get(&path), Some(Change::Create { .. })) && change == Change::Update {
        return;
    }
    pending.insert(path, change);
}

fn report(joined: std::result::Result<Result<()>, JoinError>, hooks: &dyn RemoteHooks) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "failed to publish local changes");
            hooks.on_error(&e);
        }
        Err(e) => log_join_error(&e),
    }
}

fn log_join_error(e: &JoinError) {
    if e.is_panic() {
        error!(error = %e, "background task panicked");
    }
}
