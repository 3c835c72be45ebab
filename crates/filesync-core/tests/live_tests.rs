//! Tests for live mode: debounced publishing and remote batch application

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filesync_core::{
    Error, FilePayload, FileSync, FsEvent, NoHooks, RemoteChangeBatch, RemoteHooks,
    SubscriptionError, SyncConfig, TransportEvent,
};
use filesync_test_utils::{FakeRemote, FakeTransport, ScriptedPrompter, TestProject, init_tracing};
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Default)]
struct RecordingHooks {
    applied: Mutex<Vec<Vec<String>>>,
    errors: Mutex<Vec<String>>,
}

impl RemoteHooks for RecordingHooks {
    fn before_apply(&self, batch: &RemoteChangeBatch) {
        let paths = batch.changed.iter().map(|file| file.path.clone()).collect();
        self.applied.lock().unwrap().push(paths);
    }

    fn on_error(&self, error: &Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

struct Live {
    project: TestProject,
    remote: Arc<FakeRemote>,
    transport: Arc<FakeTransport>,
    engine: FileSync,
    events: mpsc::Sender<FsEvent>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<filesync_core::Result<()>>,
}

impl Live {
    async fn start(hooks: Arc<dyn RemoteHooks>) -> Self {
        Self::start_with(TestProject::config(), hooks).await
    }

    /// A project in sync with the remote at version 1, running live.
    async fn start_with(config: SyncConfig, hooks: Arc<dyn RemoteHooks>) -> Self {
        init_tracing();
        let project = TestProject::new();
        project.write("a.js", "a");
        project.write_state(1);
        let remote = Arc::new(FakeRemote::new());
        remote.commit(&[(".gadget/", ""), ("a.js", "a")], &[]);
        let transport = Arc::new(FakeTransport::new());
        let engine = project.engine_with(remote.clone(), Arc::new(ScriptedPrompter::new()), config);

        let (events, receiver) = mpsc::channel(16);
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn({
            let engine = engine.clone();
            let transport = transport.clone();
            async move {
                engine
                    .run_live(receiver, transport, hooks, async {
                        let _ = stopped.await;
                    })
                    .await
            }
        });
        transport.wait_for_subscriptions(1).await;

        Self {
            project,
            remote,
            transport,
            engine,
            events,
            stop,
            task,
        }
    }

    async fn created(&self, path: &str) {
        self.events
            .send(FsEvent::Created {
                path: PathBuf::from(path),
                is_dir: path.ends_with('/'),
            })
            .await
            .unwrap();
    }

    async fn shutdown(self) -> (TestProject, Arc<FakeRemote>) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
        (self.project, self.remote)
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("Timed out waiting for: {what}");
}

fn batch(version: u64, files: &[(&str, &str)], deleted: &[&str]) -> RemoteChangeBatch {
    RemoteChangeBatch {
        remote_files_version: version,
        changed: files
            .iter()
            .map(|(path, content)| FilePayload::from_bytes(*path, content.as_bytes().to_vec(), 0o644))
            .collect(),
        deleted: deleted.iter().map(|path| path.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_local_changes_are_published_after_the_debounce_window() {
    let live = Live::start(Arc::new(NoHooks)).await;

    live.project.write("b.js", "one");
    live.created("b.js").await;
    live.events
        .send(FsEvent::Modified {
            path: PathBuf::from("b.js"),
        })
        .await
        .unwrap();
    live.project.write("c.js", "two");
    live.created("c.js").await;

    let remote = live.remote.clone();
    eventually("both files on the remote", || {
        remote.contains("b.js") && remote.contains("c.js")
    })
    .await;

    assert_eq!(remote.publishes().len(), 1);
    assert_eq!(live.engine.files_version(), 2);
    live.shutdown().await;
}

#[tokio::test]
async fn test_a_burst_longer_than_the_window_is_published_once() {
    let config = SyncConfig {
        debounce_ms: 300,
        ..TestProject::config()
    };
    let live = Live::start_with(config, Arc::new(NoHooks)).await;

    live.project.write("b.js", "one");
    live.created("b.js").await;
    for content in ["two", "three", "four"] {
        tokio::time::sleep(Duration::from_millis(100)).await;
        live.project.write("b.js", content);
        live.events
            .send(FsEvent::Modified {
                path: PathBuf::from("b.js"),
            })
            .await
            .unwrap();
    }

    let remote = live.remote.clone();
    eventually("b.js on the remote", || remote.contains("b.js")).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(remote.publishes().len(), 1);
    assert_eq!(remote.file("b.js").as_deref(), Some("four"));
    live.shutdown().await;
}

#[tokio::test]
async fn test_subscription_asks_for_changes_since_the_recorded_version() {
    let live = Live::start(Arc::new(NoHooks)).await;

    assert_eq!(live.transport.subscriptions()[0].local_files_version, 1);
    live.shutdown().await;
}

#[tokio::test]
async fn test_remote_batches_are_applied_and_not_echoed_back() {
    let hooks = Arc::new(RecordingHooks::default());
    let live = Live::start(hooks.clone()).await;

    live.transport
        .send_batch(batch(2, &[("remote.js", "theirs")], &["a.js"]))
        .await;
    let root = live.project.root().to_path_buf();
    eventually("remote file written", || root.join("remote.js").exists()).await;

    // The watcher reports the engine's own writes
    live.created("remote.js").await;
    live.events
        .send(FsEvent::Removed {
            path: PathBuf::from("a.js"),
            is_dir: false,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(live.remote.publishes().is_empty());
    assert_eq!(live.engine.files_version(), 2);
    live.project.assert_file_not_exists("a.js");
    live.project.assert_file_contains(".gadget/backup/a.js", "a");
    assert_eq!(*hooks.applied.lock().unwrap(), vec![vec!["remote.js".to_string()]]);
    live.shutdown().await;
}

#[tokio::test]
async fn test_batches_we_already_reflect_are_skipped() {
    let live = Live::start(Arc::new(NoHooks)).await;

    live.transport
        .send_batch(batch(1, &[("stale.js", "old")], &[]))
        .await;
    live.transport
        .send_batch(batch(0, &[("older.js", "older")], &[]))
        .await;
    live.transport
        .send_batch(batch(2, &[("fresh.js", "new")], &[]))
        .await;
    let root = live.project.root().to_path_buf();
    eventually("fresh batch applied", || root.join("fresh.js").exists()).await;

    live.project.assert_file_not_exists("stale.js");
    live.project.assert_file_not_exists("older.js");
    assert_eq!(live.engine.files_version(), 2);
    live.shutdown().await;
}

#[tokio::test]
async fn test_ignored_paths_in_batches_are_dropped() {
    let hooks = Arc::new(RecordingHooks::default());
    let live = Live::start(hooks.clone()).await;

    live.transport
        .send_batch(batch(
            2,
            &[("node_modules/dep/index.js", "dep"), ("ok.js", "ok")],
            &[],
        ))
        .await;
    let root = live.project.root().to_path_buf();
    eventually("batch applied", || root.join("ok.js").exists()).await;

    live.project.assert_file_not_exists("node_modules/dep/index.js");
    assert_eq!(*hooks.applied.lock().unwrap(), vec![vec!["ok.js".to_string()]]);
    live.shutdown().await;
}

#[tokio::test]
async fn test_ignore_file_in_a_batch_filters_the_rest_of_it() {
    let hooks = Arc::new(RecordingHooks::default());
    let live = Live::start(hooks.clone()).await;

    live.transport
        .send_batch(batch(
            2,
            &[(".ignore", "secret.txt\n"), ("secret.txt", "hunter2"), ("ok.js", "ok")],
            &[],
        ))
        .await;
    let root = live.project.root().to_path_buf();
    eventually("batch applied", || root.join("ok.js").exists()).await;

    live.project.assert_file_not_exists("secret.txt");
    live.project.assert_file_contains(".ignore", "secret.txt\n");
    assert!(live.engine.directory().ignores("secret.txt"));
    assert_eq!(
        *hooks.applied.lock().unwrap(),
        vec![vec![".ignore".to_string(), "ok.js".to_string()]]
    );
    live.shutdown().await;
}

#[tokio::test]
async fn test_batch_deleting_a_directory_and_rewriting_a_child() {
    let live = Live::start(Arc::new(NoHooks)).await;
    live.project.write("foo/old.js", "old");
    live.project.write("foo/baz.js", "base");

    live.transport
        .send_batch(batch(2, &[("foo/baz.js", "new")], &["foo/"]))
        .await;
    let engine = live.engine.clone();
    eventually("batch applied", || engine.files_version() == 2).await;

    live.project.assert_file_contains("foo/baz.js", "new");
    live.project.assert_file_not_exists("foo/old.js");
    live.project.assert_file_contains(".gadget/backup/foo/old.js", "old");
    live.project.assert_file_contains(".gadget/backup/foo/baz.js", "base");
    live.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_pending_changes() {
    let config = SyncConfig {
        debounce_ms: 60_000,
        ..TestProject::config()
    };
    let live = Live::start_with(config, Arc::new(NoHooks)).await;

    live.project.write("late.js", "just in time");
    live.created("late.js").await;
    // Let the loop pick the event up before stopping
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_project, remote) = live.shutdown().await;

    assert_eq!(remote.file("late.js").as_deref(), Some("just in time"));
}

#[tokio::test]
async fn test_closed_event_stream_ends_the_loop() {
    let live = Live::start(Arc::new(NoHooks)).await;
    let Live {
        events,
        task,
        transport,
        stop: _stop,
        ..
    } = live;

    drop(events);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("live loop did not stop")
        .unwrap()
        .unwrap();
    assert!(!transport.is_streaming());
}

#[tokio::test]
async fn test_fatal_subscription_error_is_reported() {
    let hooks = Arc::new(RecordingHooks::default());
    let live = Live::start(hooks.clone()).await;

    live.transport
        .send(TransportEvent::Error(SubscriptionError::Auth("expired".into())))
        .await;

    eventually("error reported", || !hooks.errors.lock().unwrap().is_empty()).await;
    assert!(hooks.errors.lock().unwrap()[0].contains("expired"));

    // Local changes still flow after the subscription is gone
    live.project.write("b.js", "b");
    live.created("b.js").await;
    let remote = live.remote.clone();
    eventually("local change published", || remote.contains("b.js")).await;
    live.shutdown().await;
}
