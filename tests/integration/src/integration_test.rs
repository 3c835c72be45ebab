//! End-to-end tests: two clients sharing one remote project
//!
//! Each client is a separate directory with its own engine and state file;
//! the remote side is a single shared in-memory filesystem.

use std::sync::Arc;
use std::time::Duration;

use filesync_core::{
    Change, Changes, ConflictChoice, FileSync, FsEvent, NoHooks, RemoteChangeBatch, RemoteFiles,
    SyncConfig, SyncOptions,
};
use filesync_fs::NormalizedPath;
use filesync_test_utils::{FakeRemote, FakeTransport, ScriptedPrompter, TestProject, init_tracing};
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot};

struct Client {
    project: TestProject,
    engine: FileSync,
}

impl Client {
    fn new(remote: &Arc<FakeRemote>, prompter: ScriptedPrompter) -> Self {
        let project = TestProject::new();
        let engine = project.engine(remote.clone(), Arc::new(prompter));
        Self { project, engine }
    }

    async fn sync(&self) {
        self.engine.sync(SyncOptions::default()).await.unwrap();
    }
}

fn shared_remote() -> Arc<FakeRemote> {
    init_tracing();
    let remote = FakeRemote::new();
    remote.commit(&[(".gadget/", "")], &[]);
    Arc::new(remote)
}

#[tokio::test]
async fn test_edits_flow_between_two_clients() {
    let remote = shared_remote();
    let alice = Client::new(&remote, ScriptedPrompter::new());
    let bob = Client::new(&remote, ScriptedPrompter::new());

    alice.project.write("index.js", "hello");
    alice.project.mkdir("assets");
    alice.sync().await;
    bob.sync().await;

    bob.project.assert_file_contains("index.js", "hello");
    assert!(bob.project.root().join("assets").is_dir());
    assert_eq!(bob.engine.files_version(), alice.engine.files_version());

    bob.project.write("index.js", "hello from bob");
    bob.project.remove("assets");
    bob.sync().await;
    alice.sync().await;

    alice.project.assert_file_contains("index.js", "hello from bob");
    alice.project.assert_file_not_exists("assets");
    assert_eq!(alice.engine.files_version(), remote.version());
    assert!(alice.engine.status().await.unwrap().in_sync);
    assert!(bob.engine.status().await.unwrap().in_sync);
}

#[tokio::test]
async fn test_concurrent_edits_settle_on_the_chosen_side() {
    let remote = shared_remote();
    let alice = Client::new(&remote, ScriptedPrompter::new());
    let bob = Client::new(&remote, ScriptedPrompter::new().choose(ConflictChoice::KeepLocal));

    alice.project.write("index.js", "base");
    alice.sync().await;
    bob.sync().await;

    alice.project.write("index.js", "alice");
    bob.project.write("index.js", "bob");
    alice.sync().await;
    bob.sync().await;
    alice.sync().await;

    assert_eq!(remote.file("index.js").as_deref(), Some("bob"));
    alice.project.assert_file_contains("index.js", "bob");
    bob.project.assert_file_contains("index.js", "bob");
    assert_eq!(alice.engine.files_version(), bob.engine.files_version());
}

#[tokio::test]
async fn test_config_file_tunes_the_engine() {
    let remote = shared_remote();
    let project = TestProject::new();
    project.write("filesync.toml", "max_sync_attempts = 2\ninstall_command = []\n");
    let config =
        SyncConfig::load(&NormalizedPath::new(project.root().join("filesync.toml"))).unwrap();

    let engine = project.engine_with(remote.clone(), Arc::new(ScriptedPrompter::new()), config);
    engine.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(engine.config().max_sync_attempts, 2);
    assert!(remote.contains("filesync.toml"));
}

#[tokio::test]
async fn test_publish_reaches_a_live_peer() {
    let remote = shared_remote();
    let alice = Client::new(&remote, ScriptedPrompter::new());
    let bob = Client::new(&remote, ScriptedPrompter::new());
    alice.project.write("index.js", "v1");
    alice.sync().await;
    bob.sync().await;

    let transport = Arc::new(FakeTransport::new());
    let (_events, receiver) = mpsc::channel::<FsEvent>(16);
    let (stop, stopped) = oneshot::channel::<()>();
    let live = tokio::spawn({
        let engine = bob.engine.clone();
        let transport = transport.clone();
        async move {
            engine
                .run_live(receiver, transport, Arc::new(NoHooks), async {
                    let _ = stopped.await;
                })
                .await
        }
    });
    transport.wait_for_subscriptions(1).await;
    assert_eq!(
        transport.subscriptions()[0].local_files_version,
        bob.engine.files_version()
    );

    alice.project.write("shared.js", "from alice");
    alice
        .engine
        .publish(Changes::from_iter([("shared.js".to_string(), Change::create())]))
        .await
        .unwrap();

    // Relay what the remote side recorded to the peer's subscription
    let call = remote.publishes().last().cloned().unwrap();
    let version = remote.version();
    let changed = remote.files_at(version, &call.changed).await.unwrap();
    transport
        .send_batch(RemoteChangeBatch {
            remote_files_version: version,
            changed,
            deleted: call.deleted,
        })
        .await;

    let target = bob.project.root().join("shared.js");
    for _ in 0..200 {
        if target.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    bob.project.assert_file_contains("shared.js", "from alice");
    assert_eq!(bob.engine.files_version(), alice.engine.files_version());

    let _ = stop.send(());
    live.await.unwrap().unwrap();
}
