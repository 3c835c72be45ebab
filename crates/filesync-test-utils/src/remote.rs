//! [`FakeRemote`]: an in-memory remote project filesystem.
//!
//! Every files version keeps a full copy of the tree, so `hashes_at` and
//! `files_at` can answer for any past version the way the real service
//! does. Tests edit the remote side directly with [`FakeRemote::commit`]
//! to play another client.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use filesync_core::{FilePayload, RemoteError, RemoteFiles};
use filesync_fs::checksum::compute_content_checksum;
use filesync_fs::{DIRECTORY_FINGERPRINT, HashSnapshot, is_within};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    content: Vec<u8>,
    mode: u32,
}

type Tree = BTreeMap<String, Entry>;

/// One call to [`RemoteFiles::publish`] as the fake received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub expected_version: u64,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Default)]
struct RemoteState {
    version: u64,
    history: BTreeMap<u64, Tree>,
    failures: VecDeque<RemoteError>,
    skew: u64,
    publishes: Vec<PublishCall>,
}

impl RemoteState {
    fn tree_at(&self, version: u64) -> Tree {
        self.history
            .range(..=version)
            .next_back()
            .map(|(_, tree)| tree.clone())
            .unwrap_or_default()
    }

    fn current(&self) -> Tree {
        self.tree_at(self.version)
    }

    fn advance(&mut self, tree: Tree, by: u64) -> u64 {
        self.version += by;
        self.history.insert(self.version, tree);
        self.version
    }
}

/// In-memory [`RemoteFiles`] with a full version history.
///
/// # Example
///
/// ```rust,no_run
/// use filesync_test_utils::FakeRemote;
///
/// let remote = FakeRemote::new();
/// remote.commit(&[("index.js", "one")], &[]);
/// assert_eq!(remote.version(), 1);
/// assert_eq!(remote.file("index.js").as_deref(), Some("one"));
/// ```
#[derive(Debug)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    /// An empty tree at files version 0.
    pub fn new() -> Self {
        let mut state = RemoteState::default();
        state.history.insert(0, Tree::new());
        Self {
            state: Mutex::new(state),
        }
    }

    /// Play another client: write `files` (a path ending in `/` creates a
    /// directory) and remove `deletes`, producing one new files version.
    pub fn commit(&self, files: &[(&str, &str)], deletes: &[&str]) -> u64 {
        let mut state = self.lock();
        let mut tree = state.current();
        for path in deletes {
            remove(&mut tree, path);
        }
        for (path, content) in files {
            tree.insert(
                path.to_string(),
                Entry {
                    content: content.as_bytes().to_vec(),
                    mode: if path.ends_with('/') { 0o755 } else { 0o644 },
                },
            );
        }
        state.advance(tree, 1)
    }

    /// Fail upcoming publishes with `error`, one per call, before they
    /// touch the tree.
    pub fn fail_next_publish(&self, error: RemoteError) {
        self.lock().failures.push_back(error);
    }

    /// Make the next successful publish land `extra` versions further than
    /// expected, as if other writes raced it.
    pub fn skew_next_publish(&self, extra: u64) {
        self.lock().skew = extra;
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Text content of `path` at the latest version.
    pub fn file(&self, path: &str) -> Option<String> {
        self.lock()
            .current()
            .get(path)
            .map(|entry| String::from_utf8_lossy(&entry.content).into_owned())
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.lock().current().get(path).map(|entry| entry.mode)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().current().contains_key(path)
    }

    /// Every path at the latest version, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock().current().into_keys().collect()
    }

    pub fn publishes(&self) -> Vec<PublishCall> {
        self.lock().publishes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }
}

fn remove(tree: &mut Tree, path: &str) {
    if path.ends_with('/') {
        tree.retain(|key, _| !is_within(key, path));
    } else {
        tree.remove(path);
    }
}

fn hashes(tree: &Tree) -> HashSnapshot {
    tree.iter()
        .map(|(path, entry)| {
            let fingerprint = if path.ends_with('/') {
                DIRECTORY_FINGERPRINT.to_string()
            } else {
                compute_content_checksum(&entry.content)
            };
            (path.clone(), fingerprint)
        })
        .collect()
}

#[async_trait]
impl RemoteFiles for FakeRemote {
    async fn hashes_at(&self, version: u64) -> Result<HashSnapshot, RemoteError> {
        let state = self.lock();
        if version > state.version {
            return Err(RemoteError::Rejected(format!(
                "files version {version} does not exist yet"
            )));
        }
        Ok(hashes(&state.tree_at(version)))
    }

    async fn latest_hashes(&self) -> Result<(u64, HashSnapshot), RemoteError> {
        let state = self.lock();
        Ok((state.version, hashes(&state.current())))
    }

    async fn files_at(
        &self,
        version: u64,
        paths: &[String],
    ) -> Result<Vec<FilePayload>, RemoteError> {
        let tree = self.lock().tree_at(version);
        Ok(paths
            .iter()
            .filter_map(|path| {
                let entry = tree.get(path)?;
                Some(if path.ends_with('/') {
                    FilePayload::directory(path.clone(), entry.mode)
                } else {
                    FilePayload::from_bytes(path.clone(), entry.content.clone(), entry.mode)
                })
            })
            .collect())
    }

    async fn publish(
        &self,
        expected_version: u64,
        changed: Vec<FilePayload>,
        deleted: Vec<String>,
    ) -> Result<u64, RemoteError> {
        let mut state = self.lock();
        state.publishes.push(PublishCall {
            expected_version,
            changed: changed.iter().map(|file| file.path.clone()).collect(),
            deleted: deleted.clone(),
        });

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if expected_version != state.version {
            return Err(RemoteError::VersionMismatch {
                actual: Some(state.version),
            });
        }

        let mut tree = state.current();
        for path in &deleted {
            remove(&mut tree, path);
        }
        for file in changed {
            if let Some(old_path) = &file.old_path {
                remove(&mut tree, old_path);
            }
            let content = file
                .decode()
                .map_err(|e| RemoteError::Malformed(e.to_string()))?;
            tree.insert(
                file.path,
                Entry {
                    content,
                    mode: file.mode,
                },
            );
        }

        let by = 1 + std::mem::take(&mut state.skew);
        Ok(state.advance(tree, by))
    }
}
