//! [`TestProject`] builder for sync scenarios.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use filesync_core::{FileSync, Prompter, RemoteFiles, StateOptions, SyncConfig, SyncState};
use filesync_fs::Directory;
use tempfile::TempDir;

/// Application every test project is bound to.
pub const APPLICATION: &str = "test-app";

/// Environment every test project is bound to.
pub const ENVIRONMENT: &str = "development";

/// A temporary local project directory with helper methods for test setup
/// and assertion.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use filesync_core::NonInteractive;
/// use filesync_test_utils::{FakeRemote, TestProject};
///
/// let project = TestProject::new();
/// project.write("index.js", "hello");
/// let engine = project.engine(Arc::new(FakeRemote::new()), Arc::new(NonInteractive::default()));
/// project.assert_file_contains("index.js", "hello");
/// ```
pub struct TestProject {
    temp_dir: TempDir,
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProject {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// Return the root path of the temporary directory.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `content` to `path`, creating parent directories.
    pub fn write(&self, path: &str, content: &str) {
        let full_path = self.root().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full_path, content)
            .unwrap_or_else(|e| panic!("Could not write {}: {e}", full_path.display()));
    }

    pub fn mkdir(&self, path: &str) {
        fs::create_dir_all(self.root().join(path)).unwrap();
    }

    /// Remove a file or a whole directory.
    pub fn remove(&self, path: &str) {
        let full_path = self.root().join(path);
        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).unwrap();
        } else {
            fs::remove_file(&full_path).unwrap();
        }
    }

    pub fn read(&self, path: &str) -> String {
        let full_path = self.root().join(path);
        fs::read_to_string(&full_path)
            .unwrap_or_else(|_| panic!("Could not read file: {}", full_path.display()))
    }

    /// Write a state file recording `files_version` for [`ENVIRONMENT`].
    pub fn write_state(&self, files_version: u64) {
        self.write(
            ".gadget/sync.json",
            &format!(
                r#"{{"application":"{APPLICATION}","environment":"{ENVIRONMENT}","environments":{{"{ENVIRONMENT}":{{"filesVersion":"{files_version}"}}}}}}"#
            ),
        );
    }

    /// Open the directory with its ignore rules.
    pub fn directory(&self) -> Directory {
        Directory::init(self.root()).unwrap()
    }

    /// Engine settings with short timings and no install command.
    pub fn config() -> SyncConfig {
        SyncConfig {
            debounce_ms: 20,
            recent_write_ttl_ms: 200,
            shutdown_timeout_ms: 2_000,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            install_command: Vec::new(),
            ..SyncConfig::default()
        }
    }

    /// An engine over this directory, bound to [`APPLICATION`].
    pub fn engine(&self, remote: Arc<dyn RemoteFiles>, prompter: Arc<dyn Prompter>) -> FileSync {
        self.engine_with(remote, prompter, Self::config())
    }

    pub fn engine_with(
        &self,
        remote: Arc<dyn RemoteFiles>,
        prompter: Arc<dyn Prompter>,
        config: SyncConfig,
    ) -> FileSync {
        let directory = self.directory();
        let mut options = StateOptions::new(APPLICATION, ENVIRONMENT);
        options.allow_unknown_directory = true;
        let state = SyncState::load_or_init(&directory, &options).unwrap();
        FileSync::new(directory, state, remote, prompter, config)
    }

    /// Assert that `path` (relative to the project root) exists.
    ///
    /// # Panics
    /// Panics with a descriptive message if the path does not exist.
    pub fn assert_file_exists(&self, path: &str) {
        let full_path = self.root().join(path);
        assert!(
            full_path.exists(),
            "Expected file to exist: {}",
            full_path.display()
        );
    }

    /// Assert that `path` (relative to the project root) does **not** exist.
    ///
    /// # Panics
    /// Panics with a descriptive message if the path exists.
    pub fn assert_file_not_exists(&self, path: &str) {
        let full_path = self.root().join(path);
        assert!(
            !full_path.exists(),
            "Expected file NOT to exist: {}",
            full_path.display()
        );
    }

    /// Assert that the file at `path` holds exactly `content`.
    ///
    /// # Panics
    /// Panics if the file cannot be read or holds something else.
    pub fn assert_file_contains(&self, path: &str, content: &str) {
        let file_content = self.read(path);
        assert_eq!(
            file_content, content,
            "File {path} does not hold the expected content"
        );
    }
}
