//! Paths the engine itself just wrote
//!
//! Every local write caused by a remote batch is recorded here, together
//! with its ancestor directories, so the watch loop can drop the echo
//! events instead of publishing them back.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use filesync_fs::parent_dirs;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RecentWrites {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl RecentWrites {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `path` and every directory above it.
    pub fn record(&self, path: &str) {
        let expires = Instant::now() + self.ttl;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for dir in parent_dirs(path) {
            entries.insert(dir, expires);
        }
        entries.insert(path.to_string(), expires);
    }

    /// Whether `path` was written within the ttl.
    pub fn contains(&self, path: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(path)
            .is_some_and(|expires| *expires > Instant::now())
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
