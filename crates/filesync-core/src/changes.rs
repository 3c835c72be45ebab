//! Change sets and hash snapshot diffs
//!
//! A [`Changes`] value maps canonical project-relative paths to what
//! happened to them. It is produced either by [`diff`]ing two
//! [`HashSnapshot`]s or by the file watcher, and consumed by the engine when
//! writing to disk or publishing to the remote side.

use std::collections::BTreeMap;

use filesync_fs::{HashSnapshot, is_within};

/// What happened to a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The path is new. `old_path` is set when the watcher saw a rename.
    Create { old_path: Option<String> },
    Update,
    Delete,
}

impl Change {
    pub fn create() -> Self {
        Self::Create { old_path: None }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// Path-keyed set of changes. Later inserts for a path replace earlier ones
/// and iteration is always in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    entries: BTreeMap<String, Change>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, change: Change) {
        self.entries.insert(path.into(), change);
    }

    pub fn get(&self, path: &str) -> Option<&Change> {
        self.entries.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<Change> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.entries.iter().map(|(path, change)| (path.as_str(), change))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Paths whose new content has to be transferred.
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, change)| !change.is_delete())
            .map(|(path, _)| path)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, change)| change.is_delete())
            .map(|(path, _)| path)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Change) -> bool) {
        self.entries.retain(|path, change| keep(path, change));
    }

    /// Split into the changes under `dir` and everything else.
    pub fn partition_within(self, dir: &str) -> (Changes, Changes) {
        let (inside, outside): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .entries
            .into_iter()
            .partition(|(path, _)| is_within(path, dir));
        (Changes { entries: inside }, Changes { entries: outside })
    }

    pub fn take(&mut self) -> Changes {
        std::mem::take(self)
    }
}

impl FromIterator<(String, Change)> for Changes {
    fn from_iter<I: IntoIterator<Item = (String, Change)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Changes {
    type Item = (String, Change);
    type IntoIter = std::collections::btree_map::IntoIter<String, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Changes that turn `source` into `target`.
///
/// A directory missing from `target` is kept (no delete) while `target`
/// still has something beneath it: snapshots only list directories that
/// have no listed children, so its absence says nothing about the
/// directory itself. Renames are never inferred.
pub fn diff(source: &HashSnapshot, target: &HashSnapshot) -> Changes {
    let mut changes = Changes::new();

    for (path, fingerprint) in target {
        match source.get(path) {
            None => changes.insert(path.clone(), Change::create()),
            Some(previous) if previous != fingerprint => changes.insert(path.clone(), Change::Update),
            Some(_) => {}
        }
    }

    for path in source.keys() {
        if target.contains_key(path) {
            continue;
        }
        if path.ends_with('/') && has_descendant(target, path) {
            continue;
        }
        changes.insert(path.clone(), Change::Delete);
    }

    changes
}

/// [`diff`] minus whatever `existing` already reflects, optionally dropping
/// everything under `skip_prefix`.
///
/// Writes whose target fingerprint `existing` already has and deletes of
/// paths `existing` lacks are no-ops for the side described by `existing`.
pub fn changes_needed(
    source: &HashSnapshot,
    target: &HashSnapshot,
    existing: &HashSnapshot,
    skip_prefix: Option<&str>,
) -> Changes {
    let mut changes = diff(source, target);
    changes.retain(|path, change| {
        if skip_prefix.is_some_and(|prefix| is_within(path, prefix)) {
            return false;
        }
        match change {
            Change::Delete => existing.contains_key(path),
            _ => existing.get(path) != target.get(path),
        }
    });
    changes
}

fn has_descendant(snapshot: &HashSnapshot, dir: &str) -> bool {
    snapshot
        .range::<str, _>((std::ops::Bound::Excluded(dir), std::ops::Bound::Unbounded))
        .next()
        .is_some_and(|(path, _)| path.starts_with(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesync_fs::DIRECTORY_FINGERPRINT;
    use pretty_assertions::assert_eq;

    fn snapshot(entries: &[(&str, &str)]) -> HashSnapshot {
        entries
            .iter()
            .map(|(path, hash)| (path.to_string(), hash.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_create_update_delete() {
        let source = snapshot(&[("a.js", "1"), ("b.js", "1"), ("c.js", "1")]);
        let target = snapshot(&[("a.js", "1"), ("b.js", "2"), ("d.js", "1")]);

        let changes = diff(&source, &target);

        assert_eq!(
            changes.into_iter().collect::<Vec<_>>(),
            vec![
                ("b.js".to_string(), Change::Update),
                ("c.js".to_string(), Change::Delete),
                ("d.js".to_string(), Change::create()),
            ]
        );
    }

    #[test]
    fn test_diff_retains_directory_with_descendants() {
        let source = snapshot(&[("lib/", DIRECTORY_FINGERPRINT), ("old/", DIRECTORY_FINGERPRINT)]);
        let target = snapshot(&[("lib/index.js", "1")]);

        let changes = diff(&source, &target);

        assert_eq!(changes.get("lib/"), None);
        assert_eq!(changes.get("old/"), Some(&Change::Delete));
        assert_eq!(changes.get("lib/index.js"), Some(&Change::create()));
    }

    #[test]
    fn test_diff_sibling_prefix_is_not_descendant() {
        let source = snapshot(&[("lib/", DIRECTORY_FINGERPRINT)]);
        let target = snapshot(&[("lib-old/a.js", "1"), ("lib.js", "1")]);

        assert_eq!(diff(&source, &target).get("lib/"), Some(&Change::Delete));
    }

    #[test]
    fn test_changes_needed_skips_already_applied() {
        let origin = snapshot(&[("a.js", "1"), ("b.js", "1")]);
        let local = snapshot(&[("a.js", "2"), ("c.js", "1")]);
        let remote = snapshot(&[("a.js", "2"), ("b.js", "1")]);

        let changes = changes_needed(&origin, &local, &remote, None);

        assert!(!changes.contains("a.js"), "remote already has a.js");
        assert_eq!(changes.get("b.js"), Some(&Change::Delete));
        assert_eq!(changes.get("c.js"), Some(&Change::create()));
    }

    #[test]
    fn test_changes_needed_drops_deletes_of_absent_paths() {
        let origin = snapshot(&[("a.js", "1")]);
        let local = snapshot(&[]);
        let remote = snapshot(&[]);

        assert!(changes_needed(&origin, &local, &remote, None).is_empty());
    }

    #[test]
    fn test_changes_needed_skip_prefix() {
        let source = snapshot(&[]);
        let target = snapshot(&[(".gadget/client.js", "1"), ("index.js", "1")]);

        let changes = changes_needed(&source, &target, &source, Some(".gadget/"));

        assert_eq!(changes.paths().collect::<Vec<_>>(), vec!["index.js"]);
    }

    #[test]
    fn test_last_insert_wins() {
        let mut changes = Changes::new();
        changes.insert("a.js", Change::create());
        changes.insert("a.js", Change::Delete);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("a.js"), Some(&Change::Delete));
    }

    #[test]
    fn test_partition_within() {
        let changes: Changes = [
            (".gadget/a.js".to_string(), Change::Update),
            (".gadgetrc".to_string(), Change::Update),
            ("b.js".to_string(), Change::Delete),
        ]
        .into_iter()
        .collect();

        let (reserved, rest) = changes.partition_within(".gadget/");

        assert_eq!(reserved.paths().collect::<Vec<_>>(), vec![".gadget/a.js"]);
        assert_eq!(rest.paths().collect::<Vec<_>>(), vec![".gadgetrc", "b.js"]);
    }
}
