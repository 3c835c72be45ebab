//! Conflict detection between local and remote change sets

use std::collections::BTreeMap;

use filesync_fs::{HashSnapshot, is_within};

use crate::changes::{Change, Changes};

/// A path both sides changed to different results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub local: Change,
    pub remote: Change,
}

/// Conflicting paths in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conflicts {
    entries: BTreeMap<String, Conflict>,
}

impl Conflicts {
    /// Paths changed on both sides whose resulting fingerprints differ.
    ///
    /// `local` and `remote` are the snapshots each change set leads to; two
    /// deletes agree, as do two writes of the same content.
    pub fn find(
        local_changes: &Changes,
        remote_changes: &Changes,
        local: &HashSnapshot,
        remote: &HashSnapshot,
    ) -> Self {
        let entries = local_changes
            .iter()
            .filter_map(|(path, local_change)| {
                let remote_change = remote_changes.get(path)?;
                let agree = match (local_change, remote_change) {
                    (Change::Delete, Change::Delete) => true,
                    (Change::Delete, _) | (_, Change::Delete) => false,
                    _ => local.get(path) == remote.get(path),
                };
                (!agree).then(|| {
                    (
                        path.to_string(),
                        Conflict {
                            local: local_change.clone(),
                            remote: remote_change.clone(),
                        },
                    )
                })
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Conflict)> {
        self.entries.iter().map(|(path, conflict)| (path.as_str(), conflict))
    }

    /// Remove and return the conflicts under `dir`.
    pub fn take_within(&mut self, dir: &str) -> Conflicts {
        let (inside, outside) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(path, _)| is_within(path, dir));
        self.entries = outside;
        Conflicts { entries: inside }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn changes(entries: &[(&str, Change)]) -> Changes {
        entries
            .iter()
            .map(|(path, change)| (path.to_string(), change.clone()))
            .collect()
    }

    fn snapshot(entries: &[(&str, &str)]) -> HashSnapshot {
        entries
            .iter()
            .map(|(path, hash)| (path.to_string(), hash.to_string()))
            .collect()
    }

    #[rstest]
    #[case(Change::Update, "1", Change::Update, "2", true)]
    #[case(Change::Update, "1", Change::Update, "1", false)]
    #[case(Change::create(), "1", Change::Update, "2", true)]
    #[case(Change::Update, "1", Change::Delete, "", true)]
    #[case(Change::Delete, "", Change::Update, "2", true)]
    #[case(Change::Delete, "", Change::Delete, "", false)]
    fn test_conflict_classification(
        #[case] local_change: Change,
        #[case] local_hash: &str,
        #[case] remote_change: Change,
        #[case] remote_hash: &str,
        #[case] conflicting: bool,
    ) {
        let local = if local_hash.is_empty() { snapshot(&[]) } else { snapshot(&[("a.js", local_hash)]) };
        let remote = if remote_hash.is_empty() { snapshot(&[]) } else { snapshot(&[("a.js", remote_hash)]) };

        let conflicts = Conflicts::find(
            &changes(&[("a.js", local_change)]),
            &changes(&[("a.js", remote_change)]),
            &local,
            &remote,
        );

        assert_eq!(conflicts.contains("a.js"), conflicting);
    }

    #[test]
    fn test_one_sided_changes_never_conflict() {
        let conflicts = Conflicts::find(
            &changes(&[("a.js", Change::Update)]),
            &changes(&[("b.js", Change::Update)]),
            &snapshot(&[("a.js", "1")]),
            &snapshot(&[("b.js", "2")]),
        );

        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_take_within_splits_reserved() {
        let mut conflicts = Conflicts::find(
            &changes(&[(".gadget/a.js", Change::Update), ("b.js", Change::Update)]),
            &changes(&[(".gadget/a.js", Change::Update), ("b.js", Change::Update)]),
            &snapshot(&[(".gadget/a.js", "1"), ("b.js", "1")]),
            &snapshot(&[(".gadget/a.js", "2"), ("b.js", "2")]),
        );

        let reserved = conflicts.take_within(".gadget/");

        assert_eq!(reserved.paths().collect::<Vec<_>>(), vec![".gadget/a.js"]);
        assert_eq!(conflicts.paths().collect::<Vec<_>>(), vec!["b.js"]);
    }
}
