use filesync_core::{Change, Conflicts, changes_needed, diff};
use filesync_fs::{DIRECTORY_FINGERPRINT, HashSnapshot};
use proptest::prelude::*;

const PATHS: &[&str] = &[
    "a.js",
    "b.js",
    "lib/",
    "lib/c.js",
    "lib/d/",
    "lib/d/e.js",
    "libx.js",
    "z/",
];

fn snapshot() -> impl Strategy<Value = HashSnapshot> {
    proptest::collection::btree_map(
        prop::sample::select(PATHS),
        prop::sample::select(&["sha256:1", "sha256:2"][..]),
        0..PATHS.len(),
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .map(|(path, hash)| {
                let hash = if path.ends_with('/') { DIRECTORY_FINGERPRINT } else { hash };
                (path.to_string(), hash.to_string())
            })
            .collect()
    })
}

/// Play `changes` onto `source`, taking written fingerprints from `target`.
fn apply(source: &HashSnapshot, target: &HashSnapshot, changes: &[(String, Change)]) -> HashSnapshot {
    let mut result = source.clone();
    for (path, change) in changes {
        if change.is_delete() {
            result.remove(path);
        } else {
            result.insert(path.clone(), target[path].clone());
        }
    }
    result
}

proptest! {
    #[test]
    fn test_applying_a_diff_reaches_the_target(source in snapshot(), target in snapshot()) {
        let changes: Vec<_> = diff(&source, &target).into_iter().collect();
        let reached = apply(&source, &target, &changes);

        prop_assert!(diff(&reached, &target).is_empty());
        for (path, fingerprint) in &target {
            prop_assert_eq!(reached.get(path), Some(fingerprint));
        }
    }

    #[test]
    fn test_diff_of_equal_snapshots_is_empty(source in snapshot()) {
        prop_assert!(diff(&source, &source).is_empty());
    }

    #[test]
    fn test_changes_needed_is_a_subset_of_diff(
        source in snapshot(),
        target in snapshot(),
        existing in snapshot(),
    ) {
        let all = diff(&source, &target);
        let needed = changes_needed(&source, &target, &existing, None);

        for (path, change) in needed.iter() {
            prop_assert_eq!(all.get(path), Some(change));
        }
    }

    #[test]
    fn test_nothing_is_needed_once_the_target_exists(source in snapshot(), target in snapshot()) {
        let needed = changes_needed(&source, &target, &target, None);

        prop_assert!(needed.is_empty());
    }

    #[test]
    fn test_conflicts_are_symmetric(
        origin in snapshot(),
        local in snapshot(),
        remote in snapshot(),
    ) {
        let local_changes = diff(&origin, &local);
        let remote_changes = diff(&origin, &remote);

        let forward = Conflicts::find(&local_changes, &remote_changes, &local, &remote);
        let backward = Conflicts::find(&remote_changes, &local_changes, &remote, &local);

        prop_assert_eq!(
            forward.paths().collect::<Vec<_>>(),
            backward.paths().collect::<Vec<_>>()
        );
        for path in forward.paths() {
            prop_assert!(local_changes.contains(path) && remote_changes.contains(path));
        }
    }
}
