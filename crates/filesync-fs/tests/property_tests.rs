use filesync_fs::{NormalizedPath, parent_dirs};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_normalization_invariants(s in "\\PC*") {
        let path = NormalizedPath::new(&s);
        let as_str = path.as_str();

        prop_assert!(!as_str.contains('\\'));

        // A leading // marks a network path; no other doubled separators survive
        let is_network = as_str.starts_with("//") && !as_str.starts_with("///");
        let remainder = if is_network { &as_str[2..] } else { as_str };
        prop_assert!(!remainder.contains("//"));

        // Cleaning is idempotent
        let roundtripped = NormalizedPath::new(path.to_native());
        prop_assert_eq!(path, roundtripped);
    }

    #[test]
    fn test_relative_to_rejoins(segments in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
        let root = NormalizedPath::new("/project/root");
        let child = root.join(&segments.join("/"));
        let relative = child.relative_to(&root);

        prop_assert_eq!(&relative, &segments.join("/"));
        prop_assert_eq!(root.join(&relative), child);
    }

    #[test]
    fn test_parent_dirs_are_prefixes(segments in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
        let path = segments.join("/");
        let parents = parent_dirs(&path);

        prop_assert_eq!(parents.len(), segments.len() - 1);
        for parent in parents {
            prop_assert!(parent.ends_with('/'));
            prop_assert!(path.starts_with(&parent));
        }
    }
}
