//! Collision-free naming on the receiving side.

use std::collections::HashMap;
use std::path::Path;

use crate::file::FileStore;

/// Pick a name under `dir` that does not exist yet.
///
/// `notes.txt` becomes `notes (2).txt`, then `notes (3).txt`, and so on.
/// Everything from the first dot on is kept as the suffix, so
/// `archive.tar.gz` becomes `archive (2).tar.gz`. A leading dot is part of
/// the base name.
pub fn unique_file_name(store: &dyn FileStore, dir: &Path, name: &str) -> String {
    if !store.exists(&dir.join(name)) {
        return name.to_string();
    }

    let split = name
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '.')
        .map_or(name.len(), |(i, _)| i);
    let (base, suffix) = name.split_at(split);

    (2u64..)
        .map(|i| format!("{base} ({i}){suffix}"))
        .find(|candidate| !store.exists(&dir.join(candidate)))
        .unwrap_or_else(|| name.to_string())
}

/// Per-session relocation of top-level segments.
///
/// The first time a top-level segment is seen, a collision-free name is
/// chosen in the destination and remembered, so every descendant lands
/// under the same renamed directory.
#[derive(Debug, Default, Clone)]
pub struct RenameMap {
    roots: HashMap<String, String>,
}

impl RenameMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a relative element path onto its possibly renamed location.
    pub fn resolve(&mut self, store: &dyn FileStore, dest_dir: &Path, path: &str) -> String {
        let (root, rest) = path.split_once('/').map_or((path, None), |(r, rest)| (r, Some(rest)));

        let new_root = self
            .roots
            .entry(root.to_string())
            .or_insert_with(|| {
                let renamed = unique_file_name(store, dest_dir, root);
                if renamed != root {
                    tracing::debug!("Renaming incoming '{}' to '{}'", root, renamed);
                }
                renamed
            })
            .clone();

        match rest {
            Some(rest) => format!("{new_root}/{rest}"),
            None => new_root,
        }
    }

    /// Renamed top-level segment for `root`, if it was seen and renamed.
    #[must_use]
    pub fn renamed(&self, root: &str) -> Option<&str> {
        self.roots
            .get(root)
            .filter(|new_root| new_root.as_str() != root)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFileStore;

    #[test]
    fn test_unique_file_name_free() {
        let store = MemoryFileStore::new();
        assert_eq!(unique_file_name(&store, Path::new("/d"), "a.txt"), "a.txt");
    }

    #[test]
    fn test_unique_file_name_numbering() {
        let store = MemoryFileStore::new();
        store.insert_file("/d/notes.txt", b"x".to_vec());
        assert_eq!(
            unique_file_name(&store, Path::new("/d"), "notes.txt"),
            "notes (2).txt"
        );

        store.insert_file("/d/notes (2).txt", b"x".to_vec());
        assert_eq!(
            unique_file_name(&store, Path::new("/d"), "notes.txt"),
            "notes (3).txt"
        );
    }

    #[test]
    fn test_unique_file_name_suffix_rules() {
        let store = MemoryFileStore::new();
        store.insert_file("/d/archive.tar.gz", b"x".to_vec());
        store.insert_file("/d/.bashrc", b"x".to_vec());
        store.insert_file("/d/README", b"x".to_vec());

        let dir = Path::new("/d");
        assert_eq!(unique_file_name(&store, dir, "archive.tar.gz"), "archive (2).tar.gz");
        assert_eq!(unique_file_name(&store, dir, ".bashrc"), ".bashrc (2)");
        assert_eq!(unique_file_name(&store, dir, "README"), "README (2)");
    }

    #[test]
    fn test_rename_map_is_consistent_for_descendants() {
        let store = MemoryFileStore::new();
        store.create_dir_all(Path::new("/dest/docs")).expect("mkdir");

        let mut map = RenameMap::new();
        let dest = Path::new("/dest");
        assert_eq!(map.resolve(&store, dest, "docs"), "docs (2)");
        // The renamed directory now exists, but the mapping must stick.
        store.create_dir_all(Path::new("/dest/docs (2)")).expect("mkdir");
        assert_eq!(map.resolve(&store, dest, "docs/a.txt"), "docs (2)/a.txt");
        assert_eq!(map.resolve(&store, dest, "docs/sub/b"), "docs (2)/sub/b");
        assert_eq!(map.renamed("docs"), Some("docs (2)"));
    }

    #[test]
    fn test_rename_map_keeps_free_names() {
        let store = MemoryFileStore::new();
        let mut map = RenameMap::new();
        let dest = Path::new("/dest");

        assert_eq!(map.resolve(&store, dest, "photos"), "photos");
        store.create_dir_all(Path::new("/dest/photos")).expect("mkdir");
        assert_eq!(map.resolve(&store, dest, "photos/1.jpg"), "photos/1.jpg");
        assert_eq!(map.renamed("photos"), None);
    }
}
