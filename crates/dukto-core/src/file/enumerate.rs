//! Turns user-selected paths into the ordered entry list of a transfer.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::DIRECTORY_SIZE;

use super::{EntryKind, FileStore};

/// One element of an outgoing transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEntry {
    /// Name sent on the wire, `/`-separated
    pub name: String,
    /// File or directory
    pub kind: EntryKind,
    /// Where the content is read from
    pub source: PathBuf,
}

impl TransferEntry {
    /// Size as announced on the wire: `-1` for directories.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn wire_size(&self) -> i64 {
        match self.kind {
            EntryKind::File { size } => size as i64,
            EntryKind::Directory => DIRECTORY_SIZE,
        }
    }

    /// Whether this entry is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// Enumerated entries plus the sum of their file sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryList {
    /// Entries in transmission order, parents before children
    pub entries: Vec<TransferEntry>,
    /// Total payload bytes (directories contribute nothing)
    pub total_bytes: u64,
}

impl EntryList {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the name of the first entry, as done for screenshots.
    pub fn rename_first(&mut self, name: impl Into<String>) {
        if let Some(first) = self.entries.first_mut() {
            first.name = name.into();
        }
    }

    fn push(&mut self, name: String, kind: EntryKind, source: PathBuf) {
        if let EntryKind::File { size } = kind {
            self.total_bytes += size;
        }
        self.entries.push(TransferEntry { name, kind, source });
    }
}

/// Enumerate `paths` depth-first, parents before children.
///
/// Entry names are relative to the parent of the first path. A path outside
/// that parent is named by its last component. Any unreadable path fails the
/// whole call.
pub fn generate_list(store: &dyn FileStore, paths: &[PathBuf]) -> Result<EntryList> {
    let first = paths
        .first()
        .ok_or_else(|| Error::InvalidInput("nothing to send".to_string()))?;
    let base = clean_path(first)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut list = EntryList::default();
    for path in paths {
        let path = clean_path(path);
        let name = relative_name(&base, &path)?;
        visit(store, &path, name, &mut list)?;
    }

    tracing::debug!(
        "Enumerated {} entries, {} bytes",
        list.len(),
        list.total_bytes
    );
    Ok(list)
}

fn visit(store: &dyn FileStore, path: &Path, name: String, list: &mut EntryList) -> Result<()> {
    if !store.is_readable(path) {
        return Err(Error::CannotRead(path.display().to_string()));
    }

    match store.kind(path)? {
        EntryKind::Directory => {
            list.push(name.clone(), EntryKind::Directory, path.to_path_buf());
            for child in store.list_dir(path)? {
                visit(store, &path.join(&child), format!("{name}/{child}"), list)?;
            }
        }
        kind @ EntryKind::File { .. } => list.push(name, kind, path.to_path_buf()),
    }
    Ok(())
}

/// Strip trailing separators and `.` segments.
fn clean_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn relative_name(base: &Path, path: &Path) -> Result<String> {
    let segments: Vec<String> = match path.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect(),
        _ => path
            .file_name()
            .map(|n| vec![n.to_string_lossy().into_owned()])
            .unwrap_or_default(),
    };

    if segments.is_empty() || segments.iter().any(|s| s == "..") {
        return Err(Error::InvalidInput(format!(
            "cannot derive a name for {}",
            path.display()
        )));
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{LocalFileStore, MemoryFileStore};
    use tempfile::TempDir;

    fn names(list: &EntryList) -> Vec<(&str, i64)> {
        list.entries
            .iter()
            .map(|e| (e.name.as_str(), e.wire_size()))
            .collect()
    }

    #[test]
    fn test_notes_and_docs_example() {
        let temp_dir = TempDir::new().expect("create temp dir");
        std::fs::write(temp_dir.path().join("notes.txt"), b"12345").expect("write");
        std::fs::create_dir(temp_dir.path().join("docs")).expect("mkdir");
        std::fs::write(temp_dir.path().join("docs/a.txt"), b"abc").expect("write");

        let paths = vec![
            temp_dir.path().join("notes.txt"),
            temp_dir.path().join("docs/"),
        ];
        let list = generate_list(&LocalFileStore::new(), &paths).expect("enumerate");

        assert_eq!(
            names(&list),
            vec![("notes.txt", 5), ("docs", -1), ("docs/a.txt", 3)]
        );
        assert_eq!(list.total_bytes, 8);
    }

    #[test]
    fn test_size_invariant_and_hidden_entries() {
        let store = MemoryFileStore::new();
        store.insert_file("/home/u/pics/.thumbs", vec![0u8; 7]);
        store.insert_file("/home/u/pics/2024/a.jpg", vec![0u8; 100]);
        store.insert_file("/home/u/pics/2024/b.jpg", vec![0u8; 250]);
        store
            .create_dir_all(Path::new("/home/u/pics/empty"))
            .expect("mkdir");
        store.insert_file("/home/u/todo.md", vec![0u8; 11]);

        let paths = vec![PathBuf::from("/home/u/pics"), PathBuf::from("/home/u/todo.md")];
        let list = generate_list(&store, &paths).expect("enumerate");

        assert_eq!(
            names(&list),
            vec![
                ("pics", -1),
                ("pics/.thumbs", 7),
                ("pics/2024", -1),
                ("pics/2024/a.jpg", 100),
                ("pics/2024/b.jpg", 250),
                ("pics/empty", -1),
                ("todo.md", 11),
            ]
        );
        let sum: u64 = list
            .entries
            .iter()
            .filter_map(|e| match e.kind {
                EntryKind::File { size } => Some(size),
                EntryKind::Directory => None,
            })
            .sum();
        assert_eq!(sum, list.total_bytes);
    }

    #[test]
    fn test_unreadable_path_fails_without_partial_result() {
        let store = MemoryFileStore::new();
        store.insert_file("/x/ok.txt", b"ok".to_vec());

        let paths = vec![PathBuf::from("/x/ok.txt"), PathBuf::from("/x/missing.txt")];
        let err = generate_list(&store, &paths).expect_err("missing path must fail");
        assert!(matches!(err, Error::CannotRead(ref p) if p.contains("missing.txt")));
    }

    #[test]
    fn test_path_outside_first_parent_uses_file_name() {
        let store = MemoryFileStore::new();
        store.insert_file("/a/one.txt", b"1".to_vec());
        store.insert_file("/b/c/two.txt", b"22".to_vec());

        let paths = vec![PathBuf::from("/a/one.txt"), PathBuf::from("/b/c/two.txt")];
        let list = generate_list(&store, &paths).expect("enumerate");
        assert_eq!(names(&list), vec![("one.txt", 1), ("two.txt", 2)]);
    }

    #[test]
    fn test_empty_selection_is_rejected() {
        let err = generate_list(&MemoryFileStore::new(), &[]).expect_err("empty list");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_rename_first() {
        let store = MemoryFileStore::new();
        store.insert_file("/tmp/shot-1234.jpg", vec![1, 2, 3]);

        let mut list =
            generate_list(&store, &[PathBuf::from("/tmp/shot-1234.jpg")]).expect("enumerate");
        list.rename_first("Screenshot.jpg");

        assert_eq!(list.entries[0].name, "Screenshot.jpg");
        assert_eq!(list.entries[0].source, PathBuf::from("/tmp/shot-1234.jpg"));
    }
}
