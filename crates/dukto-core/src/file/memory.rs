//! In-memory, path-addressed backend.
//!
//! Used where entries are not plain files on disk (content handed over by a
//! host application, or tests). Paths are treated as opaque keys with `/`
//! separated segments; the root always exists.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::error::{Error, Result};

use super::{ByteSink, ByteSource, EntryKind, FileStore};

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Arc<Mutex<Vec<u8>>>),
}

/// [`FileStore`] keeping every entry in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    nodes: Arc<Mutex<BTreeMap<PathBuf, Node>>>,
}

impl MemoryFileStore {
    /// Create an empty store containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, creating its parent directories.
    pub fn insert_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let key = normalize(path.as_ref());
        let mut nodes = self.lock();
        insert_parents(&mut nodes, &key);
        nodes.insert(key, Node::File(Arc::new(Mutex::new(content.into()))));
    }

    /// Current content of a file, if it exists.
    #[must_use]
    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().get(&normalize(path.as_ref())) {
            Some(Node::File(data)) => Some(lock_data(data).clone()),
            _ => None,
        }
    }

    /// All stored paths with their kinds, in lexical order.
    #[must_use]
    pub fn entries(&self) -> Vec<(PathBuf, EntryKind)> {
        self.lock()
            .iter()
            .map(|(path, node)| (path.clone(), node_kind(node)))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn node(&self, path: &Path) -> Option<Node> {
        let key = normalize(path);
        if is_root(&key) {
            return Some(Node::Directory);
        }
        self.lock().get(&key).cloned()
    }
}

impl FileStore for MemoryFileStore {
    fn exists(&self, path: &Path) -> bool {
        self.node(path).is_some()
    }

    fn is_readable(&self, path: &Path) -> bool {
        self.exists(path)
    }

    fn kind(&self, path: &Path) -> Result<EntryKind> {
        self.node(path)
            .map(|node| node_kind(&node))
            .ok_or_else(|| Error::CannotRead(path.display().to_string()))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let key = normalize(path);
        if !matches!(self.node(&key), Some(Node::Directory)) {
            return Err(Error::CannotRead(path.display().to_string()));
        }

        Ok(self
            .lock()
            .keys()
            .filter(|child| child.parent() == Some(key.as_path()))
            .filter_map(|child| child.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        let mut nodes = self.lock();
        let mut current = PathBuf::new();
        for component in key.components() {
            current.push(component);
            if is_root(&current) {
                continue;
            }
            match nodes.get(&current) {
                Some(Node::File(_)) => return Err(Error::CannotWrite(path.display().to_string())),
                Some(Node::Directory) => {}
                None => {
                    nodes.insert(current.clone(), Node::Directory);
                }
            }
        }
        Ok(())
    }

    fn create_file(&self, path: &Path) -> Result<ByteSink> {
        let key = normalize(path);
        let parent_is_dir = key
            .parent()
            .is_some_and(|parent| matches!(self.node(parent), Some(Node::Directory)));
        if !parent_is_dir || matches!(self.node(&key), Some(Node::Directory)) || is_root(&key) {
            return Err(Error::CannotWrite(path.display().to_string()));
        }

        let data = Arc::new(Mutex::new(Vec::new()));
        self.lock().insert(key, Node::File(Arc::clone(&data)));
        Ok(Box::new(MemoryWriter { data }))
    }

    fn open_read(&self, path: &Path) -> Result<ByteSource> {
        match self.node(path) {
            Some(Node::File(data)) => Ok(Box::new(io::Cursor::new(lock_data(&data).clone()))),
            _ => Err(Error::CannotRead(path.display().to_string())),
        }
    }
}

/// Appends written bytes to a stored file.
struct MemoryWriter {
    data: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        lock_data(&self.data).extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn lock_data(data: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

fn node_kind(node: &Node) -> EntryKind {
    match node {
        Node::Directory => EntryKind::Directory,
        Node::File(data) => EntryKind::File {
            size: lock_data(data).len() as u64,
        },
    }
}

/// Drop `.` segments and resolve `..` lexically so equal paths share a key.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn is_root(path: &Path) -> bool {
    path.as_os_str().is_empty() || path.parent().is_none()
}

fn insert_parents(nodes: &mut BTreeMap<PathBuf, Node>, key: &Path) {
    let mut ancestor = key.parent();
    while let Some(dir) = ancestor {
        if is_root(dir) {
            break;
        }
        nodes.entry(dir.to_path_buf()).or_insert(Node::Directory);
        ancestor = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_insert_creates_parents() {
        let store = MemoryFileStore::new();
        store.insert_file("/src/docs/a.txt", b"abc".to_vec());

        assert!(store.is_dir(Path::new("/src")));
        assert!(store.is_dir(Path::new("/src/docs")));
        assert_eq!(
            store.kind(Path::new("/src/docs/a.txt")).expect("kind"),
            EntryKind::File { size: 3 }
        );
        assert_eq!(
            store.list_dir(Path::new("/src")).expect("list"),
            vec!["docs".to_string()]
        );
    }

    #[test]
    fn test_root_always_exists() {
        let store = MemoryFileStore::new();
        assert!(store.exists(Path::new("/")));
        assert!(store.is_dir(Path::new("/")));
        assert!(store.list_dir(Path::new("/")).expect("list").is_empty());
    }

    #[test]
    fn test_create_file_requires_parent() {
        let store = MemoryFileStore::new();
        assert!(store.create_file(Path::new("/missing/file")).is_err());

        store.create_dir_all(Path::new("/dest")).expect("mkdir");
        assert!(store.create_file(Path::new("/dest")).is_err());
        assert!(store.create_file(Path::new("/dest/file")).is_ok());
    }

    #[test]
    fn test_create_dir_over_file_fails() {
        let store = MemoryFileStore::new();
        store.insert_file("/a", b"x".to_vec());
        assert!(store.create_dir_all(Path::new("/a/b")).is_err());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = MemoryFileStore::new();
        store.create_dir_all(Path::new("/d")).expect("mkdir");

        let mut sink = store.create_file(Path::new("/d/f")).expect("create");
        sink.write_all(b"hello ").await.expect("write");
        sink.write_all(b"world").await.expect("write");
        sink.shutdown().await.expect("shutdown");

        assert_eq!(store.read_file("/d/f").as_deref(), Some(&b"hello world"[..]));

        let mut source = store.open_read(Path::new("/d/./f")).expect("open");
        let mut content = String::new();
        source.read_to_string(&mut content).await.expect("read");
        assert_eq!(content, "hello world");
    }
}
