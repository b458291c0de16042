//! Storage backends and entry enumeration.
//!
//! Transfers never touch `std::fs` directly. Both ends go through a
//! [`FileStore`], so the enumerator and receiver logic is written once and
//! works the same on a plain filesystem ([`LocalFileStore`]) and on an
//! in-memory, path-addressed store ([`MemoryFileStore`]).

mod enumerate;
mod local;
mod memory;

pub use enumerate::{generate_list, EntryList, TransferEntry};
pub use local::LocalFileStore;
pub use memory::MemoryFileStore;

use std::fmt;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Readable byte stream handed out by a store.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Writable byte stream handed out by a store.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// What a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file of the given size
    File {
        /// Size in bytes
        size: u64,
    },
    /// Directory
    Directory,
}

/// A storage backend for outgoing and incoming entries.
pub trait FileStore: Send + Sync + fmt::Debug {
    /// Whether anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` can be opened (files) or listed (directories).
    fn is_readable(&self, path: &Path) -> bool;

    /// Kind and size of the entry at `path`.
    fn kind(&self, path: &Path) -> Result<EntryKind>;

    /// Names of the children of a directory, hidden entries included,
    /// in a stable order.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Create a directory and any missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Create (or truncate) a file for writing.
    fn create_file(&self, path: &Path) -> Result<ByteSink>;

    /// Open a file for reading.
    fn open_read(&self, path: &Path) -> Result<ByteSource>;

    /// Size of the entry at `path`; zero for directories.
    fn size(&self, path: &Path) -> Result<u64> {
        Ok(match self.kind(path)? {
            EntryKind::File { size } => size,
            EntryKind::Directory => 0,
        })
    }

    /// Whether `path` is an existing directory.
    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.kind(path), Ok(EntryKind::Directory))
    }
}

/// Check that an element name received from the network stays inside the
/// destination: relative, `/`-separated, no empty, `.` or `..` segments.
#[must_use]
pub fn is_safe_element_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('\\')
        && !name.contains('\0')
        && name
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
        && !Path::new(name).is_absolute()
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
