//! Plain filesystem backend.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

use super::{ByteSink, ByteSource, EntryKind, FileStore};

/// [`FileStore`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileStore;

impl LocalFileStore {
    /// Create a filesystem store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileStore for LocalFileStore {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn is_readable(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => fs::read_dir(path).is_ok(),
            Ok(_) => fs::File::open(path).is_ok(),
            Err(_) => false,
        }
    }

    fn kind(&self, path: &Path) -> Result<EntryKind> {
        let meta = fs::metadata(path).map_err(|_| Error::CannotRead(path.display().to_string()))?;
        if meta.is_dir() {
            Ok(EntryKind::Directory)
        } else {
            Ok(EntryKind::File { size: meta.len() })
        }
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let entries =
            fs::read_dir(path).map_err(|_| Error::CannotRead(path.display().to_string()))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|_| Error::CannotRead(path.display().to_string()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| {
            tracing::warn!("Failed to create directory {}: {}", path.display(), e);
            Error::CannotWrite(path.display().to_string())
        })
    }

    fn create_file(&self, path: &Path) -> Result<ByteSink> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                tracing::warn!("Failed to create file {}: {}", path.display(), e);
                Error::CannotWrite(path.display().to_string())
            })?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    fn open_read(&self, path: &Path) -> Result<ByteSource> {
        let file =
            fs::File::open(path).map_err(|_| Error::CannotRead(path.display().to_string()))?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }
}
