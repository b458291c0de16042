//! Common test utilities for `Dukto` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Create the `notes.txt` + `docs/a.txt` selection under `base`.
///
/// Returns the two selected paths.
pub fn create_notes_and_docs(base: &Path) -> Vec<PathBuf> {
    let notes = create_test_file(base, "notes.txt", b"12345");
    create_test_file(base, "docs/a.txt", b"abc");
    vec![notes, base.join("docs")]
}

/// Drain every event currently queued.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Receive events until `pred` matches, failing after ten seconds.
pub async fn wait_for<T, F>(rx: &mut mpsc::UnboundedReceiver<T>, mut pred: F) -> Vec<T>
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.expect("event channel closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}
