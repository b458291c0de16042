//! Platform-specific tests for `Dukto`.
//!
//! These tests cover how the local filesystem backend behaves with:
//! - Symlinks inside a selection
//! - Permission-denied paths (Unix)
//! - The detected local identity

mod common;

use dukto_core::file::{generate_list, EntryKind, FileStore, LocalFileStore};
use dukto_core::platform::{platform_name, Identity};
use dukto_core::Error;

#[test]
fn test_detected_identity_uses_current_platform() {
    let identity = Identity::detect();

    assert_eq!(identity.platform, platform_name());
    assert!(!identity.username.is_empty());
    assert!(!identity.hostname.ends_with(".local"));
    assert!(identity
        .signature()
        .ends_with(&format!("({})", platform_name())));
}

#[test]
fn test_missing_path_is_unreadable() {
    let temp = common::create_temp_dir();
    let store = LocalFileStore::new();
    let missing = temp.path().join("nope.txt");

    assert!(!store.exists(&missing));
    assert!(!store.is_readable(&missing));
    assert!(matches!(
        generate_list(&store, &[missing]),
        Err(Error::CannotRead(_))
    ));
}

#[cfg(unix)]
mod unix_tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Symlinks are followed and sent as the thing they point to.
    #[test]
    fn test_symlinked_file_sent_as_regular_file() {
        let temp = common::create_temp_dir();
        let target = common::create_test_file(temp.path(), "real.txt", b"hello");
        let dir = temp.path().join("share");
        std::fs::create_dir(&dir).expect("create dir");
        std::os::unix::fs::symlink(&target, dir.join("link.txt")).expect("create symlink");

        let list = generate_list(&LocalFileStore::new(), &[dir]).expect("enumerate");

        let names: Vec<_> = list.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["share", "share/link.txt"]);
        assert_eq!(list.entries[1].kind, EntryKind::File { size: 5 });
        assert_eq!(list.total_bytes, 5);
    }

    #[test]
    fn test_dangling_symlink_fails_enumeration() {
        let temp = common::create_temp_dir();
        let dir = temp.path().join("share");
        std::fs::create_dir(&dir).expect("create dir");
        std::os::unix::fs::symlink(temp.path().join("gone"), dir.join("broken"))
            .expect("create symlink");

        let store = LocalFileStore::new();
        assert!(store.exists(&dir.join("broken")));
        assert!(matches!(
            generate_list(&store, &[dir]),
            Err(Error::CannotRead(_))
        ));
    }

    /// Permission checks are meaningless when running as root.
    fn permissions_enforced(probe: &std::path::Path) -> bool {
        std::fs::File::open(probe).is_err()
    }

    #[test]
    fn test_unreadable_file_fails_enumeration() {
        let temp = common::create_temp_dir();
        let file = common::create_test_file(temp.path(), "secret.txt", b"data");
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o000))
            .expect("set permissions");

        if !permissions_enforced(&file) {
            return;
        }

        let result = generate_list(&LocalFileStore::new(), &[file.clone()]);
        assert!(matches!(result, Err(Error::CannotRead(_))));

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644))
            .expect("restore permissions");
    }

    #[test]
    fn test_create_file_in_readonly_dir_is_cannot_write() {
        let temp = common::create_temp_dir();
        let dir = temp.path().join("locked");
        std::fs::create_dir(&dir).expect("create dir");
        let probe = common::create_test_file(temp.path(), "probe.txt", b"x");
        std::fs::set_permissions(&probe, std::fs::Permissions::from_mode(0o000))
            .expect("set permissions");
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555))
            .expect("set permissions");

        if permissions_enforced(&probe) {
            let result = LocalFileStore::new().create_file(&dir.join("out.bin"));
            assert!(matches!(result, Err(Error::CannotWrite(_))));
        }

        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755))
            .expect("restore permissions");
    }
}
