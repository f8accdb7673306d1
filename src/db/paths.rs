// src/db/paths.rs
//! Centralized path derivation for the install database

use crate::spec::SpecHash;
use std::path::{Path, PathBuf};

/// Metadata directory at the top of an install root
pub const DB_DIR: &str = ".sprig-db";

/// Get the database directory for an install root
pub fn db_dir(root: &Path) -> PathBuf {
    root.join(DB_DIR)
}

/// Get the JSON index file
pub fn index_path(root: &Path) -> PathBuf {
    db_dir(root).join("index.json")
}

/// Get the readers-writer lock guarding the index
pub fn lock_path(root: &Path) -> PathBuf {
    db_dir(root).join("lock")
}

/// Get the directory holding per-hash install locks
pub fn prefix_lock_dir(root: &Path) -> PathBuf {
    db_dir(root).join("prefix_locks")
}

/// Get the install lock for one hash
pub fn prefix_lock_path(root: &Path, hash: &SpecHash) -> PathBuf {
    prefix_lock_dir(root).join(format!("{}.lock", hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_dir() {
        assert_eq!(
            db_dir(Path::new("/opt/sprig")),
            PathBuf::from("/opt/sprig/.sprig-db")
        );
    }

    #[test]
    fn test_index_path() {
        assert_eq!(
            index_path(Path::new("/opt/sprig")),
            PathBuf::from("/opt/sprig/.sprig-db/index.json")
        );
    }

    #[test]
    fn test_prefix_lock_path() {
        let hash = SpecHash::of(b"zlib");
        let path = prefix_lock_path(Path::new("/opt/sprig"), &hash);
        assert!(path.starts_with("/opt/sprig/.sprig-db/prefix_locks"));
        assert!(path.to_string_lossy().ends_with(&format!("{}.lock", hash)));
    }
}
