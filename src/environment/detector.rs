// src/environment/detector.rs

//! Change detection for development source trees
//!
//! A detector turns a source directory into an opaque token. Tokens are
//! stored in the environment lockfile when a dev spec is installed and
//! compared against a fresh token later.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;
use std::time::UNIX_EPOCH;
use strum_macros::{Display, EnumString};
use tracing::debug;
use walkdir::WalkDir;

/// Reports the state of a source tree
pub trait ChangeDetector: Send + Sync {
    /// Token describing the tree at `path` right now
    fn current_state(&self, path: &Path) -> Result<String>;

    /// Whether the tree changed between two tokens
    fn has_changed(&self, old: &str, new: &str) -> bool {
        old != new
    }
}

/// Available detectors, as named in configuration and on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Mtime,
    Git,
}

impl DetectorKind {
    pub fn detector(self) -> Box<dyn ChangeDetector> {
        match self {
            DetectorKind::Mtime => Box::new(MtimeDetector),
            DetectorKind::Git => Box::new(GitHeadDetector),
        }
    }
}

/// Newest modification time and file count under a directory
///
/// `.git` is skipped. The file count catches deletions that leave the
/// newest mtime unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct MtimeDetector;

impl ChangeDetector for MtimeDetector {
    fn current_state(&self, path: &Path) -> Result<String> {
        let mut newest: u128 = 0;
        let mut files: u64 = 0;
        let walker = WalkDir::new(path)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            files += 1;
            let modified = entry
                .metadata()
                .map_err(|e| Error::IoError(e.to_string()))?
                .modified()
                .map_err(|e| Error::io_at(entry.path(), e))?;
            let nanos = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            newest = newest.max(nanos);
        }
        Ok(format!("mtime:{}:{}", newest, files))
    }
}

/// Committed HEAD plus a digest of uncommitted changes
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHeadDetector;

impl GitHeadDetector {
    fn git(path: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(args)
            .output()
            .map_err(|e| Error::EnvironmentError(format!("cannot run git: {}", e)))?;
        if !output.status.success() {
            return Err(Error::EnvironmentError(format!(
                "git {} failed in {}: {}",
                args.join(" "),
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ChangeDetector for GitHeadDetector {
    fn current_state(&self, path: &Path) -> Result<String> {
        let head = Self::git(path, &["rev-parse", "HEAD"])?;
        let status = Self::git(path, &["status", "--porcelain"])?;
        if status.is_empty() {
            return Ok(head);
        }
        let digest = hex::encode(Sha256::digest(status.as_bytes()));
        debug!("{} has uncommitted changes", path.display());
        Ok(format!("{}+dirty.{}", head, &digest[..12]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
    }

    #[test]
    fn test_mtime_detects_edit_and_new_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("main.c");
        fs::write(&src, "int main() {}").unwrap();
        touch(&src, 1_000);

        let detector = MtimeDetector;
        let before = detector.current_state(tmp.path()).unwrap();
        assert!(!detector.has_changed(&before, &detector.current_state(tmp.path()).unwrap()));

        touch(&src, 2_000);
        let edited = detector.current_state(tmp.path()).unwrap();
        assert!(detector.has_changed(&before, &edited));

        let extra = tmp.path().join("util.c");
        fs::write(&extra, "").unwrap();
        touch(&extra, 10);
        assert!(detector.has_changed(&edited, &detector.current_state(tmp.path()).unwrap()));
    }

    #[test]
    fn test_mtime_ignores_git_dir() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.c"), "").unwrap();
        let before = MtimeDetector.current_state(tmp.path()).unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git").join("index"), "x").unwrap();
        assert_eq!(before, MtimeDetector.current_state(tmp.path()).unwrap());
    }

    #[test]
    fn test_git_head_tracks_commits_and_dirt() {
        if Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let ok = Command::new("git")
                .arg("-C")
                .arg(tmp.path())
                .args(["-c", "user.name=sprig", "-c", "user.email=sprig@localhost"])
                .args(args)
                .output()
                .unwrap()
                .status
                .success();
            assert!(ok, "git {:?} failed", args);
        };
        run(&["init", "-q"]);
        fs::write(tmp.path().join("a.c"), "1").unwrap();
        run(&["add", "a.c"]);
        run(&["commit", "-q", "-m", "one"]);

        let detector = GitHeadDetector;
        let clean = detector.current_state(tmp.path()).unwrap();
        assert_eq!(clean.len(), 40);

        fs::write(tmp.path().join("a.c"), "2").unwrap();
        let dirty = detector.current_state(tmp.path()).unwrap();
        assert!(dirty.starts_with(&clean));
        assert!(detector.has_changed(&clean, &dirty));

        run(&["commit", "-q", "-am", "two"]);
        let committed = detector.current_state(tmp.path()).unwrap();
        assert!(detector.has_changed(&clean, &committed));
        assert!(!committed.contains("dirty"));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("git".parse::<DetectorKind>().unwrap(), DetectorKind::Git);
        assert_eq!(DetectorKind::default().to_string(), "mtime");
    }
}
