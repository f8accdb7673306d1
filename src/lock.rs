// src/lock.rs

//! File locks for the install database and install prefixes
//!
//! # Lock Strategy
//!
//! - **Index lock**: [`LockFile`], an `flock` on `<root>/.sprig-db/lock`.
//!   Readers take it shared, writers exclusive. Acquisition polls until a
//!   timeout and then fails with [`Error::LockTimeout`].
//! - **Prefix locks**: [`PrefixLock`], one marker file per spec hash,
//!   created with `O_EXCL` and held for a whole build+install. The marker
//!   records pid, host and time, so a lock left by a crashed process can be
//!   detected and broken instead of blocking forever.
//!
//! `flock` locks belong to the open file description, so two handles in one
//! process exclude each other just like two processes do.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tracing::{debug, warn};

/// Markers that cannot be parsed are treated as stale after this long
const UNREADABLE_GRACE: Duration = Duration::from_secs(10);

/// Which side of a readers-writer lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockKind {
    Read,
    Write,
}

/// Delay before the next attempt: fast at first, slower the longer we wait
fn poll_interval(attempt: u32) -> Duration {
    match attempt {
        0..20 => Duration::from_millis(100),
        20..60 => Duration::from_millis(200),
        _ => Duration::from_millis(500),
    }
}

fn sleep_before_retry(attempt: u32, start: Instant, timeout: Duration) {
    let left = timeout.saturating_sub(start.elapsed());
    std::thread::sleep(poll_interval(attempt).min(left));
}

/// Name of this machine, as recorded in lock markers
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// True unless the kernel says no process has this pid
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM: the process exists but belongs to someone else
        Err(_) => true,
    }
}

/// Readers-writer lock backed by `flock` on one file
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    timeout: Duration,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a shared lock
    pub fn read(&self) -> Result<LockGuard> {
        self.acquire(LockKind::Read)
    }

    /// Acquire an exclusive lock
    pub fn write(&self) -> Result<LockGuard> {
        self.acquire(LockKind::Write)
    }

    fn acquire(&self, kind: LockKind) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::io_at(&self.path, e))?;

        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match kind {
                LockKind::Read => FileExt::try_lock_shared(&file),
                LockKind::Write => FileExt::try_lock_exclusive(&file),
            };
            match result {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::io_at(&self.path, e)),
            }

            let waited = start.elapsed();
            if waited >= self.timeout {
                let holder = read_holder(&mut file);
                warn!(
                    "Timed out waiting for {} lock on {:?} after {} attempts",
                    kind, self.path, attempts
                );
                return Err(Error::LockTimeout {
                    kind,
                    path: self.path.clone(),
                    waited,
                    attempts,
                    holder,
                });
            }
            sleep_before_retry(attempts, start, self.timeout);
        }

        if kind == LockKind::Write {
            let note = format!("pid={},host={}", std::process::id(), hostname());
            file.set_len(0)
                .and_then(|_| file.seek(SeekFrom::Start(0)))
                .and_then(|_| file.write_all(note.as_bytes()))
                .map_err(|e| Error::io_at(&self.path, e))?;
        }
        debug!("Acquired {} lock on {:?} after {} attempt(s)", kind, self.path, attempts);
        Ok(LockGuard {
            file,
            path: self.path.clone(),
            kind,
        })
    }
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// A held [`LockFile`]; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    kind: LockKind,
}

impl LockGuard {
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.kind == LockKind::Write {
            let _ = self.file.set_len(0);
        }
        let _ = FileExt::unlock(&self.file);
        debug!("Released {} lock on {:?}", self.kind, self.path);
    }
}

/// Who holds a prefix lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
    /// Distinguishes this acquisition from later ones by the same process
    pub token: String,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: hostname(),
            acquired_at: Utc::now(),
            token: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Same host: the pid is gone. Other hosts: held longer than `stale_after`.
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        if self.host == hostname() {
            return !process_alive(self.pid);
        }
        let age = Utc::now().signed_duration_since(self.acquired_at);
        age.to_std().is_ok_and(|age| age > stale_after)
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={},host={}", self.pid, self.host)
    }
}

/// Exclusive per-hash lock held for a whole build+install
#[derive(Debug, Clone)]
pub struct PrefixLock {
    path: PathBuf,
    timeout: Duration,
    stale_after: Duration,
}

impl PrefixLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current owner, if the marker exists and parses
    pub fn owner(&self) -> Option<LockOwner> {
        let text = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Wait for the lock, breaking it if its holder is gone
    pub fn acquire(&self) -> Result<PrefixLockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }

        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    let owner = LockOwner::current();
                    let body = serde_json::to_vec(&owner)?;
                    file.write_all(&body)
                        .and_then(|_| file.sync_all())
                        .map_err(|e| Error::io_at(&self.path, e))?;
                    debug!("Acquired prefix lock {:?}", self.path);
                    return Ok(PrefixLockGuard {
                        path: self.path.clone(),
                        token: owner.token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.break_if_stale()? {
                        continue;
                    }
                }
                Err(e) => return Err(Error::io_at(&self.path, e)),
            }

            let waited = start.elapsed();
            if waited >= self.timeout {
                warn!("Timed out waiting for prefix lock {:?}", self.path);
                return Err(Error::LockTimeout {
                    kind: LockKind::Write,
                    path: self.path.clone(),
                    waited,
                    attempts,
                    holder: self.owner().map(|o| o.to_string()),
                });
            }
            sleep_before_retry(attempts, start, self.timeout);
        }
    }

    /// Remove the marker if its holder is gone; true if it was removed
    fn break_if_stale(&self) -> Result<bool> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            // Vanished between create and read; retry right away
            return Ok(true);
        };
        let stale = match serde_json::from_str::<LockOwner>(&raw) {
            Ok(owner) => owner.is_stale(self.stale_after),
            Err(_) => marker_age(&self.path).is_some_and(|age| age > UNREADABLE_GRACE),
        };
        if !stale {
            return Ok(false);
        }

        // Breaking is serialized so two waiters cannot both remove a marker
        // and then remove each other's fresh one.
        let steal = LockFile::new(self.path.with_extension("steal"), self.timeout);
        let _guard = steal.write()?;
        if fs::read_to_string(&self.path).ok().as_deref() != Some(raw.as_str()) {
            return Ok(true);
        }
        warn!("Breaking stale prefix lock {:?} ({})", self.path, raw.trim());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(Error::io_at(&self.path, e)),
        }
    }
}

fn marker_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

/// A held [`PrefixLock`]; the marker is removed on drop
#[derive(Debug)]
pub struct PrefixLockGuard {
    path: PathBuf,
    token: String,
}

impl Drop for PrefixLockGuard {
    fn drop(&mut self) {
        // Leave the marker alone if someone broke our lock and took it over
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str::<LockOwner>(&text).ok())
            .is_some_and(|owner| owner.token == self.token);
        if ours {
            let _ = fs::remove_file(&self.path);
            debug!("Released prefix lock {:?}", self.path);
        }
    }
}
