//! Exclusive cluster lock file.
//!
//! A running engine holds `postmaster.pid` in its cluster directory. The
//! first line is the owner's process id. A lock whose owner is no longer
//! alive is stale and is replaced; a lock owned by a live process,
//! including this one, is a conflict.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use pgembed_common::LOCK_FILE;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// How many times a stale lock is cleared before giving up.
const MAX_ATTEMPTS: usize = 3;

/// A held cluster lock. The file is removed on drop.
#[derive(Debug)]
pub struct ClusterLock {
    path: PathBuf,
    pid: u32,
}

impl ClusterLock {
    /// Creates the lock file in `data_dir`.
    pub fn acquire(data_dir: &Path) -> EngineResult<Self> {
        let path = data_dir.join(LOCK_FILE);
        let pid = std::process::id();

        for _ in 0..MAX_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let started = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    let contents = format!("{}\n{}\n{}\n", pid, data_dir.display(), started);
                    file.write_all(contents.as_bytes())
                        .and_then(|_| file.sync_all())
                        .map_err(|e| EngineError::io("write lock file", path.display(), &e))?;

                    debug!(path = %path.display(), pid, "Acquired cluster lock");
                    return Ok(Self { path, pid });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let contents = fs::read_to_string(&path)
                        .map_err(|e| EngineError::io("read lock file", path.display(), &e))?;
                    let owner = contents
                        .lines()
                        .next()
                        .and_then(|line| line.trim().parse::<i32>().ok());

                    match owner {
                        None => {
                            return Err(EngineError::lock_conflict(format!(
                                "bogus data in lock file \"{}\"",
                                path.display()
                            ))
                            .with_detail(
                                "Either another server is starting, or the lock file is the \
                                 remnant of a previous server startup crash.",
                            ))
                        }
                        Some(owner) if owner_is_alive(owner) => {
                            return Err(EngineError::lock_conflict(format!(
                                "lock file \"{}\" already exists",
                                path.display()
                            ))
                            .with_detail(format!(
                                "Is another postgres (PID {}) running in data directory \"{}\"?",
                                owner,
                                data_dir.display()
                            )))
                        }
                        Some(owner) => {
                            warn!(path = %path.display(), owner, "Removing stale lock file");
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => {
                                    return Err(EngineError::io(
                                        "remove old lock file",
                                        path.display(),
                                        &e,
                                    ))
                                }
                            }
                        }
                    }
                }
                Err(e) => return Err(EngineError::io("create lock file", path.display(), &e)),
            }
        }

        Err(EngineError::lock_conflict(format!(
            "could not create lock file \"{}\"",
            path.display()
        )))
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the owning process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Releases the lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ClusterLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released cluster lock"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove lock file"),
        }
    }
}

/// Returns true if `pid` names a live process. This process counts as live.
#[cfg(unix)]
fn owner_is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if pid as u32 == std::process::id() {
        return true;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn owner_is_alive(pid: i32) -> bool {
    pid > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = ClusterLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.pid(), std::process::id());

        let contents = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.lines().next(), Some(std::process::id().to_string().as_str()));

        let path = lock.path().to_path_buf();
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_conflict_with_live_owner() {
        let dir = TempDir::new().unwrap();
        let _held = ClusterLock::acquire(dir.path()).unwrap();

        let err = ClusterLock::acquire(dir.path()).unwrap_err();
        assert!(err.is_lock_conflict());
        assert!(err.message.contains("already exists"));
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE);
        fs::write(&path, "2000000000\n/old\n0\n").unwrap();

        let lock = ClusterLock::acquire(dir.path()).unwrap();
        let contents = fs::read_to_string(lock.path()).unwrap();
        assert!(contents.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_bogus_lock_contents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "").unwrap();

        let err = ClusterLock::acquire(dir.path()).unwrap_err();
        assert!(err.is_lock_conflict());
        assert!(err.message.contains("bogus data"));
    }
}
