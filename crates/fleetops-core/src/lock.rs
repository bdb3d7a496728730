//! Exclusive per-target deploy lock
//!
//! In-process registry of running deploys, optionally backed by an advisory
//! lock on a per-target file so separate CLI processes exclude each other
//! too. The OS drops the file lock when its holder exits, so a crashed
//! deploy never leaves the target locked.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{ConfigError, CoreError};
use crate::model::Target;

/// Registry of targets with a deploy in progress
#[derive(Debug, Clone, Default)]
pub struct DeployLocks {
    held: Arc<Mutex<HashSet<String>>>,
    lock_dir: Option<PathBuf>,
}

impl DeployLocks {
    /// In-process locking only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also take `<lock_dir>/<target>.lock`
    #[must_use]
    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(lock_dir.into());
        self
    }

    /// Whether a deploy for `target` is in progress in this process
    #[must_use]
    pub fn is_locked(&self, target: &Target) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&target.to_string())
    }

    /// Take the lock for `target`, released when the guard drops
    ///
    /// # Errors
    /// Returns `CoreError::LockContention` if another deploy holds it
    pub fn acquire(&self, target: &Target) -> Result<DeployLockGuard, CoreError> {
        let key = target.to_string();
        {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if !held.insert(key.clone()) {
                return Err(CoreError::LockContention(key));
            }
        }

        let file = match &self.lock_dir {
            Some(dir) => match take_lock_file(dir, target) {
                Ok(held) => Some(held),
                Err(err) => {
                    self.release(&key);
                    return Err(err);
                }
            },
            None => None,
        };

        debug!(deploy_target = %key, "deploy lock acquired");
        Ok(DeployLockGuard {
            locks: self.clone(),
            key,
            file,
        })
    }

    fn release(&self, key: &str) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Held deploy lock
#[derive(Debug)]
pub struct DeployLockGuard {
    locks: DeployLocks,
    key: String,
    file: Option<LockFile>,
}

/// Open lock file holding the advisory lock
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
    handle: File,
}

impl DeployLockGuard {
    /// Lock file path, if file locking is enabled
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }
}

impl Drop for DeployLockGuard {
    fn drop(&mut self) {
        // the file stays; unlinking it would let a waiter lock a stale inode
        if let Some(file) = &self.file
            && let Err(err) = FileExt::unlock(&file.handle)
        {
            warn!(path = %file.path.display(), error = %err, "failed to unlock lock file");
        }
        self.locks.release(&self.key);
        debug!(deploy_target = %self.key, "deploy lock released");
    }
}

fn take_lock_file(dir: &Path, target: &Target) -> Result<LockFile, CoreError> {
    fs::create_dir_all(dir).map_err(|e| lock_io_error(dir, &e))?;
    let path = dir.join(format!("{}.lock", target.slug()));

    let mut handle = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| lock_io_error(&path, &e))?;
    if handle.try_lock_exclusive().is_err() {
        return Err(CoreError::LockContention(target.to_string()));
    }

    // owner pid, informational only
    if let Err(err) = handle
        .set_len(0)
        .and_then(|()| writeln!(handle, "{}", std::process::id()))
    {
        debug!(path = %path.display(), error = %err, "cannot record lock owner");
    }
    Ok(LockFile { path, handle })
}

fn lock_io_error(path: &Path, err: &std::io::Error) -> CoreError {
    ConfigError::Invalid {
        field: "deploy.lock_dir".to_string(),
        reason: format!("{}: {err}", path.display()),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let locks = DeployLocks::new();
        let target = Target::new("api", "my-saas");

        let guard = locks.acquire(&target).unwrap();
        assert!(locks.is_locked(&target));

        let err = locks.acquire(&target).unwrap_err();
        assert!(matches!(err, CoreError::LockContention(_)));
        assert!(err.to_string().contains("deploy already in progress"));

        drop(guard);
        assert!(!locks.is_locked(&target));
        assert!(locks.acquire(&target).is_ok());
    }

    #[test]
    fn test_targets_are_independent() {
        let locks = DeployLocks::new();
        let _api = locks.acquire(&Target::new("api", "my-saas")).unwrap();
        assert!(locks.acquire(&Target::new("web", "my-saas")).is_ok());
    }

    #[test]
    fn test_lock_file_excludes_other_registry() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new("api", "my-saas");

        let first = DeployLocks::new().with_lock_dir(dir.path());
        let second = DeployLocks::new().with_lock_dir(dir.path());

        let guard = first.acquire(&target).unwrap();
        let path = guard.file().unwrap().to_path_buf();
        assert!(path.exists());

        let err = second.acquire(&target).unwrap_err();
        assert!(matches!(err, CoreError::LockContention(_)));
        assert!(!second.is_locked(&target));

        drop(guard);
        assert!(path.exists());
        assert!(second.acquire(&target).is_ok());
    }

    #[test]
    fn test_leftover_lock_file_is_not_contention() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new("api", "my-saas");
        // left behind by a process that exited mid-deploy
        fs::write(dir.path().join("api.my-saas.lock"), "4242\n").unwrap();

        let locks = DeployLocks::new().with_lock_dir(dir.path());
        let guard = locks.acquire(&target).unwrap();
        let owner = fs::read_to_string(guard.file().unwrap()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_lock_held_by_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new("api", "my-saas");
        let path = dir.path().join("api.my-saas.lock");

        // another process holding the lock
        let other = File::create(&path).unwrap();
        other.try_lock_exclusive().unwrap();

        let locks = DeployLocks::new().with_lock_dir(dir.path());
        let err = locks.acquire(&target).unwrap_err();
        assert!(matches!(err, CoreError::LockContention(_)));
        assert!(!locks.is_locked(&target));

        drop(other);
        assert!(locks.acquire(&target).is_ok());
    }
}
