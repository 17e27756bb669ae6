//! Advisory jacket locking.
//!
//! One OS advisory lock per jacket, taken on the jacket info file (whose
//! contents double as jacket metadata). The lock is cooperative: it
//! coordinates processes on a single host, and the jacket object itself is
//! thread-confined. There is no atomic shared→exclusive upgrade; upgrading
//! releases the shared lock first, so a reader that needs to upgrade must
//! restart its transaction.

use std::fs::File;
use std::io;
use std::path::Path;

use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LockError {
    #[error("lock i/o: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Unlocked,
    Shared,
    Exclusive,
}

/// Advisory shared/exclusive lock over one jacket.
#[derive(Debug)]
pub struct JacketLock {
    file: File,
    mode: LockMode,
}

impl JacketLock {
    /// Open the lock over an existing sentinel file.
    pub fn open(path: &Path) -> Result<Self, LockError> {
        Ok(Self {
            file: File::open(path)?,
            mode: LockMode::Unlocked,
        })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Acquire the shared (read) lock, blocking. Downgrading from exclusive
    /// releases first.
    pub fn shared(&mut self) -> Result<(), LockError> {
        match self.mode {
            LockMode::Shared => Ok(()),
            LockMode::Exclusive => {
                self.unlock()?;
                self.shared()
            }
            LockMode::Unlocked => {
                FileExt::lock_shared(&self.file)?;
                self.mode = LockMode::Shared;
                Ok(())
            }
        }
    }

    /// Acquire the exclusive (write) lock, blocking. Upgrading from shared
    /// releases first; the caller must treat its prior reads as stale.
    pub fn exclusive(&mut self) -> Result<(), LockError> {
        match self.mode {
            LockMode::Exclusive => Ok(()),
            LockMode::Shared => {
                self.unlock()?;
                self.exclusive()
            }
            LockMode::Unlocked => {
                FileExt::lock_exclusive(&self.file)?;
                self.mode = LockMode::Exclusive;
                Ok(())
            }
        }
    }

    pub fn unlock(&mut self) -> Result<(), LockError> {
        if self.mode != LockMode::Unlocked {
            fs2::FileExt::unlock(&self.file)?;
            self.mode = LockMode::Unlocked;
        }
        Ok(())
    }

    /// Run `f` under the shared lock, releasing on every exit path.
    pub fn with_shared<T, E>(&mut self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<LockError>,
    {
        self.shared()?;
        let result = f();
        match self.unlock() {
            Ok(()) => result,
            Err(err) => result.and(Err(err.into())),
        }
    }

    /// Run `f` under the exclusive lock, releasing on every exit path.
    pub fn with_exclusive<T, E>(&mut self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<LockError>,
    {
        self.exclusive()?;
        let result = f();
        match self.unlock() {
            Ok(()) => result,
            Err(err) => result.and(Err(err.into())),
        }
    }
}

impl Drop for JacketLock {
    fn drop(&mut self) {
        // The OS releases on close anyway; this keeps the mode honest when
        // the handle is reused through mem::replace tricks.
        let _ = self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn sentinel() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("_jacket");
        let mut file = File::create(&path).expect("sentinel");
        file.write_all(b"{}\n").expect("sentinel write");
        (dir, path)
    }

    #[test]
    fn mode_transitions() {
        let (_dir, path) = sentinel();
        let mut lock = JacketLock::open(&path).unwrap();
        assert_eq!(lock.mode(), LockMode::Unlocked);
        lock.shared().unwrap();
        assert_eq!(lock.mode(), LockMode::Shared);
        lock.exclusive().unwrap();
        assert_eq!(lock.mode(), LockMode::Exclusive);
        lock.shared().unwrap();
        assert_eq!(lock.mode(), LockMode::Shared);
        lock.unlock().unwrap();
        assert_eq!(lock.mode(), LockMode::Unlocked);
    }

    #[test]
    fn exclusive_excludes_other_handles() {
        let (_dir, path) = sentinel();
        let mut lock = JacketLock::open(&path).unwrap();
        lock.exclusive().unwrap();

        let probe = File::open(&path).unwrap();
        assert!(FileExt::try_lock_exclusive(&probe).is_err());
        assert!(FileExt::try_lock_shared(&probe).is_err());

        lock.unlock().unwrap();
        assert!(FileExt::try_lock_shared(&probe).is_ok());
    }

    #[test]
    fn shared_admits_other_readers() {
        let (_dir, path) = sentinel();
        let mut lock = JacketLock::open(&path).unwrap();
        lock.shared().unwrap();

        let probe = File::open(&path).unwrap();
        assert!(FileExt::try_lock_shared(&probe).is_ok());
        assert!(FileExt::try_lock_exclusive(&probe).is_err());
    }

    #[test]
    fn scoped_helpers_release_on_error() {
        let (_dir, path) = sentinel();
        let mut lock = JacketLock::open(&path).unwrap();
        let result: Result<(), LockError> = lock.with_exclusive(|| {
            Err(LockError::Io(io::Error::other("boom")))
        });
        assert!(result.is_err());
        assert_eq!(lock.mode(), LockMode::Unlocked);

        let probe = File::open(&path).unwrap();
        assert!(FileExt::try_lock_exclusive(&probe).is_ok());
    }
}
