use std::fs::{File, OpenOptions};
use std::path::Path;
use crate::core::error::{Error, ErrorKind, Result};

/// Single writer guarantee: an advisory lock on a sidecar file. Readers never
/// take it; at most one writer holds it per logical store.
pub struct FileLock {
    pub file: File,
}

impl FileLock {
    /// Block until the lock is acquired.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        Self::lock(path, true)
    }

    /// Try once; fail with `LockConflict` if another writer holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Self> {
        Self::lock(path, false)
    }

    fn lock(path: impl AsRef<Path>, blocking: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path.as_ref())?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            let operation = if blocking { LOCK_EX } else { LOCK_EX | LOCK_NB };

            let rc = unsafe { flock(fd, operation) };
            if rc != 0 {
                return Err(Error::new(
                    ErrorKind::LockConflict,
                    format!("writer lock held elsewhere: {}", path.as_ref().display()),
                ));
            }
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
