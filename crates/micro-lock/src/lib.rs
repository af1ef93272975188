//! Advisory cross-process file locking
//!
//! `FileLock` guards a resource shared by independently launched processes
//! using an OS advisory lock (`flock(2)` on unix) on a zero-content marker
//! file. The OS drops the lock as soon as the holding descriptor is closed,
//! including when the holder crashes or is killed, so a dead holder never
//! leaves other processes waiting. `acquire` has no timeout.
//!
//! Lock ownership is tied to the open handle, not the process: two
//! `FileLock` values on the same path exclude each other even inside one
//! process.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file: {0}")]
    Open(#[source] io::Error),

    #[error("cannot lock: {0}")]
    Lock(#[source] io::Error),

    #[error("cannot unlock: {0}")]
    Unlock(#[source] io::Error),
}

/// Exclusive advisory lock keyed by a lock-file path.
///
/// The lock is released on `release`, on drop, or when the process exits.
#[derive(Debug)]
pub struct FileLock {
    /// Path to the lock file
    path: PathBuf,
    /// The opened lock file, present only while the lock is held
    file: Option<File>,
}

impl FileLock {
    /// Bind a lock to `path`. Nothing is created until the first acquire.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Block until the lock is obtained.
    ///
    /// Creates the lock file and its parent directory if they don't exist.
    /// Calling this while already holding the lock is a no-op.
    pub fn acquire(&mut self) -> LockResult<()> {
        if self.is_held() {
            return Ok(());
        }

        let file = open_lock_file(&self.path).map_err(LockError::Open)?;
        let start = Instant::now();

        if !sys::try_lock(&file).map_err(LockError::Lock)? {
            tracing::debug!(path = %self.path.display(), "lock contended, waiting");
            sys::lock(&file).map_err(LockError::Lock)?;
            tracing::debug!(
                path = %self.path.display(),
                waited_ms = start.elapsed().as_millis() as u64,
                "lock acquired after contention"
            );
        } else {
            tracing::trace!(path = %self.path.display(), "lock acquired");
        }

        self.file = Some(file);
        Ok(())
    }

    /// Try to obtain the lock without blocking.
    ///
    /// Returns `Ok(false)` if another handle holds it.
    pub fn try_acquire(&mut self) -> LockResult<bool> {
        if self.is_held() {
            return Ok(true);
        }

        let file = open_lock_file(&self.path).map_err(LockError::Open)?;
        if sys::try_lock(&file).map_err(LockError::Lock)? {
            self.file = Some(file);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release the lock. Safe to call when not held.
    pub fn release(&mut self) -> LockResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        // Closing the descriptor releases the lock as well, so the handle is
        // dropped even if the explicit unlock fails.
        let result = sys::unlock(&file).map_err(LockError::Unlock);
        drop(file);
        tracing::trace!(path = %self.path.display(), "lock released");
        result
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    options.open(path)
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
        loop {
            let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    pub fn lock(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_EX)
    }

    pub fn try_lock(file: &File) -> io::Result<bool> {
        match flock(file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_UN)
    }
}

#[cfg(not(unix))]
mod sys {
    use fs2::FileExt;
    use std::fs::File;
    use std::io;

    pub fn lock(file: &File) -> io::Result<()> {
        FileExt::lock_exclusive(file)
    }

    pub fn try_lock(file: &File) -> io::Result<bool> {
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        FileExt::unlock(file)
    }
}
