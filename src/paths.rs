//! On-disk locations of the config document and its lock file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Name of the per-user config document.
pub const FILE_NAME: &str = ".micro";

/// Suffix appended to the document path to form the lock path.
pub const LOCK_SUFFIX: &str = ".lock";

/// Document path and sibling lock path.
///
/// `file` is `None` only for the fallback used when the home directory
/// cannot be resolved; such a store lives in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    file: Option<PathBuf>,
    lock: PathBuf,
}

impl StorePaths {
    /// `<home>/.micro` and `<home>/.micro.lock` for the current user.
    pub fn resolve() -> Result<Self> {
        dirs::home_dir()
            .filter(|home| !home.as_os_str().is_empty())
            .map(Self::in_dir)
            .ok_or(StoreError::HomeResolution)
    }

    /// Paths rooted at `dir` instead of the home directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::for_file(dir.as_ref().join(FILE_NAME))
    }

    /// Paths for an explicit document; the lock sits next to it.
    pub fn for_file(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let lock = lock_path_for(&file);
        Self {
            file: Some(file),
            lock,
        }
    }

    /// Temp-directory lock with no backing document.
    pub fn fallback() -> Self {
        Self {
            file: None,
            lock: lock_path_for(&std::env::temp_dir().join(FILE_NAME)),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn lock(&self) -> &Path {
        &self.lock
    }
}

fn lock_path_for(file: &Path) -> PathBuf {
    let mut lock: OsString = file.as_os_str().to_owned();
    lock.push(LOCK_SUFFIX);
    PathBuf::from(lock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_dir_layout() {
        let paths = StorePaths::in_dir("/home/alice");
        assert_eq!(paths.file(), Some(Path::new("/home/alice/.micro")));
        assert_eq!(paths.lock(), Path::new("/home/alice/.micro.lock"));
    }

    #[test]
    fn test_for_file_appends_lock_suffix() {
        let paths = StorePaths::for_file("/tmp/settings.json");
        assert_eq!(paths.lock(), Path::new("/tmp/settings.json.lock"));
    }

    #[test]
    fn test_fallback_has_no_file() {
        let paths = StorePaths::fallback();
        assert!(paths.file().is_none());
        assert!(paths.lock().starts_with(std::env::temp_dir()));
        assert!(paths.lock().ends_with(".micro.lock"));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        // Home resolution depends on the environment; when it succeeds the
        // result must be stable and follow the documented layout.
        if let Ok(first) = StorePaths::resolve() {
            let second = StorePaths::resolve().unwrap();
            assert_eq!(first, second);
            assert!(first.file().unwrap().ends_with(FILE_NAME));
        }
    }
}
