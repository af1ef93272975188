//! The locked local config store
//!
//! A `Store` owns the in-memory tree, the cross-process lock and the
//! diagnostics for one document. Every read-modify-write of the document
//! happens under the lock and starts by reloading from disk, so concurrent
//! writers in other processes are never clobbered.
//!
//! Construction never fails: an unresolvable home directory, an unreadable
//! or corrupt document, or a lock failure degrade to an empty tree and are
//! recorded as diagnostics.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use micro_lock::FileLock;

use crate::diagnostics::{Diagnostics, Observer};
use crate::error::{Result, StoreError};
use crate::paths::StorePaths;
use crate::tree::{display_path, ConfigTree};

/// Per-user config document shared between processes.
#[derive(Debug)]
pub struct Store {
    paths: StorePaths,
    lock: FileLock,
    tree: ConfigTree,
    diagnostics: Diagnostics,
}

impl Store {
    /// Open the store at `<home>/.micro`.
    pub fn open_default() -> Self {
        Self::init(StorePaths::resolve(), Diagnostics::new())
    }

    /// Open the store at `<home>/.micro`, reporting diagnostics to `observer`.
    pub fn open_default_with_observer(observer: Observer) -> Self {
        Self::init(StorePaths::resolve(), Diagnostics::with_observer(observer))
    }

    /// Open the store at explicit paths.
    pub fn open(paths: StorePaths) -> Self {
        Self::init(Ok(paths), Diagnostics::new())
    }

    /// Open the store at explicit paths, reporting diagnostics to `observer`.
    pub fn open_with_observer(paths: StorePaths, observer: Observer) -> Self {
        Self::init(Ok(paths), Diagnostics::with_observer(observer))
    }

    fn init(resolved: Result<StorePaths>, mut diagnostics: Diagnostics) -> Self {
        let paths = match resolved {
            Ok(paths) => paths,
            Err(e) => {
                let fallback = StorePaths::fallback();
                diagnostics.record(format!(
                    "{e}; config kept in memory, lock at {}",
                    fallback.lock().display()
                ));
                fallback
            }
        };

        let mut store = Self {
            lock: FileLock::new(paths.lock()),
            paths,
            tree: ConfigTree::new(),
            diagnostics,
        };

        let Some(file) = store.paths.file().map(Path::to_path_buf) else {
            return store;
        };

        if let Err(e) = store.lock.acquire() {
            let err = StoreError::lock(store.paths.lock(), e);
            store
                .diagnostics
                .record(format!("{err}; starting with empty config"));
            return store;
        }

        match read_document(&file) {
            Ok(tree) => {
                tracing::debug!(path = %file.display(), "loaded config");
                store.tree = tree;
            }
            Err(e) => store
                .diagnostics
                .record(format!("{e}; starting with empty config")),
        }

        store.release_quietly();
        store
    }

    /// Value at `path`, trimmed. Absent keys yield an empty string.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Result<String> {
        Ok(self.tree.get(path).trim().to_string())
    }

    /// Set `value` at `path` and persist the whole document.
    ///
    /// Runs under the lock (reusing it if `lock` was called) and reloads
    /// the document first so writes made by other processes survive.
    pub fn set<S: AsRef<str>>(&mut self, value: &str, path: &[S]) -> Result<()> {
        tracing::debug!(key = %display_path(path), "set");
        self.modify(|tree| tree.set(path, value))
    }

    /// Remove the value or subtree at `path`. Returns whether it existed.
    pub fn delete<S: AsRef<str>>(&mut self, path: &[S]) -> Result<bool> {
        tracing::debug!(key = %display_path(path), "delete");
        self.modify(|tree| tree.remove(path))
    }

    /// Take the lock and resynchronize from disk.
    ///
    /// Until `unlock`, other processes block on the lock while `set` and
    /// `delete` from this store run inside the held section.
    pub fn lock(&mut self) -> Result<()> {
        self.acquire()?;
        if let Err(e) = self.resync() {
            self.diagnostics
                .record(format!("{e}; keeping previously loaded config"));
        }
        Ok(())
    }

    /// Release the lock. Safe to call when not locked.
    pub fn unlock(&mut self) -> Result<()> {
        self.lock
            .release()
            .map_err(|e| StoreError::lock(self.paths.lock(), e))
    }

    /// Whether this store currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Resynchronize the in-memory tree from disk under the lock.
    pub fn reload(&mut self) -> Result<()> {
        self.with_lock(Self::resync)
    }

    /// Every diagnostic recorded since the store was opened.
    pub fn errors(&self) -> &[String] {
        self.diagnostics.messages()
    }

    /// The current in-memory tree.
    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Whether changes reach a document on disk.
    pub fn is_persistent(&self) -> bool {
        self.paths.file().is_some()
    }

    fn modify<T>(&mut self, op: impl FnOnce(&mut ConfigTree) -> Result<T>) -> Result<T> {
        let result = self.with_lock(|store| {
            let Some(file) = store.paths.file().map(Path::to_path_buf) else {
                let out = op(&mut store.tree)?;
                store
                    .diagnostics
                    .record("no config file available; change kept in memory only");
                return Ok(out);
            };

            store.resync()?;

            // Work on a copy so the in-memory tree only moves once the
            // document on disk has been replaced.
            let mut next = store.tree.clone();
            let out = op(&mut next)?;
            let bytes = next.serialize()?;
            write_document(&file, &bytes)?;
            store.tree = next;
            Ok(out)
        });

        if let Err(e @ (StoreError::FileIo { .. } | StoreError::Serialization(_))) = &result {
            self.diagnostics.record(e.to_string());
        }
        result
    }

    /// Run `f` holding the lock, taking and dropping it unless `lock` was
    /// called beforehand.
    fn with_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.lock.is_held() {
            return f(self);
        }

        self.acquire()?;
        let result = f(self);
        self.release_quietly();
        result
    }

    fn acquire(&mut self) -> Result<()> {
        self.lock
            .acquire()
            .map_err(|e| StoreError::lock(self.paths.lock(), e))
    }

    fn release_quietly(&mut self) {
        if let Err(e) = self.lock.release() {
            let err = StoreError::lock(self.paths.lock(), e);
            self.diagnostics.record(err.to_string());
        }
    }

    /// Replace the in-memory tree with the document on disk.
    ///
    /// A corrupt document is recorded and the current tree kept; read
    /// failures are returned.
    fn resync(&mut self) -> Result<()> {
        let Some(file) = self.paths.file() else {
            return Ok(());
        };

        match read_document(file) {
            Ok(tree) => {
                self.tree = tree;
                Ok(())
            }
            Err(e @ StoreError::Parse { .. }) => {
                self.diagnostics
                    .record(format!("{e}; keeping previously loaded config"));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Read and parse the document, creating it empty if it does not exist.
fn read_document(path: &Path) -> Result<ConfigTree> {
    match fs::read(path) {
        Ok(bytes) => ConfigTree::load(&bytes).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            create_empty(path).map_err(|e| StoreError::io(path, e))?;
            tracing::debug!(path = %path.display(), "created empty config");
            Ok(ConfigTree::new())
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn create_empty(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Write the full document atomically (write-then-rename).
///
/// A symlinked document is written through to its target, and the
/// replacement keeps the permissions of the file it replaces.
fn write_document(path: &Path, bytes: &[u8]) -> Result<()> {
    let target = match fs::canonicalize(path) {
        Ok(target) => target,
        Err(e) if e.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let permissions = fs::metadata(&target).ok().map(|m| m.permissions());
    let temp_path = temp_path_for(&target);

    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        if let Some(permissions) = permissions {
            fs::set_permissions(&temp_path, permissions)?;
        }
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io(&temp_path, e));
    }

    if let Err(e) = fs::rename(&temp_path, &target) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io(&target, e));
    }

    tracing::debug!(path = %target.display(), bytes = bytes.len(), "wrote config");
    Ok(())
}

/// `<file>.tmp` next to the document, keeping its full name.
fn temp_path_for(file: &Path) -> PathBuf {
    let mut temp: OsString = file.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn open_in(dir: &TempDir) -> Store {
        Store::open(StorePaths::in_dir(dir.path()))
    }

    #[test]
    fn test_first_open_creates_empty_document() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join(".micro");
        assert!(!file.exists());

        let store = open_in(&temp_dir);

        assert!(file.exists());
        assert_eq!(fs::read(&file).unwrap().len(), 0);
        assert_eq!(store.get(&["any", "path"]).unwrap(), "");
        assert!(store.errors().is_empty());
        assert!(!store.is_locked());
    }

    #[test]
    fn test_set_then_get() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);

        store.set("bar", &["foo"]).unwrap();
        store.set("y", &["x", "nested"]).unwrap();

        assert_eq!(store.get(&["foo"]).unwrap(), "bar");
        assert_eq!(store.get(&["x", "nested"]).unwrap(), "y");
        assert_eq!(store.get(&["does", "not", "exist"]).unwrap(), "");
    }

    #[test]
    fn test_get_trims_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);

        store.set("  padded value\n", &["k"]).unwrap();
        assert_eq!(store.get(&["k"]).unwrap(), "padded value");
    }

    #[test]
    fn test_set_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut store = open_in(&temp_dir);
            store.set("secret", &["db", "password"]).unwrap();
        }

        let store = open_in(&temp_dir);
        assert_eq!(store.get(&["db", "password"]).unwrap(), "secret");
    }

    #[test]
    fn test_set_writes_valid_json() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);
        store.set("1", &["a", "b"]).unwrap();

        let text = fs::read_to_string(temp_dir.path().join(".micro")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"a": {"b": "1"}}));
        assert!(!temp_dir.path().join(".micro.tmp").exists());
    }

    #[test]
    fn test_set_reloads_external_writes() {
        let temp_dir = TempDir::new().unwrap();
        let mut first = open_in(&temp_dir);
        let mut second = open_in(&temp_dir);

        first.set("bar", &["foo"]).unwrap();
        // second has not seen "foo" in memory yet
        second.set("baz", &["qux"]).unwrap();

        let reopened = open_in(&temp_dir);
        assert_eq!(reopened.get(&["foo"]).unwrap(), "bar");
        assert_eq!(reopened.get(&["qux"]).unwrap(), "baz");
        assert_eq!(second.get(&["foo"]).unwrap(), "bar");
    }

    #[test]
    fn test_corrupt_document_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join(".micro");
        fs::write(&file, b"{ this is not json").unwrap();

        let mut store = open_in(&temp_dir);
        assert_eq!(store.get(&["anything"]).unwrap(), "");
        assert_eq!(store.errors().len(), 1);
        assert!(store.errors()[0].contains("cannot parse"));

        store.set("v", &["k"]).unwrap();
        let reparsed = ConfigTree::load(&fs::read(&file).unwrap()).unwrap();
        assert_eq!(reparsed.get(&["k"]), "v");
    }

    #[test]
    fn test_unreadable_document_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        // a directory where the document should be cannot be read as a file
        fs::create_dir(temp_dir.path().join(".micro")).unwrap();

        let mut store = open_in(&temp_dir);
        assert_eq!(store.get(&["k"]).unwrap(), "");
        assert_eq!(store.errors().len(), 1);

        let err = store.set("v", &["k"]).unwrap_err();
        assert!(matches!(err, StoreError::FileIo { .. }));
        assert_eq!(store.errors().len(), 2);
    }

    #[test]
    fn test_corruption_after_open_keeps_loaded_tree() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join(".micro");
        let mut store = open_in(&temp_dir);
        store.set("1", &["a"]).unwrap();

        fs::write(&file, b"[").unwrap();
        store.set("2", &["b"]).unwrap();

        assert_eq!(store.get(&["a"]).unwrap(), "1");
        assert_eq!(store.get(&["b"]).unwrap(), "2");
        assert_eq!(store.errors().len(), 1);
        let on_disk = ConfigTree::load(&fs::read(&file).unwrap()).unwrap();
        assert_eq!(on_disk.get(&["a"]), "1");
    }

    #[test]
    fn test_invalid_path_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);

        let err = store.set("v", &["a", ""]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
        assert!(store.errors().is_empty());
        assert!(!store.is_locked());
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);
        store.set("h", &["db", "host"]).unwrap();
        store.set("p", &["db", "port"]).unwrap();

        assert!(store.delete(&["db", "host"]).unwrap());
        assert!(!store.delete(&["db", "host"]).unwrap());

        let reopened = open_in(&temp_dir);
        assert_eq!(reopened.get(&["db", "host"]).unwrap(), "");
        assert_eq!(reopened.get(&["db", "port"]).unwrap(), "p");
    }

    #[test]
    fn test_lock_resyncs_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let mut reader = open_in(&temp_dir);
        let mut writer = open_in(&temp_dir);

        writer.set("fresh", &["k"]).unwrap();
        assert_eq!(reader.get(&["k"]).unwrap(), "");

        reader.lock().unwrap();
        assert!(reader.is_locked());
        assert_eq!(reader.get(&["k"]).unwrap(), "fresh");
        reader.unlock().unwrap();
        reader.unlock().unwrap();
        assert!(!reader.is_locked());
    }

    #[test]
    fn test_set_inside_explicit_lock_keeps_lock() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);
        let mut other = FileLock::new(store.paths().lock());

        store.lock().unwrap();
        store.set("v", &["k"]).unwrap();
        assert!(store.is_locked());
        assert!(!other.try_acquire().unwrap());

        store.unlock().unwrap();
        assert!(other.try_acquire().unwrap());
    }

    #[test]
    fn test_lock_released_after_set() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);
        store.set("v", &["k"]).unwrap();

        let mut other = FileLock::new(store.paths().lock());
        assert!(other.try_acquire().unwrap());
    }

    #[test]
    fn test_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_in(&temp_dir);
        fs::write(temp_dir.path().join(".micro"), br#"{"k": " v "}"#).unwrap();

        store.reload().unwrap();
        assert_eq!(store.get(&["k"]).unwrap(), "v");
    }

    #[test]
    fn test_deleted_document_is_recreated() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join(".micro");
        let mut store = open_in(&temp_dir);
        store.set("v", &["old"]).unwrap();

        fs::remove_file(&file).unwrap();
        store.set("v", &["new"]).unwrap();

        assert_eq!(store.get(&["old"]).unwrap(), "");
        assert_eq!(store.get(&["new"]).unwrap(), "v");
        assert!(file.exists());
    }

    #[test]
    fn test_in_memory_fallback() {
        let mut store = Store::open(StorePaths::fallback());
        assert!(!store.is_persistent());

        store.set("v", &["k"]).unwrap();
        assert_eq!(store.get(&["k"]).unwrap(), "v");
        assert_eq!(store.errors().len(), 1);
    }

    #[test]
    fn test_observer_receives_diagnostics() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".micro"), b"42").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let store = Store::open_with_observer(
            StorePaths::in_dir(temp_dir.path()),
            Box::new(move |msg| sink.lock().unwrap().push(msg.to_string())),
        );

        assert_eq!(seen.lock().unwrap().as_slice(), store.errors());
        assert_eq!(store.errors().len(), 1);
    }

    #[test]
    fn test_errors_are_not_cleared() {
        let mut store = Store::open(StorePaths::fallback());
        store.set("a", &["x"]).unwrap();
        let earlier = store.errors().to_vec();
        assert!(!earlier.is_empty());

        store.set("b", &["y"]).unwrap();

        assert_eq!(store.errors().len(), earlier.len() + 1);
        assert_eq!(&store.errors()[..earlier.len()], earlier.as_slice());
    }

    #[test]
    fn test_in_memory_set_takes_lock() {
        let mut store = Store::open(StorePaths::fallback());
        let mut holder = FileLock::new(store.paths().lock());
        holder.acquire().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            store.set("v", &["k"]).unwrap();
            tx.send(()).unwrap();
            store
        });

        assert!(
            rx.recv_timeout(std::time::Duration::from_millis(200)).is_err(),
            "set must wait for the lock"
        );
        holder.release().unwrap();

        let store = handle.join().unwrap();
        assert_eq!(store.get(&["k"]).unwrap(), "v");
        assert!(!store.is_locked());
    }

    #[test]
    fn test_write_keeps_unrelated_tmp_sibling() {
        let temp_dir = TempDir::new().unwrap();
        let sibling = temp_dir.path().join("settings.tmp");
        fs::write(&sibling, "user data").unwrap();

        let file = temp_dir.path().join("settings.json");
        let mut store = Store::open(StorePaths::for_file(&file));
        store.set("v", &["k"]).unwrap();

        assert_eq!(fs::read_to_string(&sibling).unwrap(), "user data");
        assert!(!temp_dir.path().join("settings.json.tmp").exists());
        assert_eq!(ConfigTree::load(&fs::read(&file).unwrap()).unwrap().get(&["k"]), "v");
    }

    #[test]
    #[cfg(unix)]
    fn test_write_goes_through_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let dotfiles = temp_dir.path().join("dotfiles");
        fs::create_dir(&dotfiles).unwrap();
        let target = dotfiles.join("micro.json");
        fs::write(&target, "{}").unwrap();
        let link = temp_dir.path().join(".micro");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut store = open_in(&temp_dir);
        store.set("secret", &["db", "password"]).unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let on_disk = ConfigTree::load(&fs::read(&target).unwrap()).unwrap();
        assert_eq!(on_disk.get(&["db", "password"]), "secret");
        assert!(!dotfiles.join("micro.json.tmp").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join(".micro");
        fs::write(&file, "{}").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();

        let mut store = open_in(&temp_dir);
        store.set("secret", &["db", "password"]).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
