//! micro-config - per-user local config store
//!
//! Settings live in a single JSON document, `~/.micro`, that many
//! independently launched processes read and write. Writers coordinate
//! through an advisory lock on `~/.micro.lock`, which the OS releases if a
//! holder dies, so no process is ever left waiting on a dead one.
//!
//! ```no_run
//! use micro_config::Store;
//!
//! let mut store = Store::open_default();
//! store.set("hunter2", &["db", "password"])?;
//! assert_eq!(store.get(&["db", "password"])?, "hunter2");
//! # Ok::<(), micro_config::StoreError>(())
//! ```

pub mod diagnostics;
pub mod error;
pub mod paths;
pub mod store;
pub mod tree;

pub use diagnostics::{Diagnostics, Observer};
pub use error::{Result, StoreError};
pub use micro_lock::{FileLock, LockError};
pub use paths::StorePaths;
pub use store::Store;
pub use tree::{split_key, ConfigTree};
