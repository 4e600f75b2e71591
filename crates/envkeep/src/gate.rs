//! Per-path exclusive locks
//!
//! Serializes read-modify-write cycles and appends on the same file.
//! Locks are created on first use and live as long as the registry.
//! This only guards threads of one process; separate processes writing
//! the same data directory are not coordinated.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry of lock handles keyed by storage path
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `path`.
    ///
    /// The registry map is only locked while the handle is looked up, never
    /// during `f`. The path lock is released on every exit, including a
    /// panic inside `f`.
    pub fn with_exclusive<T, F>(&self, path: &Path, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let handle = self.handle(path);
        let _guard = handle.lock();
        f()
    }

    /// Number of distinct paths seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}
