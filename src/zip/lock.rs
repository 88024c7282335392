//! Per-archive mutual exclusion.
//!
//! Sessions against the same archive path run one at a time; sessions
//! against different paths never contend beyond the short map lookup.

use log::debug;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

struct LockEntry {
    mutex: Arc<Mutex<()>>,
    /// Holder plus waiters.
    count: usize,
}

/// Reference-counted named locks, keyed by normalized archive path.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, LockEntry>>,
}

/// Held for the duration of one archive session; released on drop.
pub struct ArchiveLock<'a> {
    registry: &'a LockRegistry,
    key: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute path, `/` separators, upper case.
    pub fn lock_key(path: &Path) -> String {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        absolute.to_string_lossy().replace('\\', "/").to_uppercase()
    }

    /// Block until this caller owns the lock for `path`.
    pub fn request(&self, path: &Path) -> ArchiveLock<'_> {
        let key = Self::lock_key(path);
        let mutex = {
            let mut locks = self.locks.lock();
            let entry = locks.entry(key.clone()).or_insert_with(|| LockEntry {
                mutex: Arc::new(Mutex::new(())),
                count: 0,
            });
            entry.count += 1;
            Arc::clone(&entry.mutex)
        };

        let guard = mutex.lock_arc();
        debug!("Acquired archive lock [{key}]");
        ArchiveLock {
            registry: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of paths with a holder or waiter.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        if let Some(entry) = locks.get_mut(key) {
            entry.count -= 1;
            if entry.count == 0 {
                locks.remove(key);
            }
        }
    }
}

impl ArchiveLock<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ArchiveLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry.release(&self.key);
        debug!("Released archive lock [{}]", self.key);
    }
}
