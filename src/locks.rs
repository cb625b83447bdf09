//! Keyed locks
//!
//! Serializes work on the same on-disk path while letting distinct paths
//! proceed in parallel. Locks are created on first use and never removed;
//! the key space (example folders, record files, clone targets) stays small
//! over a process lifetime.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guards copies of example folders into scratch workspaces
pub static COPY_LOCKS: Lazy<KeyedMutex> = Lazy::new(KeyedMutex::new);

/// Guards appends to per-example record files
pub static RECORD_LOCKS: Lazy<KeyedMutex> = Lazy::new(KeyedMutex::new);

/// Guards clone targets in the fetch cache
pub static FETCH_LOCKS: Lazy<KeyedMutex> = Lazy::new(KeyedMutex::new);

/// A mutex per string key
#[derive(Default)]
pub struct KeyedMutex {
    mutexes: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            mutexes: DashMap::new(),
        }
    }

    /// Wait for the lock of `key`; released when the guard drops
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .mutexes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }
}
