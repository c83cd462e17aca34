//! In-process named locks
//!
//! Operations that mutate a shared network resource (a subnet, a network
//! profile) serialize on that resource's ID. Guards release on drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Registry of async mutexes keyed by name
///
/// Cloning shares the registry. An entry lives only while someone holds or
/// waits for its lock.
#[derive(Debug, Clone, Default)]
pub struct NamedLocks {
    inner: Registry,
}

/// Holds a named lock until dropped
#[derive(Debug)]
pub struct NamedLockGuard {
    key: String,
    registry: Registry,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // the registry and this guard are the only owners: nobody is waiting
        if map.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 2) {
            map.remove(&self.key);
        }
        debug!("Released lock {}", self.key);
    }
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> String {
        key.trim().to_ascii_lowercase()
    }

    fn mutex_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_string()).or_default().clone()
    }

    /// Wait for and take the lock named `key` (case-insensitive)
    pub async fn lock(&self, key: &str) -> NamedLockGuard {
        let key = Self::normalize(key);
        debug!("Acquiring lock {}", key);
        let guard = self.mutex_for(&key).lock_owned().await;
        debug!("Acquired lock {}", key);
        NamedLockGuard {
            key,
            registry: Arc::clone(&self.inner),
            _guard: guard,
        }
    }

    /// Take several locks in a stable order; duplicates are taken once
    pub async fn lock_all<I, S>(&self, keys: I) -> Vec<NamedLockGuard>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = keys
            .into_iter()
            .map(|k| Self::normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(&key).await);
        }
        guards
    }

    /// Whether `key` is currently held
    pub fn is_locked(&self, key: &str) -> bool {
        let key = Self::normalize(key);
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(&key).is_some_and(|m| m.try_lock().is_err())
    }
}
